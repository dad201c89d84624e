//! Persisted webhook events from the home automation controller.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Deserialize;
use valet_store::{Store, StoreError};

/// Incoming webhook payload. Automations typically send `state_changed`
/// events with entity details or `automation_triggered` events with the
/// automation name; custom events use an arbitrary `event_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub old_state: Option<String>,
    #[serde(default)]
    pub new_state: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ha_events (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type        TEXT NOT NULL,
            entity_id         TEXT,
            old_state         TEXT,
            new_state         TEXT,
            attributes        TEXT NOT NULL DEFAULT '{}',
            processed         INTEGER NOT NULL DEFAULT 0,
            notification_sent INTEGER NOT NULL DEFAULT 0,
            received_at       TEXT NOT NULL
        );",
    )
}

#[derive(Clone)]
pub struct EventStore {
    store: Store,
}

impl EventStore {
    pub fn new(store: Store) -> Result<Self, StoreError> {
        store.with(init_db)?;
        Ok(Self { store })
    }

    /// Persist an event and return its row id. Every delivery gets its
    /// own row; duplicates are the caller's signal, not ours to drop.
    pub fn insert(&self, event: &WebhookEvent) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let attrs = serde_json::Value::Object(event.attributes.clone()).to_string();
        self.store.with(|c| {
            c.execute(
                "INSERT INTO ha_events
                    (event_type, entity_id, old_state, new_state, attributes, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.event_type,
                    event.entity_id,
                    event.old_state,
                    event.new_state,
                    attrs,
                    now,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    pub fn mark_processed(&self, id: i64, notification_sent: bool) -> Result<(), StoreError> {
        self.store.with(|c| {
            c.execute(
                "UPDATE ha_events SET processed = 1, notification_sent = ?2 WHERE id = ?1",
                params![id, notification_sent as i64],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> WebhookEvent {
        WebhookEvent {
            event_type: event_type.into(),
            entity_id: Some("binary_sensor.front_door".into()),
            old_state: Some("off".into()),
            new_state: Some("on".into()),
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn duplicate_deliveries_get_distinct_rows() {
        let events = EventStore::new(Store::open_in_memory().unwrap()).unwrap();
        let a = events.insert(&event("state_changed")).unwrap();
        let b = events.insert(&event("state_changed")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mark_processed_sets_both_flags() {
        let events = EventStore::new(Store::open_in_memory().unwrap()).unwrap();
        let id = events.insert(&event("automation_triggered")).unwrap();
        events.mark_processed(id, true).unwrap();
        let (processed, sent): (i64, i64) = events
            .store
            .with(|c| {
                c.query_row(
                    "SELECT processed, notification_sent FROM ha_events WHERE id = ?1",
                    [id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!((processed, sent), (1, 1));
    }
}
