use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use valet_store::Store;

use crate::error::Result;
use crate::types::{Alert, Severity, TriggerOutcome};

/// Initialise the alert table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS alert_state (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            alert_key          TEXT NOT NULL UNIQUE,
            alert_type         TEXT NOT NULL,
            severity           TEXT NOT NULL,
            message            TEXT NOT NULL,
            metadata           TEXT NOT NULL DEFAULT '{}',
            first_triggered_at TEXT NOT NULL,
            last_triggered_at  TEXT NOT NULL,
            resolved_at        TEXT,
            notification_sent  INTEGER NOT NULL DEFAULT 0
        );",
    )
}

/// Alert rows keyed by `alert_key`; the uniqueness constraint makes
/// concurrent triggers idempotent.
#[derive(Clone)]
pub struct AlertStore {
    store: Store,
}

impl AlertStore {
    pub fn new(store: Store) -> Result<Self> {
        store.with(init_db)?;
        Ok(Self { store })
    }

    /// Record an alert firing. The three outcomes:
    /// - no row existed: insert, `New`;
    /// - row existed but was resolved: re-activate, reset the sent flag,
    ///   `Refired`;
    /// - row active: refresh message/severity/timestamp only,
    ///   `StillActive`.
    pub fn trigger(
        &self,
        alert_key: &str,
        alert_type: &str,
        severity: Severity,
        message: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<TriggerOutcome> {
        let now = Utc::now().to_rfc3339();
        let meta = metadata
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let sev = severity.to_string();

        let outcome = self.store.with(|c| {
            let existing: Option<Option<String>> = c
                .query_row(
                    "SELECT resolved_at FROM alert_state WHERE alert_key = ?1",
                    [alert_key],
                    |r| r.get(0),
                )
                .optional()?;

            match existing {
                None => {
                    c.execute(
                        "INSERT INTO alert_state
                            (alert_key, alert_type, severity, message, metadata,
                             first_triggered_at, last_triggered_at,
                             resolved_at, notification_sent)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, NULL, 0)",
                        params![alert_key, alert_type, sev, message, meta, now],
                    )?;
                    Ok(TriggerOutcome::New)
                }
                Some(resolved_at) => {
                    let refired = resolved_at.is_some();
                    // Reset the sent flag only when re-activating a
                    // resolved alert; a continued-active alert keeps it.
                    c.execute(
                        "UPDATE alert_state SET
                            severity          = ?2,
                            message           = ?3,
                            metadata          = ?4,
                            last_triggered_at = ?5,
                            resolved_at       = NULL,
                            notification_sent = CASE
                                WHEN resolved_at IS NOT NULL THEN 0
                                ELSE notification_sent
                            END
                         WHERE alert_key = ?1",
                        params![alert_key, sev, message, meta, now],
                    )?;
                    Ok(if refired {
                        TriggerOutcome::Refired
                    } else {
                        TriggerOutcome::StillActive
                    })
                }
            }
        })?;

        if outcome.needs_notify() {
            info!(alert_key, message, "alert triggered");
        }
        Ok(outcome)
    }

    /// Mark an alert resolved. Returns true only when it was active;
    /// resolving an absent or already-resolved key is a no-op.
    pub fn resolve(&self, alert_key: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let n = self.store.with(|c| {
            c.execute(
                "UPDATE alert_state SET resolved_at = ?2
                 WHERE alert_key = ?1 AND resolved_at IS NULL",
                params![alert_key, now],
            )
        })?;
        let resolved = n > 0;
        if resolved {
            info!(alert_key, "alert resolved");
        }
        Ok(resolved)
    }

    /// Active (unresolved) alerts, most recently triggered first,
    /// optionally filtered by type.
    pub fn active_alerts(&self, alert_type: Option<&str>) -> Result<Vec<Alert>> {
        let alerts = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, alert_key, alert_type, severity, message, metadata,
                        first_triggered_at, last_triggered_at, resolved_at,
                        notification_sent
                 FROM alert_state
                 WHERE resolved_at IS NULL
                   AND (?1 IS NULL OR alert_type = ?1)
                 ORDER BY last_triggered_at DESC",
            )?;
            let rows = stmt.query_map([alert_type], row_to_alert)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(alerts)
    }

    /// Active alerts that have not been notified yet.
    pub fn unsent_alerts(&self) -> Result<Vec<Alert>> {
        let alerts = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, alert_key, alert_type, severity, message, metadata,
                        first_triggered_at, last_triggered_at, resolved_at,
                        notification_sent
                 FROM alert_state
                 WHERE resolved_at IS NULL AND notification_sent = 0
                 ORDER BY last_triggered_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_alert)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(alerts)
    }

    pub fn mark_sent(&self, alert_id: i64) -> Result<()> {
        self.store.with(|c| {
            c.execute(
                "UPDATE alert_state SET notification_sent = 1 WHERE id = ?1",
                [alert_id],
            )
        })?;
        Ok(())
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let severity: String = row.get(3)?;
    let meta_raw: String = row.get(5)?;
    Ok(Alert {
        id: row.get(0)?,
        alert_key: row.get(1)?,
        alert_type: row.get(2)?,
        severity: severity.parse().unwrap_or(Severity::Warning),
        message: row.get(4)?,
        metadata: serde_json::from_str(&meta_raw).unwrap_or(serde_json::Value::Null),
        first_triggered_at: row.get(6)?,
        last_triggered_at: row.get(7)?,
        resolved_at: row.get(8)?,
        notification_sent: row.get::<_, i64>(9)? != 0,
    })
}
