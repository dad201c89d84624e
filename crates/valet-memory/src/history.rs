use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use valet_store::Store;

use crate::error::Result;
use crate::types::ConversationMessage;

/// Append-only conversation log shared by every channel.
#[derive(Clone)]
pub struct HistoryStore {
    store: Store,
}

impl HistoryStore {
    pub fn new(store: Store) -> Result<Self> {
        store.with(crate::db::init_db)?;
        Ok(Self { store })
    }

    /// Append one message. Rows are never updated afterwards.
    pub fn append(
        &self,
        user_id: &str,
        channel: &str,
        role: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        source: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let meta = metadata.map(|m| m.to_string());
        let id = self.store.with(|c| {
            c.execute(
                "INSERT INTO conversation_history
                    (user_id, channel, role, content, metadata, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![user_id, channel, role, content, meta, source, now],
            )?;
            Ok(c.last_insert_rowid())
        })?;
        Ok(id)
    }

    /// Messages from the trailing `days` window across all channels,
    /// oldest first, capped at `limit` (the most recent ones win).
    pub fn recent(
        &self,
        user_id: &str,
        days: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let mut messages = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, channel, role, content, metadata, source, created_at
                 FROM conversation_history
                 WHERE user_id = ?1 AND created_at > ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![user_id, cutoff, limit], row_to_message)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        messages.reverse();
        Ok(messages)
    }

    /// Cursor-paginated history, newest first. Returns the page plus a
    /// has-more flag (one extra row is fetched and dropped).
    pub fn page(
        &self,
        user_id: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<(Vec<ConversationMessage>, bool)> {
        let cursor = before.unwrap_or_else(Utc::now).to_rfc3339();
        let mut messages = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, channel, role, content, metadata, source, created_at
                 FROM conversation_history
                 WHERE user_id = ?1 AND created_at < ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![user_id, cursor, limit + 1], row_to_message)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        Ok((messages, has_more))
    }

    /// Delete all history for a user.
    pub fn clear(&self, user_id: &str) -> Result<usize> {
        let n = self.store.with(|c| {
            c.execute(
                "DELETE FROM conversation_history WHERE user_id = ?1",
                [user_id],
            )
        })?;
        Ok(n)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMessage> {
    let meta_raw: Option<String> = row.get(5)?;
    Ok(ConversationMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        metadata: meta_raw.and_then(|s| serde_json::from_str(&s).ok()),
        source: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> HistoryStore {
        HistoryStore::new(Store::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn recent_returns_oldest_first() {
        let h = history();
        h.append("u", "pwa", "user", "first", None, None).unwrap();
        h.append("u", "voice", "assistant", "second", None, None)
            .unwrap();
        h.append("u", "pwa", "user", "third", None, None).unwrap();
        let msgs = h.recent("u", 7, 20).unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn recent_spans_all_channels() {
        let h = history();
        h.append("u", "whatsapp", "user", "a", None, None).unwrap();
        h.append("u", "telegram", "user", "b", None, None).unwrap();
        assert_eq!(h.recent("u", 7, 20).unwrap().len(), 2);
    }

    #[test]
    fn recent_keeps_the_most_recent_when_capped() {
        let h = history();
        for i in 0..5 {
            h.append("u", "pwa", "user", &format!("m{i}"), None, None)
                .unwrap();
        }
        let msgs = h.recent("u", 7, 2).unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[test]
    fn page_reports_has_more() {
        let h = history();
        for i in 0..3 {
            h.append("u", "pwa", "user", &format!("m{i}"), None, None)
                .unwrap();
        }
        let (page, has_more) = h.page("u", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert!(has_more);
        let (rest, more) = h.page("u", None, 10).unwrap();
        assert_eq!(rest.len(), 3);
        assert!(!more);
    }

    #[test]
    fn metadata_round_trips_as_json() {
        let h = history();
        let meta = serde_json::json!({"message_id": "abc", "has_image": true});
        h.append("u", "pwa", "assistant", "hi", Some(&meta), None)
            .unwrap();
        let msgs = h.recent("u", 7, 10).unwrap();
        assert_eq!(msgs[0].metadata.as_ref().unwrap()["message_id"], "abc");
    }

    #[test]
    fn clear_removes_only_that_user() {
        let h = history();
        h.append("a", "pwa", "user", "mine", None, None).unwrap();
        h.append("b", "pwa", "user", "theirs", None, None).unwrap();
        assert_eq!(h.clear("a").unwrap(), 1);
        assert!(h.recent("a", 7, 10).unwrap().is_empty());
        assert_eq!(h.recent("b", 7, 10).unwrap().len(), 1);
    }
}
