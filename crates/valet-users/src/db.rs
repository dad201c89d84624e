use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use valet_core::types::{
    NotificationPrefs, Permission, Soul, UserRole, RESERVED_USER_IDS,
};
use valet_store::Store;

use crate::error::{Result, UserError};
use crate::types::User;

/// Initialise the users table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id                 TEXT PRIMARY KEY,
            name               TEXT NOT NULL,
            role               TEXT NOT NULL DEFAULT 'user',
            permissions        TEXT NOT NULL DEFAULT '[\"media\",\"home\"]',
            soul               TEXT,
            phone              TEXT,
            notification_prefs TEXT,
            created_at         TEXT NOT NULL
        );",
    )
}

/// CRUD over user records. Shares the workspace [`Store`].
#[derive(Clone)]
pub struct UserStore {
    store: Store,
}

impl UserStore {
    pub fn new(store: Store) -> Result<Self> {
        store.with(init_db)?;
        Ok(Self { store })
    }

    /// Insert a bare user row if none exists. New users get the default
    /// role and permission set; existing rows are untouched.
    pub fn ensure(&self, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.store.with(|c| {
            c.execute(
                "INSERT OR IGNORE INTO users (id, name, created_at)
                 VALUES (?1, ?1, ?2)",
                params![user_id, now],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        let row = self.store.with(|c| {
            c.query_row(
                "SELECT id, name, role, permissions, soul, phone,
                        notification_prefs, created_at
                 FROM users WHERE id = ?1",
                [user_id],
                row_to_user,
            )
            .optional()
        })?;
        Ok(row)
    }

    /// All users ordered by creation time. Reserved ids (`default`,
    /// `system`) never appear here.
    pub fn list(&self) -> Result<Vec<User>> {
        let users = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, name, role, permissions, soul, phone,
                        notification_prefs, created_at
                 FROM users
                 WHERE id NOT IN ('default', 'system')
                 ORDER BY created_at",
            )?;
            let rows = stmt.query_map([], row_to_user)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(users)
    }

    /// Ids of users eligible for outbound fan-out (phone configured).
    pub fn ids_with_phone(&self) -> Result<Vec<String>> {
        let ids = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id FROM users
                 WHERE phone IS NOT NULL AND phone != ''
                   AND id NOT IN ('default', 'system')",
            )?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(ids)
    }

    /// Merge a partial soul update into the stored record and return the
    /// merged result. Read-modify-write under the single writer lock.
    pub fn update_soul(&self, user_id: &str, update: &Soul) -> Result<Soul> {
        let merged = self.store.with(|c| {
            let existing: Option<Option<String>> = c
                .query_row("SELECT soul FROM users WHERE id = ?1", [user_id], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(raw) = existing else {
                return Ok(None);
            };
            let mut soul = parse_soul(raw.as_deref());
            soul.merge(update);
            let encoded = serde_json::to_string(&soul).unwrap_or_else(|_| "{}".into());
            c.execute(
                "UPDATE users SET soul = ?2 WHERE id = ?1",
                params![user_id, encoded],
            )?;
            Ok(Some(soul))
        })?;
        merged.ok_or_else(|| UserError::NotFound {
            id: user_id.to_string(),
        })
    }

    pub fn set_permissions(&self, user_id: &str, permissions: &[Permission]) -> Result<()> {
        let encoded = serde_json::to_string(permissions).unwrap_or_else(|_| "[]".into());
        let n = self.store.with(|c| {
            c.execute(
                "UPDATE users SET permissions = ?2 WHERE id = ?1",
                params![user_id, encoded],
            )
        })?;
        if n == 0 {
            return Err(UserError::NotFound {
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_phone(&self, user_id: &str, phone: Option<&str>) -> Result<()> {
        let n = self.store.with(|c| {
            c.execute(
                "UPDATE users SET phone = ?2 WHERE id = ?1",
                params![user_id, phone],
            )
        })?;
        if n == 0 {
            return Err(UserError::NotFound {
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_notification_prefs(
        &self,
        user_id: &str,
        prefs: &NotificationPrefs,
    ) -> Result<()> {
        let encoded = serde_json::to_string(prefs).unwrap_or_else(|_| "{}".into());
        let n = self.store.with(|c| {
            c.execute(
                "UPDATE users SET notification_prefs = ?2 WHERE id = ?1",
                params![user_id, encoded],
            )
        })?;
        if n == 0 {
            return Err(UserError::NotFound {
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a user and everything they own. Child tables are cleaned
    /// explicitly; missing tables (partial deployments) are not an error
    /// because the sweep runs table by table.
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let deleted = self.store.with(|c| {
            for table in [
                "user_facts",
                "conversation_history",
                "scheduled_tasks",
                "oauth_tokens",
                "tool_usage",
            ] {
                let sql = format!("DELETE FROM {table} WHERE user_id = ?1");
                if let Err(e) = c.execute(&sql, [user_id]) {
                    // Subsystem table not created yet in this deployment.
                    tracing::debug!(table, error = %e, "cascade delete skipped");
                }
            }
            c.execute("DELETE FROM users WHERE id = ?1", [user_id])
        })?;
        if deleted > 0 {
            info!(user_id, "user deleted");
        }
        Ok(deleted > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(2)?;
    let perms_raw: Option<String> = row.get(3)?;
    let soul_raw: Option<String> = row.get(4)?;
    let prefs_raw: Option<String> = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        role: role_str.parse().unwrap_or(UserRole::User),
        permissions: parse_permissions(perms_raw.as_deref()),
        soul: parse_soul(soul_raw.as_deref()),
        phone: row.get(5)?,
        notification_prefs: parse_prefs(prefs_raw.as_deref()),
        created_at: row.get(7)?,
    })
}

fn parse_permissions(raw: Option<&str>) -> Vec<Permission> {
    // NULL means "never set"; an explicit empty list stays empty.
    let Some(raw) = raw else {
        return default_permissions();
    };
    let names: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
    names.iter().filter_map(|n| n.parse().ok()).collect()
}

fn default_permissions() -> Vec<Permission> {
    vec![Permission::Media, Permission::Home]
}

fn parse_soul(raw: Option<&str>) -> Soul {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn parse_prefs(raw: Option<&str>) -> NotificationPrefs {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        UserStore::new(Store::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn ensure_is_idempotent_and_preserves_fields() {
        let users = store();
        users.ensure("ron").unwrap();
        users
            .set_permissions("ron", &[Permission::Media, Permission::ClaudeCode])
            .unwrap();
        users.ensure("ron").unwrap();
        let u = users.get("ron").unwrap().unwrap();
        assert_eq!(
            u.permissions,
            vec![Permission::Media, Permission::ClaudeCode]
        );
    }

    #[test]
    fn new_users_get_default_permissions() {
        let users = store();
        users.ensure("maya").unwrap();
        let u = users.get("maya").unwrap().unwrap();
        assert_eq!(u.permissions, vec![Permission::Media, Permission::Home]);
        assert_eq!(u.role, UserRole::User);
    }

    #[test]
    fn listing_excludes_reserved_ids() {
        let users = store();
        users.ensure("default").unwrap();
        users.ensure("system").unwrap();
        users.ensure("ron").unwrap();
        let listed = users.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ron");
    }

    #[test]
    fn soul_update_merges_partial_records() {
        let users = store();
        users.ensure("ron").unwrap();
        users
            .update_soul(
                "ron",
                &Soul {
                    personality: Some("warm".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let merged = users
            .update_soul(
                "ron",
                &Soul {
                    humor: Some("light".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(merged.personality.as_deref(), Some("warm"));
        assert_eq!(merged.humor.as_deref(), Some("light"));
    }

    #[test]
    fn soul_update_for_missing_user_is_not_found() {
        let users = store();
        let err = users.update_soul("ghost", &Soul::default()).unwrap_err();
        assert!(matches!(err, UserError::NotFound { .. }));
    }

    #[test]
    fn phone_filter_returns_only_configured_users() {
        let users = store();
        users.ensure("a").unwrap();
        users.ensure("b").unwrap();
        users.set_phone("a", Some("+15551234567")).unwrap();
        users.set_phone("b", Some("")).unwrap();
        assert_eq!(users.ids_with_phone().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn delete_removes_the_user_row() {
        let users = store();
        users.ensure("ron").unwrap();
        assert!(users.delete_user("ron").unwrap());
        assert!(users.get("ron").unwrap().is_none());
        assert!(!users.delete_user("ron").unwrap());
    }
}
