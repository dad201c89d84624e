use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};
use valet_store::Store;

use crate::error::{Result, SchedulerError};
use crate::schedule::next_run_after;
use crate::types::{ScheduledTask, TaskAction};

/// Initialise the tasks table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         TEXT NOT NULL,
            name            TEXT NOT NULL,
            cron_expression TEXT,
            action          TEXT NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            last_run        TEXT,
            next_run        TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_due
            ON scheduled_tasks(next_run) WHERE enabled = 1;",
    )
}

/// Persisted task CRUD plus the atomic claim used by the engine.
#[derive(Clone)]
pub struct TaskStore {
    pub(crate) store: Store,
}

impl TaskStore {
    pub fn new(store: Store) -> Result<Self> {
        store.with(init_db)?;
        Ok(Self { store })
    }

    /// Create a task. Recurring tasks get their first `next_run` from the
    /// cron expression (invalid expressions are rejected here, before
    /// anything is stored); one-shot tasks fire on the next poll.
    pub fn create(
        &self,
        user_id: &str,
        name: &str,
        cron_expression: Option<&str>,
        action: &TaskAction,
    ) -> Result<ScheduledTask> {
        let now = Utc::now();
        let next_run = match cron_expression {
            Some(expr) => Some(
                next_run_after(expr, now)
                    .ok_or_else(|| SchedulerError::InvalidCron(expr.to_string()))?,
            ),
            None => Some(now),
        };

        let now_str = now.to_rfc3339();
        let next_str = next_run.map(|t| t.to_rfc3339());
        let action_json = serde_json::to_string(action)
            .map_err(|e| SchedulerError::InvalidAction(e.to_string()))?;

        let id = self.store.with(|c| {
            c.execute(
                "INSERT INTO scheduled_tasks
                    (user_id, name, cron_expression, action, enabled,
                     last_run, next_run, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, NULL, ?5, ?6)",
                params![user_id, name, cron_expression, action_json, next_str, now_str],
            )?;
            Ok(c.last_insert_rowid())
        })?;

        info!(task_id = id, user_id, name, "task created");
        Ok(ScheduledTask {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            cron_expression: cron_expression.map(Into::into),
            action: action.clone(),
            enabled: true,
            last_run: None,
            next_run: next_str,
            created_at: now_str,
        })
    }

    /// All tasks owned by `user_id`, newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<ScheduledTask>> {
        let tasks = self.store.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, user_id, name, cron_expression, action, enabled,
                        last_run, next_run, created_at
                 FROM scheduled_tasks
                 WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([user_id], row_to_task)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })?;
        Ok(tasks)
    }

    /// Delete a task the user owns. Returns false when no row matched.
    pub fn delete(&self, task_id: i64, user_id: &str) -> Result<bool> {
        let n = self.store.with(|c| {
            c.execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1 AND user_id = ?2",
                params![task_id, user_id],
            )
        })?;
        Ok(n > 0)
    }

    /// Enable or disable a task. Disabling clears `next_run`; enabling
    /// recomputes it (one-shot tasks fire on the next poll).
    pub fn set_enabled(&self, task_id: i64, user_id: &str, enabled: bool) -> Result<()> {
        let now = Utc::now();
        let updated = self.store.with(|c| {
            let cron: Option<Option<String>> = c
                .query_row(
                    "SELECT cron_expression FROM scheduled_tasks
                     WHERE id = ?1 AND user_id = ?2",
                    params![task_id, user_id],
                    |r| r.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            let Some(cron) = cron else {
                return Ok(false);
            };
            let next = if enabled {
                match cron.as_deref() {
                    Some(expr) => next_run_after(expr, now).map(|t| t.to_rfc3339()),
                    None => Some(now.to_rfc3339()),
                }
            } else {
                None
            };
            c.execute(
                "UPDATE scheduled_tasks SET enabled = ?3, next_run = ?4
                 WHERE id = ?1 AND user_id = ?2",
                params![task_id, user_id, enabled as i64, next],
            )?;
            Ok(true)
        })?;
        if !updated {
            return Err(SchedulerError::TaskNotFound { id: task_id });
        }
        Ok(())
    }

    /// Claim every due task: set `last_run = now` and advance `next_run`
    /// in the same conditional UPDATE that checks dueness, so a task fires
    /// at most once per occurrence even if ticks raced. Returns the
    /// claimed tasks with their post-claim fields.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let now_str = now.to_rfc3339();

        let due: Vec<ScheduledTask> = self.store.with(|c| {
            let mut stmt = c.prepare_cached(
                "SELECT id, user_id, name, cron_expression, action, enabled,
                        last_run, next_run, created_at
                 FROM scheduled_tasks
                 WHERE enabled = 1 AND next_run IS NOT NULL AND next_run <= ?1",
            )?;
            let rows = stmt.query_map([&now_str], row_to_task)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })?;

        let mut claimed = Vec::new();
        for mut task in due {
            // One-shot tasks are exhausted after firing; recurring tasks
            // advance (an expression that stopped parsing clears next_run
            // and thereby disables the task instead of crashing the loop).
            let next = task
                .cron_expression
                .as_deref()
                .and_then(|expr| next_run_after(expr, now))
                .map(|t| t.to_rfc3339());

            let n = self.store.with(|c| {
                c.execute(
                    "UPDATE scheduled_tasks SET last_run = ?2, next_run = ?3
                     WHERE id = ?1 AND enabled = 1
                       AND next_run IS NOT NULL AND next_run <= ?2",
                    params![task.id, now_str, next],
                )
            })?;
            if n == 0 {
                // Another claimer got there first.
                continue;
            }
            if task.cron_expression.is_some() && next.is_none() {
                warn!(task_id = task.id, "cron no longer parses; task disabled");
            }
            task.last_run = Some(now_str.clone());
            task.next_run = next;
            claimed.push(task);
        }
        Ok(claimed)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let action_raw: String = row.get(4)?;
    let action: TaskAction = serde_json::from_str(&action_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        cron_expression: row.get(3)?,
        action,
        enabled: row.get::<_, i64>(5)? != 0,
        last_run: row.get(6)?,
        next_run: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task_store() -> TaskStore {
        TaskStore::new(Store::open_in_memory().unwrap()).unwrap()
    }

    fn reminder() -> TaskAction {
        TaskAction::Reminder {
            message: "stand up".into(),
            category: "reminder".into(),
        }
    }

    #[test]
    fn recurring_task_gets_a_future_next_run() {
        let tasks = task_store();
        let t = tasks
            .create("ron", "daily", Some("0 9 * * *"), &reminder())
            .unwrap();
        let next = DateTime::parse_from_rfc3339(t.next_run.as_deref().unwrap()).unwrap();
        assert!(next.with_timezone(&Utc) > Utc::now());
    }

    #[test]
    fn one_shot_task_is_due_immediately() {
        let tasks = task_store();
        let t = tasks.create("ron", "once", None, &reminder()).unwrap();
        assert!(t.cron_expression.is_none());
        assert!(t.next_run.is_some());
        let claimed = tasks.claim_due(Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(claimed.len(), 1);
        // Exhausted after the single firing.
        assert!(claimed[0].next_run.is_none());
    }

    #[test]
    fn invalid_cron_is_rejected_at_creation() {
        let tasks = task_store();
        let err = tasks
            .create("ron", "bad", Some("not a cron"), &reminder())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCron(_)));
        assert!(tasks.list("ron").unwrap().is_empty());
    }

    #[test]
    fn claim_advances_next_run_beyond_now() {
        let tasks = task_store();
        let t = tasks
            .create("ron", "daily", Some("0 9 * * *"), &reminder())
            .unwrap();
        // Force the task due.
        tasks
            .store
            .with(|c| {
                c.execute(
                    "UPDATE scheduled_tasks SET next_run = '2020-01-01T00:00:00+00:00'
                     WHERE id = ?1",
                    [t.id],
                )
            })
            .unwrap();
        let now = Utc::now();
        let claimed = tasks.claim_due(now).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].last_run.as_deref(), Some(now.to_rfc3339().as_str()));
        let next = DateTime::parse_from_rfc3339(claimed[0].next_run.as_deref().unwrap())
            .unwrap()
            .with_timezone(&Utc);
        assert!(next > now);
        // Second tick at the same instant: nothing left to claim.
        assert!(tasks.claim_due(now).unwrap().is_empty());
    }

    #[test]
    fn disabled_tasks_are_never_claimed() {
        let tasks = task_store();
        let t = tasks.create("ron", "once", None, &reminder()).unwrap();
        tasks.set_enabled(t.id, "ron", false).unwrap();
        assert!(tasks
            .claim_due(Utc::now() + Duration::seconds(1))
            .unwrap()
            .is_empty());
        // Disabled implies no next_run.
        assert!(tasks.list("ron").unwrap()[0].next_run.is_none());
    }

    #[test]
    fn re_enabling_recomputes_next_run() {
        let tasks = task_store();
        let t = tasks
            .create("ron", "daily", Some("0 9 * * *"), &reminder())
            .unwrap();
        tasks.set_enabled(t.id, "ron", false).unwrap();
        tasks.set_enabled(t.id, "ron", true).unwrap();
        assert!(tasks.list("ron").unwrap()[0].next_run.is_some());
    }

    #[test]
    fn cron_that_stops_parsing_disables_instead_of_crashing() {
        let tasks = task_store();
        let t = tasks
            .create("ron", "daily", Some("0 9 * * *"), &reminder())
            .unwrap();
        tasks
            .store
            .with(|c| {
                c.execute(
                    "UPDATE scheduled_tasks
                     SET cron_expression = 'garbage',
                         next_run = '2020-01-01T00:00:00+00:00'
                     WHERE id = ?1",
                    [t.id],
                )
            })
            .unwrap();
        let claimed = tasks.claim_due(Utc::now()).unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(claimed[0].next_run.is_none());
        // The loop keeps running; the task simply never fires again.
        assert!(tasks.claim_due(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn delete_checks_ownership() {
        let tasks = task_store();
        let t = tasks.create("ron", "once", None, &reminder()).unwrap();
        assert!(!tasks.delete(t.id, "maya").unwrap());
        assert!(tasks.delete(t.id, "ron").unwrap());
    }
}
