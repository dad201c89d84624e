use serde::{Deserialize, Serialize};

/// When a `check` action should raise a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyOn {
    #[default]
    Warning,
    Critical,
    Always,
}

/// What a task does when it fires. Stored as tagged JSON in the `action`
/// column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskAction {
    /// Send the stored message through the notification channel.
    Reminder {
        message: String,
        #[serde(default = "default_category")]
        category: String,
    },
    /// Execute a registry tool; the result is ignored.
    Automation {
        tool: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Execute a registry tool and notify when its output crosses the
    /// `notify_on` threshold.
    Check {
        tool: String,
        #[serde(default)]
        params: serde_json::Value,
        #[serde(default)]
        notify_on: NotifyOn,
    },
}

fn default_category() -> String {
    "general".to_string()
}

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    /// Cron expression for recurring tasks; None means one-shot.
    pub cron_expression: Option<String>,
    pub action: TaskAction,
    pub enabled: bool,
    /// RFC 3339; set every time the task fires.
    pub last_run: Option<String>,
    /// RFC 3339; NULL iff disabled, exhausted (one-shot fired), or the
    /// cron expression stopped parsing.
    pub next_run: Option<String>,
    pub created_at: String,
}
