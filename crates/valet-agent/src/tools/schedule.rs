//! The schedule_task tool: the LLM's handle on the background scheduler.

use async_trait::async_trait;
use chrono::DateTime;
use valet_scheduler::{NotifyOn, SchedulerError, TaskAction, TaskStore};

use super::{i64_arg, str_arg, Tool, ToolError, ToolResult};

pub struct ScheduleTaskTool {
    tasks: TaskStore,
}

impl ScheduleTaskTool {
    pub fn new(tasks: TaskStore) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Tool for ScheduleTaskTool {
    fn name(&self) -> &str {
        "schedule_task"
    }

    fn description(&self) -> &str {
        "Manage scheduled tasks for reminders, automations, or health checks. \
         Actions: 'create' a new task, 'list' existing tasks, or 'delete' one. \
         Supports cron expressions for recurring tasks (e.g., '0 9 * * *' = daily at 9am) \
         or one-time execution when cron_expression is omitted."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "list", "delete"],
                    "description": "Action to perform."
                },
                "user_id": {
                    "type": "string",
                    "description": "User ID (required for all actions)."
                },
                "name": {
                    "type": "string",
                    "description": "Task name (required for 'create')."
                },
                "cron_expression": {
                    "type": "string",
                    "description": "Cron schedule for recurring tasks. Examples: \
                                    '0 9 * * *' (daily 9am), '0 */6 * * *' (every 6h), \
                                    '0 * * * *' (hourly). Omit for one-time."
                },
                "action_type": {
                    "type": "string",
                    "enum": ["reminder", "automation", "check"],
                    "description": "Task type (required for 'create'). \
                                    reminder: send a notification message. \
                                    automation: execute a tool. \
                                    check: run a health check and notify on threshold."
                },
                "message": {
                    "type": "string",
                    "description": "Message text (for reminder type)."
                },
                "tool": {
                    "type": "string",
                    "description": "Tool name to execute (for automation/check type)."
                },
                "params": {
                    "type": "object",
                    "description": "Parameters to pass to the tool (for automation/check)."
                },
                "category": {
                    "type": "string",
                    "description": "Notification category for reminders."
                },
                "notify_on": {
                    "type": "string",
                    "enum": ["warning", "critical", "always"],
                    "description": "When to notify for check type (default: warning)."
                },
                "task_id": {
                    "type": "integer",
                    "description": "Task ID (required for 'delete')."
                }
            },
            "required": ["action", "user_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let action = str_arg(&input, "action")
            .ok_or_else(|| ToolError::InvalidInput("action is required".into()))?;
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;

        match action {
            "create" => self.create(user_id, &input),
            "list" => self.list(user_id),
            "delete" => self.delete(user_id, &input),
            other => Ok(format!("Unknown action: {other}")),
        }
    }
}

impl ScheduleTaskTool {
    fn create(&self, user_id: &str, input: &serde_json::Value) -> ToolResult {
        let Some(name) = str_arg(input, "name") else {
            return Ok("Error: 'name' is required to create a task.".to_string());
        };
        let Some(action_type) = str_arg(input, "action_type") else {
            return Ok(
                "Error: 'action_type' is required (reminder, automation, or check).".to_string(),
            );
        };

        let params = input.get("params").cloned().unwrap_or(serde_json::json!({}));
        let action = match action_type {
            "reminder" => TaskAction::Reminder {
                message: str_arg(input, "message").unwrap_or("Reminder").to_string(),
                category: str_arg(input, "category").unwrap_or("general").to_string(),
            },
            "automation" => {
                let Some(tool) = str_arg(input, "tool") else {
                    return Ok("Error: 'tool' is required for automation type.".to_string());
                };
                TaskAction::Automation {
                    tool: tool.to_string(),
                    params,
                }
            }
            "check" => {
                let Some(tool) = str_arg(input, "tool") else {
                    return Ok("Error: 'tool' is required for check type.".to_string());
                };
                let notify_on = match str_arg(input, "notify_on") {
                    Some("critical") => NotifyOn::Critical,
                    Some("always") => NotifyOn::Always,
                    _ => NotifyOn::Warning,
                };
                TaskAction::Check {
                    tool: tool.to_string(),
                    params,
                    notify_on,
                }
            }
            other => return Ok(format!("Error: unknown action_type '{other}'.")),
        };

        let cron = str_arg(input, "cron_expression");
        let task = match self.tasks.create(user_id, name, cron, &action) {
            Ok(t) => t,
            Err(SchedulerError::InvalidCron(expr)) => {
                return Ok(format!("Error: Invalid cron expression '{expr}'"));
            }
            Err(e) => return Err(ToolError::Database(e.to_string())),
        };

        let schedule = match cron {
            Some(expr) => format!("cron '{expr}'"),
            None => "one-time".to_string(),
        };
        Ok(format!(
            "Created task '{name}' (ID: {}, {schedule}, next run: {})",
            task.id,
            format_run(task.next_run.as_deref())
        ))
    }

    fn list(&self, user_id: &str) -> ToolResult {
        let tasks = self
            .tasks
            .list(user_id)
            .map_err(|e| ToolError::Database(e.to_string()))?;
        if tasks.is_empty() {
            return Ok("No scheduled tasks found.".to_string());
        }

        let mut lines = Vec::with_capacity(tasks.len());
        for t in &tasks {
            let kind = match &t.action {
                TaskAction::Reminder { .. } => "reminder",
                TaskAction::Automation { .. } => "automation",
                TaskAction::Check { .. } => "check",
            };
            let schedule = t.cron_expression.as_deref().unwrap_or("one-time");
            let status = if t.enabled { "enabled" } else { "disabled" };
            lines.push(format!(
                "- [{}] {} ({kind}, {schedule}, {status}, next: {})",
                t.id,
                t.name,
                format_run(t.next_run.as_deref())
            ));
        }
        Ok(format!("Scheduled tasks ({}):\n{}", tasks.len(), lines.join("\n")))
    }

    fn delete(&self, user_id: &str, input: &serde_json::Value) -> ToolResult {
        let Some(task_id) = i64_arg(input, "task_id") else {
            return Ok("Error: 'task_id' is required to delete a task.".to_string());
        };
        let deleted = self
            .tasks
            .delete(task_id, user_id)
            .map_err(|e| ToolError::Database(e.to_string()))?;
        if deleted {
            Ok(format!("Deleted task {task_id}."))
        } else {
            Ok(format!("Task {task_id} not found or doesn't belong to you."))
        }
    }
}

fn format_run(run: Option<&str>) -> String {
    match run {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|_| raw.to_string()),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_store::Store;

    fn tool() -> ScheduleTaskTool {
        ScheduleTaskTool::new(TaskStore::new(Store::open_in_memory().unwrap()).unwrap())
    }

    #[tokio::test]
    async fn create_list_delete_round_trip() {
        let t = tool();
        let out = t
            .execute(serde_json::json!({
                "action": "create",
                "user_id": "ron",
                "name": "morning briefing",
                "cron_expression": "0 9 * * *",
                "action_type": "reminder",
                "message": "Good morning",
                "category": "reminder",
            }))
            .await
            .unwrap();
        assert!(out.starts_with("Created task 'morning briefing' (ID: "));
        assert!(out.contains("cron '0 9 * * *'"));
        assert!(out.contains("next run: "));

        let listing = t
            .execute(serde_json::json!({"action": "list", "user_id": "ron"}))
            .await
            .unwrap();
        assert!(listing.starts_with("Scheduled tasks (1):"));
        assert!(listing.contains("morning briefing (reminder, 0 9 * * *, enabled"));

        let out = t
            .execute(serde_json::json!({"action": "delete", "user_id": "ron", "task_id": 1}))
            .await
            .unwrap();
        assert_eq!(out, "Deleted task 1.");
    }

    #[tokio::test]
    async fn invalid_cron_is_a_string_error_for_the_llm() {
        let t = tool();
        let out = t
            .execute(serde_json::json!({
                "action": "create",
                "user_id": "ron",
                "name": "bad",
                "cron_expression": "every tuesday",
                "action_type": "reminder",
            }))
            .await
            .unwrap();
        assert_eq!(out, "Error: Invalid cron expression 'every tuesday'");
    }

    #[tokio::test]
    async fn check_tasks_require_a_tool_name() {
        let t = tool();
        let out = t
            .execute(serde_json::json!({
                "action": "create",
                "user_id": "ron",
                "name": "health",
                "action_type": "check",
            }))
            .await
            .unwrap();
        assert_eq!(out, "Error: 'tool' is required for check type.");
    }

    #[tokio::test]
    async fn one_time_tasks_report_as_such() {
        let t = tool();
        let out = t
            .execute(serde_json::json!({
                "action": "create",
                "user_id": "ron",
                "name": "once",
                "action_type": "automation",
                "tool": "server_health",
            }))
            .await
            .unwrap();
        assert!(out.contains("one-time"));
    }

    #[tokio::test]
    async fn delete_of_foreign_task_is_refused() {
        let t = tool();
        t.execute(serde_json::json!({
            "action": "create",
            "user_id": "ron",
            "name": "mine",
            "action_type": "reminder",
            "message": "x",
        }))
        .await
        .unwrap();
        let out = t
            .execute(serde_json::json!({"action": "delete", "user_id": "maya", "task_id": 1}))
            .await
            .unwrap();
        assert_eq!(out, "Task 1 not found or doesn't belong to you.");
    }
}
