//! The send_notification tool: proactive outbound messages, behind the
//! notifier's preference, quiet-hours and rate-limit checks.

use std::sync::Arc;

use async_trait::async_trait;
use valet_core::types::NOTIFICATION_CATEGORIES;
use valet_notify::{Notifier, NotifyError};

use super::{str_arg, Tool, ToolError, ToolResult};

pub struct SendNotificationTool {
    notifier: Option<Arc<Notifier>>,
}

impl SendNotificationTool {
    pub fn new(notifier: Option<Arc<Notifier>>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Tool for SendNotificationTool {
    fn name(&self) -> &str {
        "send_notification"
    }

    fn description(&self) -> &str {
        "Send an outbound notification to a user's phone. Use this for \
         proactive messages like download complete alerts, reminders, \
         weather warnings, and smart home updates. Each message requires \
         a user_id and respects the user's notification preferences, \
         rate limits (max 10/hour), and quiet hours."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["send_message", "check_status"],
                    "description": "send_message: Send a notification to a user. \
                                    check_status: Check if the messaging gateway is connected."
                },
                "user_id": {
                    "type": "string",
                    "description": "User ID to send the message to. The user must have \
                                    a phone number configured in their profile."
                },
                "message": {
                    "type": "string",
                    "description": "The message text to send."
                },
                "category": {
                    "type": "string",
                    "enum": NOTIFICATION_CATEGORIES,
                    "description": "Notification category. Must match a category the user \
                                    has enabled. Defaults to 'general' if not specified."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(notifier) = &self.notifier else {
            return Ok("Error: NOTIFY_GATEWAY_URL must be configured.".to_string());
        };
        let action = str_arg(&input, "action")
            .ok_or_else(|| ToolError::InvalidInput("action is required".into()))?;

        match action {
            "send_message" => {
                let Some(user_id) = str_arg(&input, "user_id") else {
                    return Ok("Error: user_id is required for send_message".to_string());
                };
                let Some(message) = str_arg(&input, "message") else {
                    return Ok("Error: message is required for send_message".to_string());
                };
                let category = str_arg(&input, "category").unwrap_or("general");

                match notifier.send_message(user_id, message, category).await {
                    Ok(outcome) => Ok(outcome.to_string()),
                    // Transport and gateway rejections read back to the
                    // LLM as plain strings, matching the skip reasons.
                    Err(e @ NotifyError::Gateway(_)) | Err(e @ NotifyError::Rejected(_)) => {
                        Ok(e.to_string())
                    }
                    Err(NotifyError::User(e)) => Err(ToolError::Database(e.to_string())),
                }
            }
            "check_status" => match notifier.check_status().await {
                Ok(status) => Ok(status),
                Err(e) => Ok(e.to_string()),
            },
            other => Ok(format!("Error: Unknown action '{other}'")),
        }
    }
}
