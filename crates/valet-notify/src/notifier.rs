use std::time::Instant;

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use valet_core::config::NotifyConfig;
use valet_users::UserStore;

use crate::window::{is_quiet_hours, within_rate_limit};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Error connecting to messaging gateway: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("Error sending message: {0}")]
    Rejected(String),

    #[error(transparent)]
    User(#[from] valet_users::UserError),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// What happened to a send request. Skips are ordinary outcomes, not
/// errors: callers (the LLM included) read the reason and move on.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent { user_id: String },
    /// Gateway accepted the message but is temporarily disconnected; it
    /// will deliver once reconnected.
    Queued { user_id: String },
    Skipped { reason: String },
}

impl SendOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. } | SendOutcome::Queued { .. })
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendOutcome::Sent { user_id } => write!(f, "Message sent to {user_id}."),
            SendOutcome::Queued { user_id } => write!(
                f,
                "Message to {user_id} queued for delivery \
                 (gateway is temporarily disconnected)."
            ),
            SendOutcome::Skipped { reason } => write!(f, "{reason}"),
        }
    }
}

#[derive(Deserialize)]
struct GatewaySendResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    queued: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct GatewayStatusResponse {
    #[serde(default)]
    connected: bool,
    #[serde(default, rename = "queueSize")]
    queue_size: u32,
}

/// Outbound notification channel. Owns its HTTP client; the rate-limit
/// map is process-local on purpose (a restart resets quotas).
pub struct Notifier {
    users: UserStore,
    http: reqwest::Client,
    gateway_url: String,
    max_per_hour: usize,
    rate: DashMap<String, Vec<Instant>>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig, users: UserStore) -> Self {
        Self {
            users,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            max_per_hour: config.max_per_hour,
            rate: DashMap::new(),
        }
    }

    /// Send `message` to `user_id`, enforcing in order: user + phone,
    /// enabled flag, category opt-in, quiet hours, rate limit. Only after
    /// all five pass does anything go out over HTTP.
    pub async fn send_message(
        &self,
        user_id: &str,
        message: &str,
        category: &str,
    ) -> Result<SendOutcome> {
        let Some(user) = self.users.get(user_id)? else {
            return Ok(skip(format!("Error: User '{user_id}' not found.")));
        };
        let Some(phone) = user.phone.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(skip(format!(
                "User '{user_id}' does not have a phone number configured for notifications."
            )));
        };

        let prefs = &user.notification_prefs;
        if !prefs.enabled {
            return Ok(skip(format!(
                "Notifications are disabled for user '{user_id}'."
            )));
        }
        if !prefs.categories.iter().any(|c| c == category) {
            return Ok(skip(format!(
                "User '{user_id}' has not opted in to '{category}' notifications."
            )));
        }
        if let (Some(start), Some(end)) =
            (prefs.quiet_hours_start.as_deref(), prefs.quiet_hours_end.as_deref())
        {
            let now = Utc::now();
            let minutes = now.hour() * 60 + now.minute();
            if is_quiet_hours(start, end, minutes) {
                return Ok(skip(format!(
                    "Message not sent: user '{user_id}' is in quiet hours ({start}-{end})."
                )));
            }
        }
        if !self.check_rate_limit(user_id) {
            return Ok(skip(format!(
                "Rate limit exceeded for user '{user_id}' \
                 (max {} messages/hour). Try again later.",
                self.max_per_hour
            )));
        }

        let resp: GatewaySendResponse = self
            .http
            .post(format!("{}/send", self.gateway_url))
            .json(&serde_json::json!({ "to": phone, "message": message }))
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            return Err(NotifyError::Rejected(
                resp.error.unwrap_or_else(|| "unknown gateway error".into()),
            ));
        }

        self.record_send(user_id);
        info!(user_id, category, queued = resp.queued, "notification dispatched");

        if resp.queued {
            Ok(SendOutcome::Queued {
                user_id: user_id.to_string(),
            })
        } else {
            Ok(SendOutcome::Sent {
                user_id: user_id.to_string(),
            })
        }
    }

    /// Report whether the messaging gateway is connected and ready.
    pub async fn check_status(&self) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/status", self.gateway_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok("Messaging gateway is not responding.".to_string());
        }
        let status: GatewayStatusResponse = resp.json().await?;
        if status.connected {
            let queue = if status.queue_size > 0 {
                format!(" ({} queued messages)", status.queue_size)
            } else {
                String::new()
            };
            Ok(format!("Messaging gateway is connected and ready.{queue}"))
        } else {
            Ok("Messaging gateway is running but not connected. \
                Scan the QR code to authenticate (check gateway logs)."
                .to_string())
        }
    }

    fn check_rate_limit(&self, user_id: &str) -> bool {
        let mut entry = self.rate.entry(user_id.to_string()).or_default();
        within_rate_limit(&mut entry, Instant::now(), self.max_per_hour)
    }

    fn record_send(&self, user_id: &str) {
        self.rate
            .entry(user_id.to_string())
            .or_default()
            .push(Instant::now());
        debug!(user_id, "send recorded for rate limiting");
    }
}

fn skip(reason: String) -> SendOutcome {
    SendOutcome::Skipped { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_core::types::NotificationPrefs;
    use valet_store::Store;

    fn notifier_with_users() -> (Notifier, UserStore) {
        let users = UserStore::new(Store::open_in_memory().unwrap()).unwrap();
        let config = NotifyConfig {
            // Unroutable address: preference checks must reject before any
            // HTTP attempt in these tests.
            gateway_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            max_per_hour: 10,
        };
        (Notifier::new(&config, users.clone()), users)
    }

    #[tokio::test]
    async fn unknown_user_is_skipped() {
        let (notifier, _) = notifier_with_users();
        let out = notifier.send_message("ghost", "hi", "general").await.unwrap();
        assert_eq!(
            out,
            SendOutcome::Skipped {
                reason: "Error: User 'ghost' not found.".into()
            }
        );
    }

    #[tokio::test]
    async fn user_without_phone_is_skipped() {
        let (notifier, users) = notifier_with_users();
        users.ensure("ron").unwrap();
        let out = notifier.send_message("ron", "hi", "general").await.unwrap();
        let SendOutcome::Skipped { reason } = out else {
            panic!("expected skip");
        };
        assert!(reason.contains("does not have a phone number"));
    }

    #[tokio::test]
    async fn disabled_notifications_skip_before_any_http() {
        let (notifier, users) = notifier_with_users();
        users.ensure("ron").unwrap();
        users.set_phone("ron", Some("+15551234567")).unwrap();
        users
            .set_notification_prefs(
                "ron",
                &NotificationPrefs {
                    enabled: false,
                    ..Default::default()
                },
            )
            .unwrap();
        let out = notifier.send_message("ron", "hi", "general").await.unwrap();
        let SendOutcome::Skipped { reason } = out else {
            panic!("expected skip");
        };
        assert!(reason.contains("disabled"));
    }

    #[tokio::test]
    async fn category_opt_out_is_skipped() {
        let (notifier, users) = notifier_with_users();
        users.ensure("ron").unwrap();
        users.set_phone("ron", Some("+15551234567")).unwrap();
        users
            .set_notification_prefs(
                "ron",
                &NotificationPrefs {
                    categories: vec!["reminder".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        let out = notifier.send_message("ron", "hi", "weather").await.unwrap();
        let SendOutcome::Skipped { reason } = out else {
            panic!("expected skip");
        };
        assert!(reason.contains("has not opted in to 'weather'"));
    }

    #[tokio::test]
    async fn quiet_hours_skip_mentions_the_window() {
        let (notifier, users) = notifier_with_users();
        users.ensure("ron").unwrap();
        users.set_phone("ron", Some("+15551234567")).unwrap();
        // A window covering the entire day so the test is time-independent.
        users
            .set_notification_prefs(
                "ron",
                &NotificationPrefs {
                    quiet_hours_start: Some("00:00".into()),
                    quiet_hours_end: Some("23:59".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let out = notifier.send_message("ron", "hi", "general").await.unwrap();
        let SendOutcome::Skipped { reason } = out else {
            panic!("expected skip");
        };
        assert!(reason.contains("quiet hours"));
    }

    #[tokio::test]
    async fn rate_limit_blocks_the_eleventh_send() {
        let (notifier, users) = notifier_with_users();
        users.ensure("ron").unwrap();
        users.set_phone("ron", Some("+15551234567")).unwrap();
        for _ in 0..10 {
            notifier.record_send("ron");
        }
        let out = notifier.send_message("ron", "hi", "general").await.unwrap();
        let SendOutcome::Skipped { reason } = out else {
            panic!("expected skip");
        };
        assert!(reason.contains("Rate limit exceeded"));
        assert!(reason.contains("10 messages/hour"));
    }

    #[test]
    fn outcome_strings_match_the_wire_contract() {
        let sent = SendOutcome::Sent { user_id: "ron".into() };
        assert_eq!(sent.to_string(), "Message sent to ron.");
        assert!(sent.delivered());
        let queued = SendOutcome::Queued { user_id: "ron".into() };
        assert!(queued.to_string().contains("queued for delivery"));
        assert!(queued.delivered());
        let skipped = SendOutcome::Skipped { reason: "nope".into() };
        assert!(!skipped.delivered());
    }
}
