//! Webhook ingress: POST /api/webhooks/homeassistant.
//!
//! Home automation sends events when automations fire or device states
//! change. Every event is stored for conversational context; significant
//! ones (attributes.notify, or automation_triggered which is always
//! noteworthy) fan out as smart_home notifications to every user with a
//! phone configured. The automation layer decides *which* events matter
//! by choosing what to send; this endpoint receives, stores, notifies.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::events::WebhookEvent;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub event_id: i64,
    pub notification_sent: bool,
}

/// POST /api/webhooks/homeassistant
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<WebhookResponse>, (StatusCode, Json<Value>)> {
    // Shared-secret auth. An unset secret means the operator never wired
    // this up: refuse loudly rather than accept anything.
    let Some(secret) = state.config.webhooks.secret.as_deref() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Webhook endpoint is not configured"})),
        ));
    };
    let provided = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok());
    if provided != Some(secret) {
        warn!("webhook rejected: invalid or missing secret");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or missing webhook secret"})),
        ));
    }

    // 1. Store the event.
    let event_id = state.events.insert(&event).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
    })?;
    info!(
        event_id,
        event_type = %event.event_type,
        entity = event.entity_id.as_deref().unwrap_or("-"),
        "event stored"
    );

    // 2. Decide whether to notify and fan out.
    let mut notification_sent = false;
    if should_notify(&event) {
        if let Some(notifier) = &state.notifier {
            let message = build_notification_message(&event);
            let user_ids = state.users.ids_with_phone().unwrap_or_default();
            for user_id in user_ids {
                // The notifier enforces each user's preferences, rate
                // limit, and quiet hours individually.
                match notifier.send_message(&user_id, &message, "smart_home").await {
                    Ok(outcome) if outcome.delivered() => notification_sent = true,
                    Ok(outcome) => debug!(user_id, %outcome, "notification skipped"),
                    Err(e) => warn!(user_id, error = %e, "notification failed"),
                }
            }
        } else {
            debug!("notifier not configured; skipping fan-out");
        }
    }

    // 3. Mark processed either way.
    if let Err(e) = state.events.mark_processed(event_id, notification_sent) {
        warn!(event_id, error = %e, "failed to mark event processed");
    }

    Ok(Json(WebhookResponse {
        status: "accepted".to_string(),
        event_id,
        notification_sent,
    }))
}

/// Notify iff the sender flagged it, or the event type is always
/// noteworthy.
pub(crate) fn should_notify(event: &WebhookEvent) -> bool {
    event
        .attributes
        .get("notify")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        || event.event_type == "automation_triggered"
}

/// Human-readable notification text. An explicit attributes.message wins;
/// otherwise derive a default from the event fields.
pub(crate) fn build_notification_message(event: &WebhookEvent) -> String {
    if let Some(custom) = event.attributes.get("message").and_then(|v| v.as_str()) {
        return custom.to_string();
    }

    let friendly = event
        .attributes
        .get("friendly_name")
        .and_then(|v| v.as_str())
        .or(event.entity_id.as_deref())
        .unwrap_or("Unknown");

    if event.event_type == "automation_triggered" {
        return format!("Automation triggered: {friendly}");
    }
    match (event.old_state.as_deref(), event.new_state.as_deref()) {
        (Some(old), Some(new)) => format!("{friendly} changed from {old} to {new}"),
        (None, Some(new)) => format!("{friendly} is now {new}"),
        _ => format!("Home Assistant event: {} ({friendly})", event.event_type),
    }
}
