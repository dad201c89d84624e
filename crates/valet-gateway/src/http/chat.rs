//! Text chat endpoints.
//!
//! POST /api/chat         : batch turn, returns the final text.
//! POST /api/chat/stream  : SSE of text deltas and tool activity.
//! GET  /api/chat/history : cursor-paginated history for the PWA.
//!
//! Ordering contract: the user message is persisted BEFORE the LLM call
//! so re-entrant requests see it; the assistant reply is persisted after
//! generation, and on a streaming disconnect whatever was generated is
//! still written because the turn is driven on its own task.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::DateTime;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::warn;
use uuid::Uuid;
use valet_core::types::ImageAttachment;
use valet_agent::{TurnContext, TurnEvent};

use crate::app::AppState;
use crate::http::{check_auth, current_user};

const CHANNEL: &str = "pwa";

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub image: Option<ImageAttachment>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub message_id: String,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ApiError>);

fn err(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
}

/// Validate the request and persist the incoming user message. Shared by
/// the batch and streaming paths. Returns the assembled turn context.
fn begin_turn(
    state: &AppState,
    user_id: &str,
    req: &ChatRequest,
) -> Result<TurnContext, HandlerError> {
    if req.message.trim().is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "message cannot be empty"));
    }
    // Image validation happens before anything is stored or sent.
    if let Some(image) = &req.image {
        image
            .validate()
            .map_err(|reason| err(StatusCode::BAD_REQUEST, reason))?;
    }

    state
        .users
        .ensure(user_id)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let user = state
        .users
        .get(user_id)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| err(StatusCode::INTERNAL_SERVER_ERROR, "user row missing"))?;

    let ctx = valet_memory::load_user_context(&state.users, &state.facts, &state.history, user_id)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    // Save the user message first so it's visible to subsequent requests
    // even if this turn is interrupted.
    let (content, metadata) = match &req.image {
        Some(image) => (
            format!("[Image attached: {}]\n{}", image.media_type, req.message),
            json!({ "has_image": true, "image_media_type": image.media_type }),
        ),
        None => (req.message.clone(), json!({})),
    };
    state
        .history
        .append(user_id, CHANNEL, "user", &content, Some(&metadata), None)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(TurnContext {
        system_prompt: ctx.system_prompt,
        user_message: req.message.clone(),
        image: req.image.clone(),
        history: ctx.history,
        tools: state.registry.for_user(&user),
        store: Some(state.store.clone()),
        user_id: Some(user_id.to_string()),
        channel: Some(CHANNEL.to_string()),
    })
}

/// Persist the assistant reply and kick off background fact extraction.
fn finish_turn(state: &Arc<AppState>, user_id: &str, req_message: &str, response: &str, message_id: &str) {
    if response.is_empty() {
        return;
    }
    let meta = json!({ "message_id": message_id });
    if let Err(e) = state
        .history
        .append(user_id, CHANNEL, "assistant", response, Some(&meta), None)
    {
        warn!(user_id, error = %e, "failed to save assistant response");
    }

    // Fire-and-forget: extraction must never block the response.
    let llm = state.llm.clone();
    let facts = state.facts.clone();
    let model = state.config.llm.extraction_model.clone();
    let user_id = user_id.to_string();
    let user_message = req_message.to_string();
    let assistant_response = response.to_string();
    tokio::spawn(async move {
        valet_agent::extract::extract_and_store_facts(
            llm,
            &model,
            &facts,
            &user_id,
            &user_message,
            &assistant_response,
        )
        .await;
    });
}

/// POST /api/chat, the batch chat turn.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, HandlerError> {
    if !check_auth(&state, &headers) {
        return Err(err(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    let user_id = current_user(&headers);
    let ctx = begin_turn(&state, &user_id, &req)?;

    let response = state.orchestrator.chat(ctx).await.map_err(|e| {
        warn!(user_id, error = %e, "chat turn failed");
        err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let message_id = Uuid::new_v4().to_string();
    finish_turn(&state, &user_id, &req.message, &response, &message_id);

    Ok(Json(ChatResponse {
        response,
        message_id,
    }))
}

/// POST /api/chat/stream, the SSE stream of the turn.
///
/// Wire format:
///   data: {"type":"text_delta","delta":"Hello"}
///   data: {"type":"tool_start","tool":"weather"}
///   data: {"type":"tool_end","tool":"weather"}
///   data: {"type":"done","message_id":"<uuid>"}
///   data: [DONE]
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HandlerError> {
    if !check_auth(&state, &headers) {
        return Err(err(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    let user_id = current_user(&headers);
    let ctx = begin_turn(&state, &user_id, &req)?;
    let message_id = Uuid::new_v4().to_string();

    let (out_tx, out_rx) = mpsc::channel::<String>(64);

    // The turn runs on its own task: a client disconnect only drops the
    // SSE receiver, generation continues and the reply is still saved.
    let worker_state = state.clone();
    let req_message = req.message.clone();
    let worker_message_id = message_id.clone();
    tokio::spawn(async move {
        let (etx, mut erx) = mpsc::channel::<TurnEvent>(64);
        let orchestrator = worker_state.orchestrator.clone();
        let turn = tokio::spawn(async move { orchestrator.chat_events(ctx, etx).await });

        let mut full_response = String::new();
        while let Some(event) = erx.recv().await {
            let payload = match &event {
                TurnEvent::TextDelta { delta } => {
                    full_response.push_str(delta);
                    json!({ "type": "text_delta", "delta": delta })
                }
                TurnEvent::ToolStart { tool } => json!({ "type": "tool_start", "tool": tool }),
                TurnEvent::ToolEnd { tool } => json!({ "type": "tool_end", "tool": tool }),
            };
            let _ = out_tx.send(payload.to_string()).await;
        }

        match turn.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id = %user_id, error = %e, "streaming turn failed"),
            Err(e) => warn!(user_id = %user_id, error = %e, "streaming turn panicked"),
        }

        // Persist whatever was generated, disconnect or not.
        finish_turn(
            &worker_state,
            &user_id,
            &req_message,
            &full_response,
            &worker_message_id,
        );

        let _ = out_tx
            .send(json!({ "type": "done", "message_id": worker_message_id }).to_string())
            .await;
        let _ = out_tx.send("[DONE]".to_string()).await;
    });

    let stream = ReceiverStream::new(out_rx).map(|data| Ok(Event::default().data(data)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    /// 'voice' | 'text' for the PWA renderer.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<HistoryMessage>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// GET /api/chat/history, paginated newest first.
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ChatHistoryResponse>, HandlerError> {
    if !check_auth(&state, &headers) {
        return Err(err(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    let user_id = current_user(&headers);

    let before = match query.before.as_deref() {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|_| err(StatusCode::BAD_REQUEST, "invalid 'before' cursor"))?
                .to_utc(),
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 100);

    let (messages, has_more) = state
        .history
        .page(&user_id, before, limit)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let messages = messages
        .into_iter()
        .map(|m| HistoryMessage {
            id: m.id.to_string(),
            role: m.role,
            kind: if m.channel == "voice" { "voice" } else { "text" }.to_string(),
            content: m.content,
            timestamp: m.created_at,
        })
        .collect();

    Ok(Json(ChatHistoryResponse { messages, has_more }))
}

/// DELETE /api/chat/history, clears the caller's history.
pub async fn clear_history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, HandlerError> {
    if !check_auth(&state, &headers) {
        return Err(err(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    let user_id = current_user(&headers);
    state
        .history
        .clear(&user_id)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
