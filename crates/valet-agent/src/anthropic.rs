use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

const API_VERSION: &str = "2023-06-01";

/// A request to the Messages endpoint. `messages` and `tools` carry raw
/// JSON values: the tool loop builds structured content blocks
/// (tool_use, tool_result, image) that have no fixed shape.
#[derive(Debug, Clone)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub tools: Vec<serde_json::Value>,
    pub messages: Vec<serde_json::Value>,
}

/// A complete Messages response: raw content blocks plus the stop reason.
#[derive(Debug, Clone, Default)]
pub struct MessagesResponse {
    pub content: Vec<serde_json::Value>,
    pub stop_reason: Option<String>,
}

/// A custom tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl MessagesResponse {
    /// Custom tool_use blocks. Server-side blocks (`server_tool_use`) are
    /// executed by the provider and deliberately excluded here.
    pub fn tool_use_blocks(&self) -> Vec<ToolUseBlock> {
        self.content
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .map(|b| ToolUseBlock {
                id: b["id"].as_str().unwrap_or_default().to_string(),
                name: b["name"].as_str().unwrap_or_default().to_string(),
                input: b.get("input").cloned().unwrap_or(serde_json::json!({})),
            })
            .collect()
    }

    /// All text blocks joined with single spaces; empty when the model
    /// produced no text.
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();
        parts.join(" ")
    }
}

/// The slice of the Messages API the orchestrator needs. Concrete for
/// production ([`AnthropicClient`]); mockable for the tool-loop tests.
#[async_trait]
pub trait MessagesApi: Send + Sync {
    async fn send(&self, req: &MessagesRequest) -> Result<MessagesResponse>;

    /// Stream a response, forwarding events through `tx` while
    /// reconstructing the final message. Default: non-streaming send with
    /// a single text delta.
    async fn send_stream(
        &self,
        req: MessagesRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<MessagesResponse> {
        let resp = self.send(&req).await?;
        let text = resp.joined_text();
        if !text.is_empty() {
            let _ = tx.send(StreamEvent::TextDelta { text }).await;
        }
        Ok(resp)
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn build_body(req: &MessagesRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": req.model,
            "max_tokens": req.max_tokens,
            "system": req.system,
            "messages": req.messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools.clone());
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "Messages API error");
            return Err(AgentError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl MessagesApi for AnthropicClient {
    async fn send(&self, req: &MessagesRequest) -> Result<MessagesResponse> {
        debug!(model = %req.model, messages = req.messages.len(), "messages request");
        let resp = self.post(&Self::build_body(req, false)).await?;
        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        Ok(MessagesResponse {
            content: api.content,
            stop_reason: api.stop_reason,
        })
    }

    async fn send_stream(
        &self,
        req: MessagesRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<MessagesResponse> {
        debug!(model = %req.model, "streaming messages request");
        let resp = self.post(&Self::build_body(&req, true)).await?;
        Ok(process_stream(resp, tx).await)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<serde_json::Value>,
    stop_reason: Option<String>,
}

// ── SSE processing ───────────────────────────────────────────────────────

/// A content block being accumulated from start/delta events.
struct PendingBlock {
    block_type: String,
    /// The raw content_block from content_block_start; server-side result
    /// blocks arrive complete here and pass through unchanged.
    start: serde_json::Value,
    text: String,
    partial_json: String,
}

/// Consume the SSE byte stream, forwarding [`StreamEvent`]s and
/// reconstructing the full final message so the tool loop can append it
/// verbatim to the conversation.
async fn process_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
) -> MessagesResponse {
    use futures_util::StreamExt;

    let mut current_event = String::new();
    let mut pending: Option<PendingBlock> = None;
    let mut content: Vec<serde_json::Value> = Vec::new();
    let mut stop_reason: Option<String> = None;
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();
    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                break;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        // SSE arrives as newline-separated lines; keep the trailing
        // incomplete line buffered across chunks.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(parsed) = parse_sse_line(line) else {
                continue;
            };
            match parsed {
                SseParsed::Event(ev) => current_event = ev,
                SseParsed::Data(data) => {
                    handle_data(
                        &current_event,
                        &data,
                        &mut pending,
                        &mut content,
                        &mut stop_reason,
                        &tx,
                    )
                    .await;
                }
            }
        }
        line_buf = remainder;
    }

    // A stream cut mid-block still yields whatever accumulated.
    if let Some(block) = pending.take() {
        content.push(finalize_block(block));
    }

    MessagesResponse {
        content,
        stop_reason,
    }
}

async fn handle_data(
    event_type: &str,
    data: &str,
    pending: &mut Option<PendingBlock>,
    content: &mut Vec<serde_json::Value>,
    stop_reason: &mut Option<String>,
    tx: &mpsc::Sender<StreamEvent>,
) {
    match event_type {
        "content_block_start" => {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                return;
            };
            let block = value.get("content_block").cloned().unwrap_or_default();
            let block_type = block["type"].as_str().unwrap_or_default().to_string();
            let name = block["name"].as_str().map(String::from);
            *pending = Some(PendingBlock {
                block_type: block_type.clone(),
                start: block,
                text: String::new(),
                partial_json: String::new(),
            });
            let _ = tx.send(StreamEvent::BlockStart { block_type, name }).await;
        }

        "content_block_delta" => {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                return;
            };
            let delta = &value["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => {
                    if let Some(text) = delta["text"].as_str() {
                        if let Some(p) = pending.as_mut() {
                            p.text.push_str(text);
                        }
                        let _ = tx
                            .send(StreamEvent::TextDelta {
                                text: text.to_string(),
                            })
                            .await;
                    }
                }
                Some("input_json_delta") => {
                    if let (Some(partial), Some(p)) =
                        (delta["partial_json"].as_str(), pending.as_mut())
                    {
                        p.partial_json.push_str(partial);
                    }
                }
                _ => {}
            }
        }

        "content_block_stop" => {
            if let Some(block) = pending.take() {
                content.push(finalize_block(block));
            }
        }

        "message_delta" => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                if let Some(reason) = value["delta"]["stop_reason"].as_str() {
                    *stop_reason = Some(reason.to_string());
                }
            }
        }

        "error" => {
            warn!(data, "messages stream error");
            let _ = tx
                .send(StreamEvent::Error {
                    message: data.to_string(),
                })
                .await;
        }

        // message_start, message_stop, ping: nothing to do.
        _ => {}
    }
}

/// Turn an accumulated block back into its canonical JSON form.
fn finalize_block(block: PendingBlock) -> serde_json::Value {
    match block.block_type.as_str() {
        "text" => serde_json::json!({ "type": "text", "text": block.text }),
        "tool_use" | "server_tool_use" => {
            let mut value = block.start;
            if !block.partial_json.is_empty() {
                value["input"] = serde_json::from_str(&block.partial_json)
                    .unwrap_or(serde_json::json!({}));
            }
            value
        }
        // Server-side result blocks arrive complete in the start event.
        _ => block.start,
    }
}
