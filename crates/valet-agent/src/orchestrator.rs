//! The multi-turn tool-use loop behind every user-facing interaction.
//!
//! Three modes share one round structure: send {system, tools, messages},
//! execute any requested tools, append results, repeat until the model
//! stops asking (or the round bound hits). Batch mode returns the final
//! text; the token stream yields deltas for TTS; the event stream tags
//! tool activity for the live UI.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use valet_core::types::ImageAttachment;
use valet_store::Store;

use crate::anthropic::{MessagesApi, MessagesRequest, MessagesResponse, ToolUseBlock};
use crate::audit::execute_and_log_tool;
use crate::error::{AgentError, Result};
use crate::stream::StreamEvent;
use crate::tools::ToolRegistry;

/// Returned verbatim when the round bound is exhausted.
pub const APOLOGY: &str =
    "I'm sorry, I wasn't able to complete that request. Could you try again?";

/// Spoken filler while a provider-hosted tool runs, so the TTS pipeline
/// has something to say instead of dead air. Emitted on every
/// server_tool_use start, back-to-back ones included.
const SERVER_TOOL_LEAD_IN: &str = "Let me look that up. ";

/// Stop reason meaning the provider paused to run a server-side tool and
/// wants the partial response echoed back.
const PAUSE_TURN: &str = "pause_turn";

/// Structured events for the event-stream mode.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    TextDelta { delta: String },
    ToolStart { tool: String },
    ToolEnd { tool: String },
}

/// Everything one turn needs. Owned so a turn can be driven to completion
/// on a spawned task even after the HTTP client disconnects.
pub struct TurnContext {
    pub system_prompt: String,
    pub user_message: String,
    pub image: Option<ImageAttachment>,
    /// Prior (role, content) pairs, oldest first.
    pub history: Vec<(String, String)>,
    /// The authorized tool subset for this user.
    pub tools: ToolRegistry,
    pub store: Option<Store>,
    pub user_id: Option<String>,
    pub channel: Option<String>,
}

pub struct Orchestrator {
    client: Arc<dyn MessagesApi>,
    model: String,
    max_tokens: u32,
    max_tool_rounds: usize,
    web_search_max_uses: Option<u32>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn MessagesApi>,
        model: String,
        max_tokens: u32,
        max_tool_rounds: usize,
        web_search_max_uses: Option<u32>,
    ) -> Self {
        Self {
            client,
            model,
            max_tokens,
            max_tool_rounds,
            web_search_max_uses,
        }
    }

    fn request(&self, ctx: &TurnContext, messages: Vec<serde_json::Value>) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: ctx.system_prompt.clone(),
            tools: ctx.tools.to_definitions(self.web_search_max_uses),
            messages,
        }
    }

    /// Batch mode: run the full loop, return the final text.
    pub async fn chat(&self, ctx: TurnContext) -> Result<String> {
        let mut messages = build_messages(&ctx.history, &ctx.user_message, ctx.image.as_ref())?;

        for round in 0..self.max_tool_rounds {
            let response = self.client.send(&self.request(&ctx, messages.clone())).await?;
            let tool_blocks = response.tool_use_blocks();

            if tool_blocks.is_empty() && response.stop_reason.as_deref() == Some(PAUSE_TURN) {
                info!(round, "server-side tool pause, continuing");
                push_assistant(&mut messages, &response);
                continue;
            }
            if tool_blocks.is_empty() {
                return Ok(response.joined_text());
            }

            info!(round, tools = ?tool_names(&tool_blocks), "tool use round");
            push_assistant(&mut messages, &response);
            let results = self.execute_round(&tool_blocks, &ctx, None).await;
            push_tool_results(&mut messages, results);
        }

        warn!(max_rounds = self.max_tool_rounds, "exhausted tool rounds");
        Ok(APOLOGY.to_string())
    }

    /// Token-stream mode: text deltas for incremental TTS, with a spoken
    /// lead-in whenever a server-side tool starts.
    pub async fn chat_stream(&self, ctx: TurnContext, tx: mpsc::Sender<String>) -> Result<()> {
        let mut messages = build_messages(&ctx.history, &ctx.user_message, ctx.image.as_ref())?;

        for round in 0..self.max_tool_rounds {
            let (etx, mut erx) = mpsc::channel(64);
            let client = self.client.clone();
            let req = self.request(&ctx, messages.clone());
            let handle = tokio::spawn(async move { client.send_stream(req, etx).await });

            while let Some(event) = erx.recv().await {
                match event {
                    StreamEvent::BlockStart { block_type, .. }
                        if block_type == "server_tool_use" =>
                    {
                        let _ = tx.send(SERVER_TOOL_LEAD_IN.to_string()).await;
                    }
                    StreamEvent::TextDelta { text } => {
                        let _ = tx.send(text).await;
                    }
                    _ => {}
                }
            }
            let response = handle
                .await
                .map_err(|e| AgentError::Internal(e.to_string()))??;

            let tool_blocks = response.tool_use_blocks();
            if tool_blocks.is_empty() && response.stop_reason.as_deref() == Some(PAUSE_TURN) {
                info!(round, "server-side tool pause in token stream");
                push_assistant(&mut messages, &response);
                continue;
            }
            if tool_blocks.is_empty() {
                return Ok(());
            }

            info!(round, tools = ?tool_names(&tool_blocks), "streaming tool use round");
            push_assistant(&mut messages, &response);
            let results = self.execute_round(&tool_blocks, &ctx, None).await;
            push_tool_results(&mut messages, results);
        }

        warn!(max_rounds = self.max_tool_rounds, "exhausted streaming tool rounds");
        let _ = tx.send(APOLOGY.to_string()).await;
        Ok(())
    }

    /// Event-stream mode: tagged events around text and tool activity,
    /// covering both custom tools and provider-hosted ones.
    pub async fn chat_events(&self, ctx: TurnContext, tx: mpsc::Sender<TurnEvent>) -> Result<()> {
        let mut messages = build_messages(&ctx.history, &ctx.user_message, ctx.image.as_ref())?;

        for round in 0..self.max_tool_rounds {
            let (etx, mut erx) = mpsc::channel(64);
            let client = self.client.clone();
            let req = self.request(&ctx, messages.clone());
            let handle = tokio::spawn(async move { client.send_stream(req, etx).await });

            let mut server_tool_active = false;
            while let Some(event) = erx.recv().await {
                match event {
                    StreamEvent::BlockStart { block_type, name } => {
                        if block_type == "server_tool_use" {
                            server_tool_active = true;
                            let _ = tx
                                .send(TurnEvent::ToolStart {
                                    tool: name.unwrap_or_else(|| "web_search".into()),
                                })
                                .await;
                        } else if block_type == "web_search_tool_result" && server_tool_active {
                            server_tool_active = false;
                            let _ = tx
                                .send(TurnEvent::ToolEnd {
                                    tool: "web_search".into(),
                                })
                                .await;
                        }
                    }
                    StreamEvent::TextDelta { text } => {
                        let _ = tx.send(TurnEvent::TextDelta { delta: text }).await;
                    }
                    _ => {}
                }
            }
            // Close the indicator if the stream ended mid-search.
            if server_tool_active {
                let _ = tx
                    .send(TurnEvent::ToolEnd {
                        tool: "web_search".into(),
                    })
                    .await;
            }

            let response = handle
                .await
                .map_err(|e| AgentError::Internal(e.to_string()))??;

            let tool_blocks = response.tool_use_blocks();
            if tool_blocks.is_empty() && response.stop_reason.as_deref() == Some(PAUSE_TURN) {
                info!(round, "server-side tool pause in event stream");
                push_assistant(&mut messages, &response);
                continue;
            }
            if tool_blocks.is_empty() {
                return Ok(());
            }

            info!(round, tools = ?tool_names(&tool_blocks), "event-stream tool use round");
            push_assistant(&mut messages, &response);
            let results = self.execute_round(&tool_blocks, &ctx, Some(&tx)).await;
            push_tool_results(&mut messages, results);
        }

        warn!(max_rounds = self.max_tool_rounds, "exhausted event-stream tool rounds");
        let _ = tx
            .send(TurnEvent::TextDelta {
                delta: APOLOGY.to_string(),
            })
            .await;
        Ok(())
    }

    /// Execute one round's custom tool calls sequentially (result order
    /// must be deterministic for the LLM) and build the tool_result
    /// blocks. In event mode, lifecycle events bracket each call.
    async fn execute_round(
        &self,
        blocks: &[ToolUseBlock],
        ctx: &TurnContext,
        events: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Vec<serde_json::Value> {
        let mut results = Vec::with_capacity(blocks.len());
        for block in blocks {
            if let Some(tx) = events {
                let _ = tx
                    .send(TurnEvent::ToolStart {
                        tool: block.name.clone(),
                    })
                    .await;
            }
            let result = execute_and_log_tool(
                &block.name,
                block.input.clone(),
                &ctx.tools,
                ctx.store.as_ref(),
                ctx.user_id.as_deref(),
                ctx.channel.as_deref(),
            )
            .await;
            if let Some(tx) = events {
                let _ = tx
                    .send(TurnEvent::ToolEnd {
                        tool: block.name.clone(),
                    })
                    .await;
            }
            results.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": block.id,
                "content": result,
            }));
        }
        results
    }
}

/// Build the messages array: history trimmed to start on a user turn,
/// then the new user message, merged into a trailing user message when
/// the previous assistant reply is missing (the API requires strict
/// user/assistant alternation). The image, validated first, attaches to
/// the first user content of the new turn.
pub fn build_messages(
    history: &[(String, String)],
    user_message: &str,
    image: Option<&ImageAttachment>,
) -> Result<Vec<serde_json::Value>> {
    if let Some(img) = image {
        img.validate().map_err(AgentError::Validation)?;
    }

    let mut messages: Vec<serde_json::Value> = Vec::new();
    let mut started = false;
    for (role, content) in history {
        // Skip leading assistant messages: the first message must have
        // role user (this happens when the user's oldest message aged
        // out of the history window).
        if !started {
            if role != "user" {
                continue;
            }
            started = true;
        }
        messages.push(serde_json::json!({ "role": role, "content": content }));
    }

    let ends_with_user = messages
        .last()
        .map(|m| m["role"] == "user")
        .unwrap_or(false);

    if ends_with_user {
        // Merge rather than append to avoid consecutive user messages.
        let last = messages.last_mut().expect("non-empty");
        let existing = last["content"].as_str().unwrap_or_default();
        let combined = format!("{existing}\n\n{user_message}");
        last["content"] = new_turn_content(&combined, image);
    } else {
        messages.push(serde_json::json!({
            "role": "user",
            "content": new_turn_content(user_message, image),
        }));
    }

    Ok(messages)
}

fn new_turn_content(text: &str, image: Option<&ImageAttachment>) -> serde_json::Value {
    match image {
        Some(img) => serde_json::json!([
            {
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": img.media_type,
                    "data": img.data,
                },
            },
            { "type": "text", "text": text },
        ]),
        None => serde_json::json!(text),
    }
}

fn push_assistant(messages: &mut Vec<serde_json::Value>, response: &MessagesResponse) {
    messages.push(serde_json::json!({
        "role": "assistant",
        "content": response.content,
    }));
}

fn push_tool_results(messages: &mut Vec<serde_json::Value>, results: Vec<serde_json::Value>) {
    messages.push(serde_json::json!({ "role": "user", "content": results }));
}

fn tool_names(blocks: &[ToolUseBlock]) -> Vec<&str> {
    blocks.iter().map(|b| b.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use valet_core::types::MAX_IMAGE_BASE64_LEN;

    // ── scripted LLM ─────────────────────────────────────────────────────

    struct ScriptedApi {
        responses: Mutex<VecDeque<MessagesResponse>>,
        requests: Mutex<Vec<MessagesRequest>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<MessagesResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_messages(&self, call: usize) -> Vec<serde_json::Value> {
            self.requests.lock().unwrap()[call].messages.clone()
        }
    }

    #[async_trait]
    impl MessagesApi for ScriptedApi {
        async fn send(&self, req: &MessagesRequest) -> Result<MessagesResponse> {
            self.requests.lock().unwrap().push(req.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Internal("script exhausted".into()))
        }
    }

    fn text_response(text: &str) -> MessagesResponse {
        MessagesResponse {
            content: vec![serde_json::json!({"type": "text", "text": text})],
            stop_reason: Some("end_turn".into()),
        }
    }

    fn tool_response(text: &str, id: &str, name: &str, input: serde_json::Value) -> MessagesResponse {
        MessagesResponse {
            content: vec![
                serde_json::json!({"type": "text", "text": text}),
                serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input}),
            ],
            stop_reason: Some("tool_use".into()),
        }
    }

    struct WeatherTool;

    #[async_trait]
    impl Tool for WeatherTool {
        fn name(&self) -> &str {
            "weather"
        }
        fn description(&self) -> &str {
            "current weather"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"location": {"type": "string"}}})
        }
        async fn execute(&self, input: serde_json::Value) -> ToolResult {
            Ok(format!(
                "Sunny in {}",
                input["location"].as_str().unwrap_or("?")
            ))
        }
    }

    fn ctx(tools: ToolRegistry, history: Vec<(String, String)>, message: &str) -> TurnContext {
        TurnContext {
            system_prompt: "You are Valet.".into(),
            user_message: message.into(),
            image: None,
            history,
            tools,
            store: None,
            user_id: Some("ron".into()),
            channel: Some("pwa".into()),
        }
    }

    fn orchestrator(api: Arc<ScriptedApi>, rounds: usize) -> Orchestrator {
        Orchestrator::new(api, "test-model".into(), 1024, rounds, None)
    }

    // ── message assembly ─────────────────────────────────────────────────

    #[test]
    fn empty_history_yields_one_user_message() {
        let messages = build_messages(&[], "Hello", None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Hello");
    }

    #[test]
    fn leading_assistant_messages_are_stripped() {
        let history = vec![
            ("assistant".to_string(), "orphaned reply".to_string()),
            ("user".to_string(), "earlier question".to_string()),
            ("assistant".to_string(), "earlier answer".to_string()),
        ];
        let messages = build_messages(&history, "new question", None).unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "earlier question");
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn trailing_user_message_is_merged_not_appended() {
        let history = vec![("user".to_string(), "are you there?".to_string())];
        let messages = build_messages(&history, "hello?", None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "are you there?\n\nhello?");
    }

    #[test]
    fn roles_alternate_after_assembly() {
        let history = vec![
            ("user".to_string(), "q1".to_string()),
            ("assistant".to_string(), "a1".to_string()),
            ("user".to_string(), "q2".to_string()),
            ("assistant".to_string(), "a2".to_string()),
        ];
        let messages = build_messages(&history, "q3", None).unwrap();
        assert_eq!(messages[0]["role"], "user");
        for pair in messages.windows(2) {
            assert_ne!(pair[0]["role"], pair[1]["role"]);
        }
    }

    #[test]
    fn image_attaches_to_the_new_turn_only() {
        let history = vec![
            ("user".to_string(), "q1".to_string()),
            ("assistant".to_string(), "a1".to_string()),
        ];
        let image = ImageAttachment {
            data: "aGVsbG8=".into(),
            media_type: "image/png".into(),
        };
        let messages = build_messages(&history, "what is this?", Some(&image)).unwrap();
        assert!(messages[0]["content"].is_string());
        let content = &messages[2]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/png");
        assert_eq!(content[1]["text"], "what is this?");
    }

    #[test]
    fn oversized_image_fails_before_assembly() {
        let image = ImageAttachment {
            data: "a".repeat(MAX_IMAGE_BASE64_LEN + 1),
            media_type: "image/png".into(),
        };
        let err = build_messages(&[], "look", Some(&image)).unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    // ── the loop ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn simple_turn_returns_the_text() {
        let api = ScriptedApi::new(vec![text_response("Hello there.")]);
        let orch = orchestrator(api.clone(), 5);
        let out = orch.chat(ctx(ToolRegistry::new(), vec![], "Hello")).await.unwrap();
        assert_eq!(out, "Hello there.");
        assert_eq!(api.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_image_never_reaches_the_llm() {
        let api = ScriptedApi::new(vec![text_response("unreachable")]);
        let orch = orchestrator(api.clone(), 5);
        let mut c = ctx(ToolRegistry::new(), vec![], "look at this");
        c.image = Some(ImageAttachment {
            data: "a".repeat(MAX_IMAGE_BASE64_LEN + 1),
            media_type: "image/png".into(),
        });
        assert!(orch.chat(c).await.is_err());
        assert!(api.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_response_terminates_with_an_empty_string() {
        let api = ScriptedApi::new(vec![MessagesResponse {
            content: vec![],
            stop_reason: Some("end_turn".into()),
        }]);
        let orch = orchestrator(api, 5);
        let out = orch.chat(ctx(ToolRegistry::new(), vec![], "hm")).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back_to_the_llm() {
        let api = ScriptedApi::new(vec![
            tool_response(
                "Checking the weather.",
                "tu_1",
                "weather",
                serde_json::json!({"location": "London"}),
            ),
            text_response("It's sunny in London."),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool));
        let orch = orchestrator(api.clone(), 5);

        let out = orch
            .chat(ctx(tools, vec![], "What's the weather?"))
            .await
            .unwrap();
        assert_eq!(out, "It's sunny in London.");

        // Second request: user, assistant (with tool_use), tool results.
        let second = api.request_messages(1);
        assert_eq!(second.len(), 3);
        assert_eq!(second[1]["role"], "assistant");
        assert_eq!(second[1]["content"][1]["type"], "tool_use");
        assert_eq!(second[2]["role"], "user");
        let result_block = &second[2]["content"][0];
        assert_eq!(result_block["type"], "tool_result");
        assert_eq!(result_block["tool_use_id"], "tu_1");
        assert_eq!(result_block["content"], "Sunny in London");
    }

    #[tokio::test]
    async fn unknown_tool_result_flows_back_instead_of_aborting() {
        let api = ScriptedApi::new(vec![
            tool_response("Trying.", "tu_1", "nonexistent", serde_json::json!({})),
            text_response("I couldn't do that."),
        ]);
        let orch = orchestrator(api.clone(), 5);
        let out = orch.chat(ctx(ToolRegistry::new(), vec![], "go")).await.unwrap();
        assert_eq!(out, "I couldn't do that.");
        let second = api.request_messages(1);
        assert_eq!(second[2]["content"][0]["content"], "Unknown tool: nonexistent");
    }

    #[tokio::test]
    async fn pause_turn_echoes_the_partial_response_and_continues() {
        let paused = MessagesResponse {
            content: vec![
                serde_json::json!({"type": "text", "text": "Searching."}),
                serde_json::json!({"type": "server_tool_use", "id": "st_1", "name": "web_search", "input": {}}),
            ],
            stop_reason: Some("pause_turn".into()),
        };
        let api = ScriptedApi::new(vec![paused, text_response("Found it.")]);
        let orch = orchestrator(api.clone(), 5);
        let out = orch.chat(ctx(ToolRegistry::new(), vec![], "search")).await.unwrap();
        assert_eq!(out, "Found it.");
        let second = api.request_messages(1);
        assert_eq!(second[1]["role"], "assistant");
        assert_eq!(second[1]["content"][1]["type"], "server_tool_use");
    }

    #[tokio::test]
    async fn exhausted_rounds_return_the_apology() {
        let always_tools = || {
            tool_response("again", "tu_x", "weather", serde_json::json!({"location": "X"}))
        };
        let api = ScriptedApi::new(vec![always_tools(), always_tools()]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool));
        let orch = orchestrator(api, 2);
        let out = orch.chat(ctx(tools, vec![], "loop forever")).await.unwrap();
        assert_eq!(out, APOLOGY);
    }

    // ── streaming modes ──────────────────────────────────────────────────

    #[tokio::test]
    async fn token_stream_yields_text_deltas() {
        let api = ScriptedApi::new(vec![text_response("Hello from the stream.")]);
        let orch = orchestrator(api, 5);
        let (tx, mut rx) = mpsc::channel(16);
        orch.chat_stream(ctx(ToolRegistry::new(), vec![], "hi"), tx)
            .await
            .unwrap();
        let mut collected = String::new();
        while let Some(chunk) = rx.recv().await {
            collected.push_str(&chunk);
        }
        assert_eq!(collected, "Hello from the stream.");
    }

    #[tokio::test]
    async fn event_stream_brackets_custom_tool_calls() {
        let api = ScriptedApi::new(vec![
            tool_response(
                "Let me check.",
                "tu_1",
                "weather",
                serde_json::json!({"location": "Paris"}),
            ),
            text_response("Rainy in Paris."),
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool));
        let orch = orchestrator(api, 5);

        let (tx, mut rx) = mpsc::channel(32);
        orch.chat_events(ctx(tools, vec![], "weather in paris?"), tx)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }

        let start = events.iter().position(|e| {
            matches!(e, TurnEvent::ToolStart { tool } if tool == "weather")
        });
        let end = events.iter().position(|e| {
            matches!(e, TurnEvent::ToolEnd { tool } if tool == "weather")
        });
        assert!(start.unwrap() < end.unwrap());
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert!(text.contains("Rainy in Paris."));
    }

    #[tokio::test]
    async fn event_stream_apologises_when_rounds_run_out() {
        let api = ScriptedApi::new(vec![tool_response(
            "again",
            "tu_x",
            "weather",
            serde_json::json!({"location": "X"}),
        )]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(WeatherTool));
        let orch = orchestrator(api, 1);

        let (tx, mut rx) = mpsc::channel(32);
        orch.chat_events(ctx(tools, vec![], "go"), tx).await.unwrap();
        let mut last_text = String::new();
        while let Some(ev) = rx.recv().await {
            if let TurnEvent::TextDelta { delta } = ev {
                last_text = delta;
            }
        }
        assert_eq!(last_text, APOLOGY);
    }
}
