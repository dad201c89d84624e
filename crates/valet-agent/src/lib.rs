//! LLM orchestration: the Anthropic Messages client, the multi-turn
//! tool-use loop in its three streaming modalities, the tool registry with
//! audited dispatch, and the background fact extractor.

pub mod anthropic;
pub mod audit;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod stream;
pub mod tools;

pub use anthropic::{AnthropicClient, MessagesApi, MessagesRequest, MessagesResponse};
pub use error::AgentError;
pub use orchestrator::{Orchestrator, TurnContext, TurnEvent};
pub use tools::{Tool, ToolError, ToolRegistry};
