//! The tool system the LLM calls into.
//!
//! A [`Tool`] is {name, description, JSON-schema parameters, execute}.
//! The registry maps unique names to implementations and filters them per
//! user; all invocation goes through `audit::execute_and_log_tool`, which
//! is the only place tool errors become strings.

pub mod health;
pub mod memory;
pub mod notify;
pub mod schedule;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use valet_core::types::Permission;
use valet_users::permissions::tool_visible;
use valet_users::User;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("HTTP {0}")]
    Http(u16),

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl ToolError {
    /// Short kind tag recorded in the audit log's error column.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Http(_) => "HttpError",
            ToolError::Timeout => "TimeoutError",
            ToolError::Transport(_) => "TransportError",
            ToolError::Database(_) => "DatabaseError",
            ToolError::InvalidInput(_) => "InvalidInput",
            ToolError::Other(_) => "ToolError",
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ToolError::Timeout
        } else if let Some(status) = e.status() {
            ToolError::Http(status.as_u16())
        } else {
            ToolError::Transport(e.to_string())
        }
    }
}

impl From<valet_store::StoreError> for ToolError {
    fn from(e: valet_store::StoreError) -> Self {
        ToolError::Database(e.to_string())
    }
}

impl From<valet_users::UserError> for ToolError {
    fn from(e: valet_users::UserError) -> Self {
        ToolError::Database(e.to_string())
    }
}

impl From<valet_memory::MemoryError> for ToolError {
    fn from(e: valet_memory::MemoryError) -> Self {
        ToolError::Database(e.to_string())
    }
}

pub type ToolResult = std::result::Result<String, ToolError>;

/// Trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "remember_fact").
    fn name(&self) -> &str;
    /// What the LLM reads when deciding whether to call this tool.
    fn description(&self) -> &str;
    /// JSON Schema for the input object.
    fn parameters(&self) -> serde_json::Value;
    /// Permission that unlocks this tool; None means everyone.
    fn required_permission(&self) -> Option<Permission> {
        None
    }
    /// Run the tool. The string result goes back to the LLM verbatim.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Name -> tool mapping. Built once at startup; `for_user` produces the
/// authorized subset for a request.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Tool>)> {
        self.tools.iter()
    }

    /// The subset of tools `user` may invoke.
    pub fn for_user(&self, user: &User) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(_, t)| tool_visible(user, t.required_permission()))
            .map(|(n, t)| (n.clone(), t.clone()))
            .collect();
        ToolRegistry { tools }
    }

    /// Convert to the Messages API tools array, appending the
    /// provider-hosted web search entry when enabled. Sorted by name so
    /// the array is deterministic across requests.
    pub fn to_definitions(&self, web_search_max_uses: Option<u32>) -> Vec<serde_json::Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        let mut defs: Vec<serde_json::Value> = names
            .into_iter()
            .map(|n| {
                let t = &self.tools[n];
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.parameters(),
                })
            })
            .collect();
        if let Some(max_uses) = web_search_max_uses {
            // Server-side tool: a `type` entry passed through unchanged,
            // executed by the provider rather than dispatched locally.
            defs.push(serde_json::json!({
                "type": "web_search_20250305",
                "name": "web_search",
                "max_uses": max_uses,
            }));
        }
        defs
    }
}

// ── input helpers ────────────────────────────────────────────────────────

pub(crate) fn str_arg<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn f64_arg(input: &serde_json::Value, key: &str) -> Option<f64> {
    input.get(key).and_then(|v| v.as_f64())
}

pub(crate) fn usize_arg(input: &serde_json::Value, key: &str) -> Option<usize> {
    input.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

pub(crate) fn i64_arg(input: &serde_json::Value, key: &str) -> Option<i64> {
    input.get(key).and_then(|v| v.as_i64())
}
