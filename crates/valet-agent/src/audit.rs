//! Tool usage audit logging.
//!
//! Records every tool execution for debugging and observability. Logging
//! failures are swallowed: they must never break the user's conversation.

use std::time::Instant;

use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{error, info, warn};
use valet_store::Store;

use crate::tools::ToolRegistry;

const MAX_RESULT_BYTES: usize = 500;

/// Initialise the audit table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tool_usage (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id        TEXT,
            tool_name      TEXT NOT NULL,
            parameters     TEXT NOT NULL DEFAULT '{}',
            result_summary TEXT,
            error          TEXT,
            duration_ms    INTEGER NOT NULL DEFAULT 0,
            channel        TEXT,
            created_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_usage_created
            ON tool_usage(created_at);",
    )
}

/// Execute a tool and record the outcome.
///
/// Single entry point for all tool execution across the batch, token
/// stream, and event stream modes. Handles the unknown-tool case, pins
/// `user_id` in the input to the authenticated user, times the call, and
/// serializes failures to strings the LLM can read and recover from.
pub async fn execute_and_log_tool(
    tool_name: &str,
    mut tool_input: serde_json::Value,
    tools: &ToolRegistry,
    store: Option<&Store>,
    user_id: Option<&str>,
    channel: Option<&str>,
) -> String {
    let Some(tool) = tools.get(tool_name) else {
        let result = format!("Unknown tool: {tool_name}");
        log_usage(
            store, user_id, tool_name, &tool_input,
            &result, Some(&result), 0, channel,
        );
        return result;
    };

    // Pin user_id to the authenticated user so the LLM can't act on
    // behalf of someone it guessed.
    if let (Some(uid), Some(obj)) = (user_id, tool_input.as_object_mut()) {
        if obj.contains_key("user_id") {
            obj.insert("user_id".to_string(), serde_json::json!(uid));
        }
    }

    let start = Instant::now();
    let (result, error_msg) = match tool.execute(tool_input.clone()).await {
        Ok(r) => (r, None),
        Err(e) => {
            error!(tool = tool_name, error = %e, "tool execution failed");
            (
                format!("Error executing {tool_name}: {e}"),
                Some(format!("{}: {}", e.kind(), e)),
            )
        }
    };
    let duration_ms = start.elapsed().as_millis() as i64;

    log_usage(
        store,
        user_id,
        tool_name,
        &tool_input,
        truncate_bytes(&result, MAX_RESULT_BYTES),
        error_msg.as_deref(),
        duration_ms,
        channel,
    );

    result
}

/// Insert an audit row. Silent on failure.
#[allow(clippy::too_many_arguments)]
fn log_usage(
    store: Option<&Store>,
    user_id: Option<&str>,
    tool_name: &str,
    parameters: &serde_json::Value,
    result_summary: &str,
    error: Option<&str>,
    duration_ms: i64,
    channel: Option<&str>,
) {
    let Some(store) = store else {
        return;
    };
    let now = Utc::now().to_rfc3339();
    let insert = store.with(|c| {
        c.execute(
            "INSERT INTO tool_usage
                (user_id, tool_name, parameters, result_summary, error,
                 duration_ms, channel, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                tool_name,
                parameters.to_string(),
                result_summary,
                error,
                duration_ms,
                channel,
                now,
            ],
        )
    });
    if let Err(e) = insert {
        warn!(tool = tool_name, error = %e, "failed to log tool usage");
    }
}

/// Delete audit rows older than `retention_days`. Returns the count.
pub fn cleanup_tool_usage(store: &Store, retention_days: u32) -> Result<usize, valet_store::StoreError> {
    let cutoff = (Utc::now() - Duration::days(retention_days as i64)).to_rfc3339();
    let n = store.with(|c| {
        c.execute("DELETE FROM tool_usage WHERE created_at < ?1", [&cutoff])
    })?;
    if n > 0 {
        info!(count = n, retention_days, "cleaned up tool usage logs");
    }
    Ok(n)
}

/// Truncate on a UTF-8 boundary at or below `max` bytes.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
