/// Events surfaced while an LLM response streams in.
///
/// The orchestrator only needs block boundaries and text: block starts
/// drive the server-side-tool UI events and the spoken lead-in, text
/// deltas drive incremental output. Everything else (input JSON deltas,
/// usage) stays inside the client, which reconstructs the final message.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A content block opened. `name` is set for tool_use and
    /// server_tool_use blocks.
    BlockStart {
        block_type: String,
        name: Option<String>,
    },

    /// Incremental text content.
    TextDelta { text: String },

    /// Error mid-stream; the stream ends after this.
    Error { message: String },
}

/// Parse a single SSE line from the Messages streaming API.
/// SSE format: `event: <type>\ndata: <json>\n\n`
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_split_into_event_and_data() {
        match parse_sse_line("event: content_block_delta") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "content_block_delta"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_sse_line(r#"data: {"type":"ping"}"#) {
            Some(SseParsed::Data(d)) => assert_eq!(d, r#"{"type":"ping"}"#),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(parse_sse_line(": comment").is_none());
    }
}
