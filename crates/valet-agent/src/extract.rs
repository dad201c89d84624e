//! Background fact extraction.
//!
//! After each conversation turn a fast model distills durable personal
//! facts from the exchange. Spawned fire-and-forget; nothing here may
//! block or fail the user's response.

use std::sync::Arc;

use tracing::{debug, info, warn};
use valet_memory::types::{FactCategory, FactSource};
use valet_memory::FactStore;

use crate::anthropic::{MessagesApi, MessagesRequest};

/// Messages shorter than this ("hi", "thanks") rarely teach us anything.
const MIN_MESSAGE_LENGTH: usize = 20;
/// Only the head of the assistant response is analysed.
const MAX_RESPONSE_CHARS: usize = 2000;
/// Hard cap on stored fact text.
const MAX_FACT_CHARS: usize = 500;
const EXTRACTION_MAX_TOKENS: u32 = 512;

const EXTRACTION_PROMPT: &str = "\
Analyze this conversation and extract any personal facts about the user.

Only extract facts about the USER (their preferences, habits, relationships, \
schedule, health, work, etc.). Do NOT extract general knowledge or facts about \
the assistant.

Conversation:
User: {user_message}
Assistant: {assistant_response}

Return a JSON array of extracted facts. Each fact should have:
- \"fact\": A concise statement about the user (e.g., \"Prefers Italian food\")
- \"category\": One of: preference, schedule, relationship, work, health, other
- \"confidence\": A number between 0.5 and 0.9 (how confident this is a real fact)

Return an empty array [] if there is nothing personal to learn.

Respond with ONLY the JSON array, no other text.";

#[derive(Debug, PartialEq)]
pub struct ExtractedFact {
    pub fact: String,
    pub category: FactCategory,
    pub confidence: f64,
}

/// Extract facts from one turn and store them. Designed to run on a
/// spawned task; every failure path logs and returns.
pub async fn extract_and_store_facts(
    llm: Arc<dyn MessagesApi>,
    model: &str,
    facts: &FactStore,
    user_id: &str,
    user_message: &str,
    assistant_response: &str,
) {
    if user_message.len() < MIN_MESSAGE_LENGTH {
        return;
    }

    let truncated: String = assistant_response.chars().take(MAX_RESPONSE_CHARS).collect();
    let prompt = EXTRACTION_PROMPT
        .replace("{user_message}", user_message)
        .replace("{assistant_response}", &truncated);

    let req = MessagesRequest {
        model: model.to_string(),
        max_tokens: EXTRACTION_MAX_TOKENS,
        system: String::new(),
        tools: Vec::new(),
        messages: vec![serde_json::json!({ "role": "user", "content": prompt })],
    };

    let response = match llm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(user_id, error = %e, "fact extraction call failed");
            return;
        }
    };

    let extracted = validate_facts(&response.joined_text());
    if extracted.is_empty() {
        return;
    }

    let count = extracted.len();
    for item in extracted {
        let stored = facts
            .remember(
                user_id,
                &item.fact,
                item.category,
                item.confidence,
                FactSource::AutoExtraction,
            )
            .await;
        match stored {
            Ok(_) => debug!(user_id, fact = %item.fact, "auto-learned fact"),
            Err(e) => warn!(user_id, error = %e, "failed to store auto-extracted fact"),
        }
    }
    info!(user_id, count, "auto-extracted facts");
}

/// Parse and sanitize the model's JSON array. Anything malformed is
/// dropped; categories outside the closed set become `other`; confidence
/// is clamped to [0.5, 0.9]; fact text is capped.
pub fn validate_facts(text: &str) -> Vec<ExtractedFact> {
    let parsed: serde_json::Value = match serde_json::from_str(text.trim()) {
        Ok(v) => v,
        Err(_) => {
            let head: String = text.chars().take(200).collect();
            warn!(%head, "fact extraction output was not valid JSON");
            return Vec::new();
        }
    };
    let Some(items) = parsed.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let fact = item.get("fact")?.as_str()?;
            if fact.is_empty() {
                return None;
            }
            let category = item
                .get("category")
                .and_then(|c| c.as_str())
                .and_then(|c| c.parse().ok())
                .unwrap_or(FactCategory::Other);
            let confidence = item
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.7)
                .clamp(0.5, 0.9);
            Some(ExtractedFact {
                fact: fact.chars().take(MAX_FACT_CHARS).collect(),
                category,
                confidence,
            })
        })
        .collect()
}
