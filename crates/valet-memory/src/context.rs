//! System-prompt assembly.
//!
//! Before each LLM call the caller loads the user's soul, learned facts,
//! and the recent cross-channel conversation window, then composes the
//! personalised system prompt from fixed layers in a fixed order.

use chrono::DateTime;
use valet_core::types::Soul;
use valet_users::UserStore;

use crate::error::Result;
use crate::facts::FactStore;
use crate::history::HistoryStore;
use crate::types::{ConversationMessage, Fact};

/// Facts injected into the prompt, highest confidence first.
const CONTEXT_FACT_LIMIT: usize = 20;
/// Recent-context window.
const CONTEXT_HISTORY_DAYS: i64 = 7;
const CONTEXT_HISTORY_LIMIT: usize = 20;
/// Message preview length inside the recent-context block.
const CONTENT_PREVIEW_CHARS: usize = 100;

/// Everything a personalised LLM call needs.
pub struct UserContext {
    pub system_prompt: String,
    pub user_name: String,
    pub butler_name: String,
    /// Recent (role, content) pairs, oldest first, for the messages array.
    pub history: Vec<(String, String)>,
}

/// Load all context for a personalised LLM call. Unknown users get the
/// default prompt so a brand-new id can still chat.
pub fn load_user_context(
    users: &UserStore,
    facts: &FactStore,
    history: &HistoryStore,
    user_id: &str,
) -> Result<UserContext> {
    let user = users.get(user_id)?;
    let (user_name, soul) = match &user {
        Some(u) => (u.name.clone(), u.soul.clone()),
        None => ("User".to_string(), Soul::default()),
    };

    let known_facts = facts.top_facts(user_id, CONTEXT_FACT_LIMIT)?;
    let recent = history.recent(user_id, CONTEXT_HISTORY_DAYS, CONTEXT_HISTORY_LIMIT)?;
    let llm_history = recent
        .iter()
        .map(|m| (m.role.clone(), m.content.clone()))
        .collect();

    Ok(UserContext {
        system_prompt: build_system_prompt(&user_name, &soul, &known_facts, &recent),
        user_name,
        butler_name: soul.butler_name().to_string(),
        history: llm_history,
    })
}

/// Human-readable label for a conversation channel. Unknown channels get
/// the generic `[via <channel>]` form.
pub fn channel_label(channel: &str) -> String {
    match channel {
        "voice" => "[via voice]".to_string(),
        "pwa" => "[via text]".to_string(),
        "whatsapp" => "[via whatsapp]".to_string(),
        "telegram" => "[via telegram]".to_string(),
        other => format!("[via {other}]"),
    }
}

/// Compose the system prompt from context layers.
pub fn build_system_prompt(
    user_name: &str,
    soul: &Soul,
    facts: &[Fact],
    history: &[ConversationMessage],
) -> String {
    let butler_name = soul.butler_name();
    let mut parts = vec![format!(
        "You are {butler_name}, a helpful AI home assistant. \
         You are speaking with {user_name}."
    )];

    // Personality: only the layers present in the soul record.
    let mut personality = Vec::new();
    if let Some(p) = &soul.personality {
        personality.push(format!("- Style: {p}"));
    }
    if let Some(f) = &soul.formality {
        personality.push(format!("- Formality: {f}"));
    }
    if let Some(v) = &soul.verbosity {
        personality.push(format!("- Verbosity: {v}"));
    }
    if let Some(h) = &soul.humor {
        personality.push(format!("- Humor: {h}"));
    }
    if let Some(ci) = &soul.custom_instructions {
        personality.push(format!("- Custom instructions: {ci}"));
    }
    if !personality.is_empty() {
        parts.push("\nPERSONALITY:".to_string());
        parts.extend(personality);
    }

    if !facts.is_empty() {
        parts.push(format!(
            "\nWHAT YOU KNOW ABOUT {}:",
            user_name.to_uppercase()
        ));
        for fact in facts {
            parts.push(format!("- [{}] {}", fact.category, fact.fact));
        }
    }

    if !history.is_empty() {
        parts.push("\nRECENT CONTEXT (last 7 days, across all channels):".to_string());
        for msg in history {
            let speaker = if msg.role == "assistant" {
                "You"
            } else {
                user_name
            };
            let day = DateTime::parse_from_rfc3339(&msg.created_at)
                .map(|t| t.format("%b %d").to_string())
                .unwrap_or_else(|_| msg.created_at.clone());
            let label = channel_label(&msg.channel);
            let content = truncate_chars(&msg.content, CONTENT_PREVIEW_CHARS);
            parts.push(format!("- {day} {label} ({speaker}): {content}"));
        }
    }

    parts.push("\nRULES:".to_string());
    parts.push("- Be concise in voice responses (1-2 sentences unless asked for detail)".to_string());
    parts.push("- Use remember_fact to store important information about the user".to_string());
    parts.push("- For home automation, confirm before executing destructive actions".to_string());

    parts.join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
