//! Memory tools: remember, recall, profile lookup, conversation review,
//! and soul updates. These are the tools every user gets.

use async_trait::async_trait;
use chrono::DateTime;
use valet_core::types::Soul;
use valet_memory::types::{FactCategory, FactSource};
use valet_memory::{FactStore, HistoryStore, Recall};
use valet_users::{UserError, UserStore};

use super::{str_arg, usize_arg, Tool, ToolError, ToolResult};

const CATEGORY_ENUM: &[&str] =
    &["preference", "schedule", "relationship", "work", "health", "other"];

pub struct RememberFactTool {
    facts: FactStore,
}

impl RememberFactTool {
    pub fn new(facts: FactStore) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for RememberFactTool {
    fn name(&self) -> &str {
        "remember_fact"
    }

    fn description(&self) -> &str {
        "Store a fact about the user for future reference. \
         Use this to remember preferences, important dates, relationships, \
         or any information that should persist across conversations."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "fact": {
                    "type": "string",
                    "description": "The fact to remember (e.g., 'Prefers to be called Bob')"
                },
                "category": {
                    "type": "string",
                    "description": "Category: preference, schedule, relationship, work, health, or other",
                    "enum": CATEGORY_ENUM
                },
                "confidence": {
                    "type": "number",
                    "description": "How confident are we? 1.0 = explicit statement, 0.5 = inferred",
                    "minimum": 0.0,
                    "maximum": 1.0
                }
            },
            "required": ["user_id", "fact"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;
        let fact = str_arg(&input, "fact")
            .ok_or_else(|| ToolError::InvalidInput("fact is required".into()))?;
        let category: FactCategory = str_arg(&input, "category")
            .and_then(|c| c.parse().ok())
            .unwrap_or(FactCategory::Other);
        let confidence = super::f64_arg(&input, "confidence").unwrap_or(1.0);

        self.facts
            .remember(user_id, fact, category, confidence, FactSource::Conversation)
            .await?;
        Ok(format!("Remembered: {fact}"))
    }
}

pub struct RecallFactsTool {
    facts: FactStore,
}

impl RecallFactsTool {
    pub fn new(facts: FactStore) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for RecallFactsTool {
    fn name(&self) -> &str {
        "recall_facts"
    }

    fn description(&self) -> &str {
        "Recall stored facts about a user. \
         Use this at the start of conversations to personalize responses, \
         or when you need to reference something you learned before. \
         Use the 'query' parameter to search semantically (e.g., 'food preferences')."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "query": {
                    "type": "string",
                    "description": "Natural language search query for semantic recall \
                                    (e.g., 'food preferences', 'work schedule'). \
                                    When provided, finds facts by meaning similarity."
                },
                "category": {
                    "type": "string",
                    "description": "Optional: filter by category",
                    "enum": CATEGORY_ENUM
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of facts to return (default: 20)",
                    "minimum": 1,
                    "maximum": 100
                }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;
        let query = str_arg(&input, "query");
        let category = str_arg(&input, "category").and_then(|c| c.parse().ok());
        let limit = usize_arg(&input, "limit").unwrap_or(20);

        match self.facts.recall(user_id, query, category, limit).await? {
            Recall::Semantic(ranked) => {
                if ranked.is_empty() {
                    return Ok(format!("No matching facts found for user {user_id}."));
                }
                let mut lines = vec![format!("Facts matching query for {user_id}:")];
                for (fact, distance) in ranked {
                    // Cosine distance to a relevance percentage.
                    let relevance = ((1.0 - distance) * 100.0).round().max(0.0);
                    lines.push(format!(
                        "  - [{}] {} (relevance: {relevance:.0}%)",
                        fact.category, fact.fact
                    ));
                }
                Ok(lines.join("\n"))
            }
            Recall::ByConfidence(facts) => {
                if facts.is_empty() {
                    return Ok(format!("No facts stored for user {user_id}."));
                }
                // Group by category, preserving the confidence ordering
                // inside each group.
                let mut grouped: Vec<(FactCategory, Vec<String>)> = Vec::new();
                for fact in facts {
                    match grouped.iter_mut().find(|(c, _)| *c == fact.category) {
                        Some((_, list)) => list.push(fact.fact),
                        None => grouped.push((fact.category, vec![fact.fact])),
                    }
                }
                let mut lines = vec![format!("Known facts about {user_id}:")];
                for (category, items) in grouped {
                    lines.push(format!("\n{}:", title_case(&category.to_string())));
                    for item in items {
                        lines.push(format!("  - {item}"));
                    }
                }
                Ok(lines.join("\n"))
            }
        }
    }
}

pub struct GetUserTool {
    users: UserStore,
}

impl GetUserTool {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Tool for GetUserTool {
    fn name(&self) -> &str {
        "get_user"
    }

    fn description(&self) -> &str {
        "Get the user's profile including their name and personality preferences. \
         The 'soul' field contains tone, verbosity, and other customization settings."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;

        let Some(user) = self.users.get(user_id)? else {
            return Ok(format!("User {user_id} not found. They may be new."));
        };

        let member_since = DateTime::parse_from_rfc3339(&user.created_at)
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| user.created_at.clone());

        let mut lines = vec![
            format!("User: {}", user.name),
            format!("ID: {}", user.id),
            format!("Member since: {member_since}"),
        ];

        let prefs = soul_entries(&user.soul);
        if !prefs.is_empty() {
            lines.push("Preferences:".to_string());
            for (key, value) in prefs {
                lines.push(format!("  - {key}: {value}"));
            }
        }
        Ok(lines.join("\n"))
    }
}

pub struct GetConversationsTool {
    history: HistoryStore,
}

impl GetConversationsTool {
    pub fn new(history: HistoryStore) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Tool for GetConversationsTool {
    fn name(&self) -> &str {
        "get_conversations"
    }

    fn description(&self) -> &str {
        "Retrieve recent conversation history for a user. \
         Use this at the start of conversations to recall what was discussed recently, \
         enabling continuity like 'Yesterday you asked about the Dune audiobook.'"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "days": {
                    "type": "integer",
                    "description": "Number of days to look back (default: 7)",
                    "minimum": 1,
                    "maximum": 90
                },
                "channel": {
                    "type": "string",
                    "description": "Filter by channel",
                    "enum": ["whatsapp", "telegram", "voice", "pwa"]
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to return (default: 20)",
                    "minimum": 1,
                    "maximum": 100
                }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;
        let days = super::i64_arg(&input, "days").unwrap_or(7);
        let channel = str_arg(&input, "channel");
        let limit = usize_arg(&input, "limit").unwrap_or(20);

        let mut messages = self.history.recent(user_id, days, limit)?;
        if let Some(ch) = channel {
            messages.retain(|m| m.channel == ch);
        }

        if messages.is_empty() {
            return Ok(format!(
                "No recent conversations found for user {user_id} in the last {days} days."
            ));
        }

        // Group chronologically by date for concise output.
        let mut lines = vec![format!(
            "Recent conversations for {user_id} (last {days} days):"
        )];
        let mut current_date = String::new();
        for msg in &messages {
            let (date, time) = match DateTime::parse_from_rfc3339(&msg.created_at) {
                Ok(t) => (
                    t.format("%Y-%m-%d").to_string(),
                    t.format("%H:%M").to_string(),
                ),
                Err(_) => (msg.created_at.clone(), String::new()),
            };
            if date != current_date {
                lines.push(format!("\n{date}:"));
                current_date = date;
            }
            let speaker = if msg.role == "assistant" { "You" } else { "User" };
            let mut content = msg.content.clone();
            if content.chars().count() > 120 {
                content = content.chars().take(117).collect::<String>() + "...";
            }
            let channel_tag = if channel.is_none() {
                format!(" [{}]", msg.channel)
            } else {
                String::new()
            };
            lines.push(format!("  {time} {speaker}{channel_tag}: {content}"));
        }
        Ok(lines.join("\n"))
    }
}

pub struct UpdateSoulTool {
    users: UserStore,
}

impl UpdateSoulTool {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Tool for UpdateSoulTool {
    fn name(&self) -> &str {
        "update_soul"
    }

    fn description(&self) -> &str {
        "Update a user's personality and communication preferences. \
         This merges new settings into the existing soul config without overwriting \
         unrelated keys. Use when a user expresses preferences like \
         'be more casual' or 'use less humor'."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "personality": {
                    "type": "string",
                    "description": "Overall personality style (e.g., 'warm and encouraging', 'dry and witty')"
                },
                "formality": {
                    "type": "string",
                    "description": "Communication formality level",
                    "enum": ["casual", "balanced", "formal"]
                },
                "verbosity": {
                    "type": "string",
                    "description": "Response length preference",
                    "enum": ["concise", "balanced", "detailed"]
                },
                "humor": {
                    "type": "string",
                    "description": "Humor level in responses",
                    "enum": ["none", "light", "moderate", "heavy"]
                },
                "custom_instructions": {
                    "type": "string",
                    "description": "Free-form instructions (e.g., 'Always greet me in Spanish')"
                }
            },
            "required": ["user_id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let user_id = str_arg(&input, "user_id")
            .ok_or_else(|| ToolError::InvalidInput("user_id is required".into()))?;

        // Only the allowlisted soul keys make it into the update; any
        // other key the model invents is silently ignored.
        let update = Soul {
            butler_name: None,
            personality: str_arg(&input, "personality").map(Into::into),
            formality: str_arg(&input, "formality").map(Into::into),
            verbosity: str_arg(&input, "verbosity").map(Into::into),
            humor: str_arg(&input, "humor").map(Into::into),
            custom_instructions: str_arg(&input, "custom_instructions").map(Into::into),
        };

        let mut updated_keys: Vec<&str> = Vec::new();
        if update.personality.is_some() {
            updated_keys.push("personality");
        }
        if update.formality.is_some() {
            updated_keys.push("formality");
        }
        if update.verbosity.is_some() {
            updated_keys.push("verbosity");
        }
        if update.humor.is_some() {
            updated_keys.push("humor");
        }
        if update.custom_instructions.is_some() {
            updated_keys.push("custom_instructions");
        }
        if updated_keys.is_empty() {
            return Ok(
                "No soul preferences provided. Specify at least one of: \
                 personality, formality, verbosity, humor, custom_instructions."
                    .to_string(),
            );
        }

        let merged = match self.users.update_soul(user_id, &update) {
            Ok(m) => m,
            Err(UserError::NotFound { .. }) => {
                return Ok(format!("User {user_id} not found. Create user profile first."));
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines = vec![format!(
            "Updated soul for {user_id} ({}):",
            updated_keys.join(", ")
        )];
        for (key, value) in soul_entries(&merged) {
            lines.push(format!("  - {key}: {value}"));
        }
        Ok(lines.join("\n"))
    }
}

fn soul_entries(soul: &Soul) -> Vec<(&'static str, &str)> {
    let mut entries = Vec::new();
    if let Some(v) = &soul.butler_name {
        entries.push(("butler_name", v.as_str()));
    }
    if let Some(v) = &soul.personality {
        entries.push(("personality", v.as_str()));
    }
    if let Some(v) = &soul.formality {
        entries.push(("formality", v.as_str()));
    }
    if let Some(v) = &soul.verbosity {
        entries.push(("verbosity", v.as_str()));
    }
    if let Some(v) = &soul.humor {
        entries.push(("humor", v.as_str()));
    }
    if let Some(v) = &soul.custom_instructions {
        entries.push(("custom_instructions", v.as_str()));
    }
    entries
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + chars.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valet_store::Store;

    fn fixtures() -> (UserStore, FactStore, HistoryStore) {
        let store = Store::open_in_memory().unwrap();
        let users = UserStore::new(store.clone()).unwrap();
        let facts = FactStore::new(store.clone(), users.clone(), None).unwrap();
        let history = HistoryStore::new(store).unwrap();
        (users, facts, history)
    }

    #[tokio::test]
    async fn remember_then_recall_round_trips() {
        let (_, facts, _) = fixtures();
        let remember = RememberFactTool::new(facts.clone());
        let out = remember
            .execute(serde_json::json!({
                "user_id": "ron",
                "fact": "Prefers Italian food",
                "category": "preference",
            }))
            .await
            .unwrap();
        assert_eq!(out, "Remembered: Prefers Italian food");

        let recall = RecallFactsTool::new(facts);
        let out = recall
            .execute(serde_json::json!({"user_id": "ron"}))
            .await
            .unwrap();
        assert!(out.starts_with("Known facts about ron:"));
        assert!(out.contains("Preference:"));
        assert!(out.contains("  - Prefers Italian food"));
    }

    #[tokio::test]
    async fn recall_with_no_facts_says_so() {
        let (_, facts, _) = fixtures();
        let recall = RecallFactsTool::new(facts);
        let out = recall
            .execute(serde_json::json!({"user_id": "nobody"}))
            .await
            .unwrap();
        assert_eq!(out, "No facts stored for user nobody.");
    }

    #[tokio::test]
    async fn remember_requires_fact_text() {
        let (_, facts, _) = fixtures();
        let remember = RememberFactTool::new(facts);
        let err = remember
            .execute(serde_json::json!({"user_id": "ron"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_user_reports_profile_and_soul() {
        let (users, facts, _) = fixtures();
        users.ensure("ron").unwrap();
        users
            .update_soul(
                "ron",
                &Soul {
                    verbosity: Some("concise".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let _ = facts;
        let tool = GetUserTool::new(users);
        let out = tool
            .execute(serde_json::json!({"user_id": "ron"}))
            .await
            .unwrap();
        assert!(out.contains("User: ron"));
        assert!(out.contains("Member since: "));
        assert!(out.contains("  - verbosity: concise"));
    }

    #[tokio::test]
    async fn get_user_handles_new_users() {
        let (users, _, _) = fixtures();
        let tool = GetUserTool::new(users);
        let out = tool
            .execute(serde_json::json!({"user_id": "stranger"}))
            .await
            .unwrap();
        assert_eq!(out, "User stranger not found. They may be new.");
    }

    #[tokio::test]
    async fn conversations_group_by_date_and_truncate() {
        let (_, _, history) = fixtures();
        history
            .append("ron", "pwa", "user", &"m".repeat(200), None, None)
            .unwrap();
        history
            .append("ron", "voice", "assistant", "short answer", None, None)
            .unwrap();
        let tool = GetConversationsTool::new(history);
        let out = tool
            .execute(serde_json::json!({"user_id": "ron"}))
            .await
            .unwrap();
        assert!(out.starts_with("Recent conversations for ron (last 7 days):"));
        assert!(out.contains("..."));
        assert!(out.contains("[voice]"));
        assert!(out.contains("You"));
    }

    #[tokio::test]
    async fn conversations_channel_filter_drops_the_tag() {
        let (_, _, history) = fixtures();
        history.append("ron", "pwa", "user", "text msg", None, None).unwrap();
        history
            .append("ron", "voice", "user", "voice msg", None, None)
            .unwrap();
        let tool = GetConversationsTool::new(history);
        let out = tool
            .execute(serde_json::json!({"user_id": "ron", "channel": "voice"}))
            .await
            .unwrap();
        assert!(out.contains("voice msg"));
        assert!(!out.contains("text msg"));
        assert!(!out.contains("[voice]"));
    }

    #[tokio::test]
    async fn update_soul_merges_and_echoes_the_result() {
        let (users, _, _) = fixtures();
        users.ensure("ron").unwrap();
        let tool = UpdateSoulTool::new(users.clone());
        tool.execute(serde_json::json!({"user_id": "ron", "humor": "light"}))
            .await
            .unwrap();
        let out = tool
            .execute(serde_json::json!({"user_id": "ron", "verbosity": "concise"}))
            .await
            .unwrap();
        assert!(out.starts_with("Updated soul for ron (verbosity):"));
        assert!(out.contains("  - humor: light"));
        assert!(out.contains("  - verbosity: concise"));
    }

    #[tokio::test]
    async fn update_soul_with_no_valid_keys_lists_the_options() {
        let (users, _, _) = fixtures();
        users.ensure("ron").unwrap();
        let tool = UpdateSoulTool::new(users);
        let out = tool
            .execute(serde_json::json!({"user_id": "ron", "favorite_color": "red"}))
            .await
            .unwrap();
        assert!(out.starts_with("No soul preferences provided."));
    }
}
