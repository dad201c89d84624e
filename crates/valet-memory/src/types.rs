use serde::{Deserialize, Serialize};

/// Fact categories used for grouping and recall filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Preference,
    Schedule,
    Relationship,
    Work,
    Health,
    Other,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preference => "preference",
            Self::Schedule => "schedule",
            Self::Relationship => "relationship",
            Self::Work => "work",
            Self::Health => "health",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "schedule" => Ok(Self::Schedule),
            "relationship" => Ok(Self::Relationship),
            "work" => Ok(Self::Work),
            "health" => Ok(Self::Health),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

/// How a fact was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Stored by the LLM during a conversation via remember_fact.
    Conversation,
    /// Distilled by the background extractor after a turn.
    AutoExtraction,
    /// Entered directly by the user through the profile UI.
    Explicit,
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Conversation => "conversation",
            Self::AutoExtraction => "auto_extraction",
            Self::Explicit => "explicit",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(Self::Conversation),
            "auto_extraction" => Ok(Self::AutoExtraction),
            "explicit" => Ok(Self::Explicit),
            other => Err(format!("unknown fact source: {other}")),
        }
    }
}

/// A stored fact about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub user_id: String,
    pub fact: String,
    pub category: FactCategory,
    /// 0.0 to 1.0; 1.0 means the user stated it explicitly.
    pub confidence: f64,
    pub source: FactSource,
    /// 768-dimensional vector when the embedding service produced one.
    pub embedding: Option<Vec<f32>>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

/// One row in the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub user_id: String,
    pub channel: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub source: Option<String>,
    pub created_at: String,
}
