use serde::{Deserialize, Serialize};

/// Conversation channels. Stored as plain strings in the history table so
/// new channels don't require a migration; this enum covers the known set.
pub const KNOWN_CHANNELS: &[&str] = &["voice", "pwa", "whatsapp", "telegram"];

/// User ids that exist for bookkeeping and must never surface in listings.
pub const RESERVED_USER_IDS: &[&str] = &["default", "system"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Closed permission vocabulary. A tool declares which permission unlocks
/// it; admins bypass the check entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Media,
    Home,
    ClaudeCode,
    Admin,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::Media => write!(f, "media"),
            Permission::Home => write!(f, "home"),
            Permission::ClaudeCode => write!(f, "claude_code"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "media" => Ok(Permission::Media),
            "home" => Ok(Permission::Home),
            "claude_code" => Ok(Permission::ClaudeCode),
            "admin" => Ok(Permission::Admin),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}

/// Keys the LLM is allowed to write into the soul record. Anything else in
/// an update is rejected before it reaches the database.
pub const VALID_SOUL_KEYS: &[&str] = &[
    "personality",
    "formality",
    "verbosity",
    "humor",
    "custom_instructions",
];

/// Per-user personalisation record ("soul"). Open-ended in storage (JSON
/// text column) but modelled as a partial record with the known keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Soul {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub butler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl Soul {
    /// Display name the assistant answers to. Falls back to "Valet".
    pub fn butler_name(&self) -> &str {
        self.butler_name.as_deref().unwrap_or("Valet")
    }

    /// Merge `other` into `self`: keys present in `other` win, everything
    /// else is preserved. Mirrors a JSONB `||` partial update.
    pub fn merge(&mut self, other: &Soul) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take!(butler_name);
        take!(personality);
        take!(formality);
        take!(verbosity);
        take!(humor);
        take!(custom_instructions);
    }
}

/// Notification categories a user can opt in to.
pub const NOTIFICATION_CATEGORIES: &[&str] = &[
    "download",
    "reminder",
    "weather",
    "smart_home",
    "calendar",
    "general",
];

/// Per-user outbound notification preferences (JSON text column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Quiet-hours window start, "HH:MM" in UTC. The window may wrap
    /// midnight when start > end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours_end: Option<String>,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: default_categories(),
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_categories() -> Vec<String> {
    NOTIFICATION_CATEGORIES.iter().map(|s| s.to_string()).collect()
}

/// Media types the vision pipeline accepts.
pub const ALLOWED_IMAGE_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// ~5 MB raw is ~6.8M base64 chars; rounded up for headroom.
pub const MAX_IMAGE_BASE64_LEN: usize = 7_000_000;

/// Base64-encoded image attachment for a chat turn. No data-URI prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub data: String,
    #[serde(alias = "mediaType")]
    pub media_type: String,
}

impl ImageAttachment {
    /// Validate before any LLM call: closed media-type allowlist and the
    /// base64 size cap.
    pub fn validate(&self) -> Result<(), String> {
        if !ALLOWED_IMAGE_TYPES.contains(&self.media_type.as_str()) {
            return Err(format!(
                "Unsupported image type '{}'. Allowed: {}",
                self.media_type,
                ALLOWED_IMAGE_TYPES.join(", ")
            ));
        }
        if self.data.len() > MAX_IMAGE_BASE64_LEN {
            return Err("Image too large (max ~5 MB)".to_string());
        }
        Ok(())
    }
}
