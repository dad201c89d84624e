use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One deduplicated alert condition. Exactly one row exists per alert_key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub alert_key: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub first_triggered_at: String,
    pub last_triggered_at: String,
    pub resolved_at: Option<String>,
    pub notification_sent: bool,
}

/// What a trigger did to the row. `New` and `Refired` both mean the
/// condition needs a notification; `StillActive` only refreshed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    New,
    Refired,
    StillActive,
}

impl TriggerOutcome {
    pub fn needs_notify(&self) -> bool {
        matches!(self, TriggerOutcome::New | TriggerOutcome::Refired)
    }
}
