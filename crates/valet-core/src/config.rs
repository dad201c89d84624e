use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8460;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (valet.toml + VALET_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValetConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub metadata_sync: Option<MetadataSyncConfig>,
    #[serde(default)]
    pub health_probes: Vec<HealthProbeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on every API request. `None` disables auth
    /// (local-network deployments behind a tunnel).
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Fast model used by the background fact extractor.
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Safety bound on tool-use iterations per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// When true, the provider-hosted web search tool is offered to the LLM.
    #[serde(default)]
    pub web_search_enabled: bool,
    #[serde(default = "default_web_search_max_uses")]
    pub web_search_max_uses: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Outbound messaging gateway base URL (e.g. http://wa-gateway:3000).
    pub gateway_url: String,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhooksConfig {
    /// Shared secret expected in X-Webhook-Secret. Unset means the endpoint
    /// answers 503 (not configured) rather than accepting anything.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_secs: default_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSyncConfig {
    /// Media library server base URL (Audiobookshelf-compatible API).
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
}

/// One HTTP endpoint the server_health tool probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbeConfig {
    pub name: String,
    pub url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.valet/valet.db")
}
fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_extraction_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_max_tool_rounds() -> usize {
    5
}
fn default_web_search_max_uses() -> u32 {
    3
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_notify_timeout() -> u64 {
    10
}
fn default_max_per_hour() -> usize {
    10
}
fn default_poll_secs() -> u64 {
    30
}
fn default_retention_days() -> u32 {
    30
}
fn default_sync_interval() -> u64 {
    600
}

impl ValetConfig {
    /// Load config from a TOML file with VALET_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then ~/.valet/valet.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ValetConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("VALET_").split("__"))
            .extract()
            .map_err(|e| crate::error::ValetError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.valet/valet.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: ValetConfig = serde_json::from_value(serde_json::json!({
            "llm": { "api_key": "sk-test" }
        }))
        .unwrap();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.llm.max_tool_rounds, 5);
        assert_eq!(cfg.audit.retention_days, 30);
        assert_eq!(cfg.scheduler.poll_secs, 30);
        assert!(cfg.notify.is_none());
        assert!(cfg.webhooks.secret.is_none());
    }
}
