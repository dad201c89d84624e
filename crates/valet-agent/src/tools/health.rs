//! Service health probes. The report uses OK / WARNING / CRITICAL line
//! markers; scheduled `check` tasks parse these against their threshold.

use async_trait::async_trait;
use valet_core::config::HealthProbeConfig;
use valet_core::types::Permission;

use super::{str_arg, Tool, ToolResult};

const PROBE_TIMEOUT_SECS: u64 = 5;

pub struct ServerHealthTool {
    http: reqwest::Client,
    probes: Vec<HealthProbeConfig>,
}

impl ServerHealthTool {
    pub fn new(probes: Vec<HealthProbeConfig>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(PROBE_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            probes,
        }
    }

    async fn probe(&self, probe: &HealthProbeConfig) -> (bool, String) {
        match self.http.get(&probe.url).send().await {
            Ok(resp) if resp.status().is_success() => (true, format!("OK: {}", probe.name)),
            Ok(resp) => (
                false,
                format!(
                    "CRITICAL: {} returned HTTP {}",
                    probe.name,
                    resp.status().as_u16()
                ),
            ),
            Err(e) => (
                false,
                format!("CRITICAL: {} is not responding ({e})", probe.name),
            ),
        }
    }
}

#[async_trait]
impl Tool for ServerHealthTool {
    fn name(&self) -> &str {
        "server_health"
    }

    fn description(&self) -> &str {
        "Check the health of home server services. Reports each monitored \
         service as OK or CRITICAL. Optionally filter to a single service \
         by name."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "service": {
                    "type": "string",
                    "description": "Optional: check only this service."
                }
            }
        })
    }

    fn required_permission(&self) -> Option<Permission> {
        Some(Permission::Home)
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let filter = str_arg(&input, "service");
        let selected: Vec<&HealthProbeConfig> = self
            .probes
            .iter()
            .filter(|p| filter.map_or(true, |f| p.name == f))
            .collect();

        if selected.is_empty() {
            return Ok(match filter {
                Some(name) => format!("No monitored service named '{name}'."),
                None => "No services are configured for health monitoring.".to_string(),
            });
        }

        let mut lines = Vec::with_capacity(selected.len() + 1);
        let mut healthy = 0;
        for probe in &selected {
            let (ok, line) = self.probe(probe).await;
            if ok {
                healthy += 1;
            }
            lines.push(line);
        }
        lines.insert(
            0,
            format!("Service health: {healthy}/{} healthy", selected.len()),
        );
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_configured_probes_reports_cleanly() {
        let tool = ServerHealthTool::new(vec![]);
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out, "No services are configured for health monitoring.");
    }

    #[tokio::test]
    async fn unreachable_service_is_critical() {
        let tool = ServerHealthTool::new(vec![HealthProbeConfig {
            name: "jellyfin".into(),
            // Unroutable port: the probe must fail fast and mark CRITICAL.
            url: "http://127.0.0.1:1/health".into(),
        }]);
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(out.starts_with("Service health: 0/1 healthy"));
        assert!(out.contains("CRITICAL: jellyfin is not responding"));
    }

    #[tokio::test]
    async fn unknown_filter_names_the_missing_service() {
        let tool = ServerHealthTool::new(vec![HealthProbeConfig {
            name: "jellyfin".into(),
            url: "http://127.0.0.1:1/health".into(),
        }]);
        let out = tool
            .execute(serde_json::json!({"service": "plex"}))
            .await
            .unwrap();
        assert_eq!(out, "No monitored service named 'plex'.");
    }

    #[test]
    fn health_tool_is_gated_on_the_home_permission() {
        let tool = ServerHealthTool::new(vec![]);
        assert_eq!(tool.required_permission(), Some(Permission::Home));
    }
}
