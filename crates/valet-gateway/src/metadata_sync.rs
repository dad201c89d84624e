//! Background media-library metadata sync.
//!
//! Periodically checks the configured library server for items missing
//! descriptions and triggers a provider match for each. Purely
//! best-effort: any failure logs and waits for the next cycle.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};
use valet_core::config::MetadataSyncConfig;

/// Pause between match calls so the metadata provider isn't hammered.
const MATCH_DELAY: Duration = Duration::from_secs(2);
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run_metadata_sync(config: MetadataSyncConfig, mut shutdown: watch::Receiver<bool>) {
    info!(
        interval_secs = config.interval_secs,
        "metadata sync started"
    );
    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default();
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(60)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sync_once(&http, &config).await {
                    Ok(matched) if matched > 0 => {
                        info!(matched, "metadata sync matched items");
                    }
                    Ok(_) => {}
                    Err(e) => error!("metadata sync error: {e}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metadata sync shutting down");
                    break;
                }
            }
        }
    }
}

/// One reconciliation pass: list libraries, find items without a
/// description, trigger a match per item. Returns the match count.
async fn sync_once(http: &reqwest::Client, config: &MetadataSyncConfig) -> Result<usize, String> {
    let base = config.base_url.trim_end_matches('/');
    let auth = format!("Bearer {}", config.token);

    let resp = http
        .get(format!("{base}/api/libraries"))
        .header("Authorization", &auth)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("libraries request failed: HTTP {}", resp.status().as_u16()));
    }
    let data: Value = resp.json().await.map_err(|e| e.to_string())?;

    let mut matched = 0;
    for library in data["libraries"].as_array().into_iter().flatten() {
        let Some(lib_id) = library["id"].as_str() else {
            continue;
        };

        let resp = match http
            .get(format!("{base}/api/libraries/{lib_id}/items"))
            .header("Authorization", &auth)
            .query(&[("limit", "0")])
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(lib_id, status = r.status().as_u16(), "library items request failed");
                continue;
            }
            Err(e) => {
                warn!(lib_id, error = %e, "library items request failed");
                continue;
            }
        };
        let items: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => continue,
        };

        for item in items["results"].as_array().into_iter().flatten() {
            let metadata = &item["media"]["metadata"];
            // Items that already have a description are left alone.
            if metadata["description"].as_str().is_some_and(|d| !d.is_empty()) {
                continue;
            }
            let Some(item_id) = item["id"].as_str() else {
                continue;
            };
            let title = metadata["title"].as_str().unwrap_or("?");

            match http
                .post(format!("{base}/api/items/{item_id}/match"))
                .header("Authorization", &auth)
                .json(&serde_json::json!({"provider": "google"}))
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => {
                    let result: Value = r.json().await.unwrap_or_default();
                    if result["updated"].as_bool().unwrap_or(false) {
                        matched += 1;
                        info!(title, "matched metadata");
                    }
                }
                Ok(r) => {
                    warn!(title, status = r.status().as_u16(), "metadata match failed");
                }
                Err(e) => {
                    warn!(title, error = %e, "metadata match failed");
                }
            }

            tokio::time::sleep(MATCH_DELAY).await;
        }
    }
    Ok(matched)
}
