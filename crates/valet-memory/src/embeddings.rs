//! Client for the external embedding service.
//!
//! Returns `None` on every failure path so callers degrade to
//! category-based recall without special-casing.

use serde::Deserialize;
use tracing::warn;

/// Expected vector size. Must match the model served by the embedding
/// service; vectors of any other length are discarded.
pub const EMBEDDING_DIM: usize = 768;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingClient {
    pub fn new(url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            url: url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Embed `text`. Any error (transport, non-2xx, empty result,
    /// dimension mismatch) logs at warn and returns `None`.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let resp = match self
            .http
            .post(format!("{}/api/embed", self.url))
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "embedding service error");
            return None;
        }

        let body: EmbedResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "embedding response parse failed");
                return None;
            }
        };

        let vector = body.embeddings.into_iter().next()?;
        if vector.len() != EMBEDDING_DIM {
            warn!(
                got = vector.len(),
                expected = EMBEDDING_DIM,
                "embedding dimension mismatch"
            );
            return None;
        }
        Some(vector)
    }
}

/// Cosine distance between two equal-length vectors: 1 - cos(a, b).
///
/// SQLite has no vector operator, so ranking happens in process; this
/// scales linearly in facts per user and recall bounds the candidate set.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
