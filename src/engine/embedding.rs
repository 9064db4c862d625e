// Raven Agent Engine — Embedding Client
//
// Calls an OpenAI-compatible embeddings API to produce vector
// representations of text. Used by skill retrieval and the learner's
// merge scoring. Failures are soft: log a warning, return None, no retry.

use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Inputs longer than this are truncated before embedding.
const MAX_EMBED_CHARS: usize = 4000;

/// Embedding client — one instance per request (the API key travels with
/// the request, not the service).
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(api_key: &str, base_url: &str, model: &str, timeout_ms: u64) -> Self {
        EmbeddingClient {
            client: Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Get an embedding vector for a text string, or None on any failure.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let trimmed = clamp_input(text);
        if trimmed.is_empty() {
            return None;
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": trimmed,
        });

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[skills] Embedding request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(
                "[skills] Embedding failed status={} message={}",
                status,
                crate::atoms::logging::truncate_chars(&text, 200)
            );
            return None;
        }

        let v: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("[skills] Embedding response unreadable: {}", e);
                return None;
            }
        };

        let vector = extract_embedding(&v);
        if vector.is_empty() {
            warn!("[skills] Embedding response carried no vector");
            return None;
        }
        Some(vector)
    }
}

/// Trim and cap embedding input.
fn clamp_input(text: &str) -> String {
    let trimmed = text.trim();
    trimmed.chars().take(MAX_EMBED_CHARS).collect()
}

/// Pull the vector out of an embeddings response: `data[0].embedding`.
fn extract_embedding(v: &Value) -> Vec<f32> {
    v["data"][0]["embedding"]
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|x| x.as_f64().map(|f| f as f32))
                .collect()
        })
        .unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_input_trims_and_caps() {
        assert_eq!(clamp_input("  hi  "), "hi");
        let long = "x".repeat(MAX_EMBED_CHARS + 100);
        assert_eq!(clamp_input(&long).chars().count(), MAX_EMBED_CHARS);
    }

    #[test]
    fn test_extract_embedding() {
        let v = json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]});
        let vec = extract_embedding(&v);
        assert_eq!(vec.len(), 3);
        assert!((vec[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_extract_embedding_missing() {
        assert!(extract_embedding(&json!({"data": []})).is_empty());
        assert!(extract_embedding(&json!({})).is_empty());
        assert!(extract_embedding(&json!({"data": [{"embedding": "oops"}]})).is_empty());
    }
}
