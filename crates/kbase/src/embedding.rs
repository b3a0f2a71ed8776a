//! OpenAI-compatible embedding client.
//!
//! [`OpenAiEmbedder`] implements [`Embedder`] against any server exposing
//! `POST {base_url}/embeddings`. Newlines in inputs are replaced with
//! spaces before sending.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! All failures surface as [`KbError::Upstream`] naming the embedding backend.

use std::time::Duration;

use async_trait::async_trait;
use kbase_core::embedding::Embedder;
use kbase_core::{Backend, KbError};
use tracing::{debug, warn};

use crate::config::{Credential, EmbeddingConfig};

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

fn upstream(message: impl Into<String>) -> KbError {
    KbError::upstream(Backend::Embedding, message)
}

impl OpenAiEmbedder {
    /// Fails with [`KbError::MissingCredential`] when no API key was resolved.
    pub fn new(config: &EmbeddingConfig, credential: &Credential) -> Result<Self, KbError> {
        let api_key = match credential {
            Credential::Key(k) => k.clone(),
            Credential::Missing { env_var } => {
                return Err(KbError::MissingCredential {
                    backend: Backend::Embedding,
                    hint: format!("set {} or embedding.api_key in the config file", env_var),
                })
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| upstream(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dims: config.dimension(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let inputs: Vec<String> = texts.iter().map(|t| t.replace('\n', " ")).collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| upstream(format!("invalid response body: {}", e)))?;
                        let vectors = parse_openai_response(&json)?;
                        if vectors.len() != texts.len() {
                            return Err(upstream(format!(
                                "expected {} embeddings, got {}",
                                texts.len(),
                                vectors.len()
                            )));
                        }
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = upstream(format!("HTTP {}: {}", status, body_text));
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "embedding request failed, will retry");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "embedding request failed, will retry");
                    last_err = Some(upstream(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| upstream("embedding failed after retries")))
    }
}

/// Extract vectors from an embeddings response, ordered by `index`.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, KbError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| upstream("invalid response: missing data array"))?;

    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| upstream("invalid response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
