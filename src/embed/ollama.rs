use super::Embedder;
use crate::cancel::{guarded, CancellationToken};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embedder backed by Ollama's `POST /api/embeddings`
pub struct OllamaEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    budget: Duration,
    retries: usize,
    dimension: OnceLock<usize>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, budget: Duration) -> Result<Self> {
        // Segments are appended so a base URL behind a path prefix keeps it.
        let mut endpoint = Url::parse(base_url)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid embedder URL: {}", base_url)))?
            .pop_if_empty()
            .extend(["api", "embeddings"]);
        let client = Client::builder().timeout(budget).build()?;

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            budget,
            retries: 2,
            dimension: OnceLock::new(),
        })
    }

    /// Build from service configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.ollama_url,
            &config.embedding_model,
            config.tuning.timeouts.embedder(),
        )
    }

    /// Dimension observed on the first successful call, if any
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    async fn send_with_retry(&self, text: &str) -> Result<EmbeddingResponse> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.retries {
            match self.client.post(self.endpoint.clone()).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<EmbeddingResponse>()
                            .await
                            .map_err(|e| Error::Embedding(format!("Malformed response: {}", e)));
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = Error::Embedding(format!("Embedder returned {}: {}", status, body));
                    if status.is_client_error() {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
                Err(e) => last_err = Some(Error::Embedding(e.to_string())),
            }

            if attempt < self.retries {
                warn!(attempt, model = %self.model, "Embedding request failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * (attempt + 1) as u64)).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("Embedding request failed".to_string())))
    }

    fn validate(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(Error::Embedding(format!(
                "Model '{}' returned an empty embedding",
                self.model
            )));
        }

        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(Error::Embedding(format!(
                "Model '{}' returned non-finite values",
                self.model
            )));
        }

        let expected = *self.dimension.get_or_init(|| embedding.len());
        if expected != embedding.len() {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch for model '{}': expected {}, got {}",
                self.model,
                expected,
                embedding.len()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>> {
        debug!(model = %self.model, chars = text.chars().count(), "Embedding text");

        let response = guarded(
            cancel,
            ErrorKind::Embedding,
            self.budget,
            self.send_with_retry(text),
        )
        .await?;

        self.validate(&response.embedding)?;
        Ok(response.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
