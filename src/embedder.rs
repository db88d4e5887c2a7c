//! Client for an external embedding endpoint (C2).

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub type Embedding = Vec<f32>;

/// Abstraction over the embedding endpoint, so the RAG engine can be built
/// and tested against a mock without a live HTTP collaborator.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed each non-empty text in order. Empty strings are skipped and do
    /// not appear in the result, so the output length may be less than the
    /// input length.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// HTTP client for an OpenAI-compatible embedding endpoint, with exponential
/// backoff retry and startup model auto-discovery.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: if config.model.is_empty() { None } else { Some(config.model.clone()) },
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }

    /// If no model was configured explicitly, query `<base>/v1/models` and
    /// select the first entry whose id contains "embed"/"embedding". Leaves
    /// the model unset (letting the endpoint auto-select) if discovery
    /// fails or finds nothing.
    pub async fn discover_model(mut self) -> Self {
        if self.model.is_some() {
            return self;
        }
        match self.list_models().await {
            Ok(models) => {
                self.model = models
                    .into_iter()
                    .find(|id| id.to_lowercase().contains("embed"));
            }
            Err(e) => {
                warn!("embedding model auto-discovery failed, leaving model unset: {e}");
            }
        }
        self
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| PipelineError::transient("embedder", "model list request timed out"))?
            .map_err(|e| PipelineError::transient("embedder", e.to_string()))?;
        let parsed: ModelListResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest { input: text, model: self.model.as_deref() };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = timeout(self.timeout, self.client.post(&url).json(&request).send()).await;

            let result = match outcome {
                Err(_) => Err(PipelineError::transient("embedder", "request timed out")),
                Ok(Err(e)) => Err(PipelineError::transient("embedder", e.to_string())),
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        Err(PipelineError::transient(
                            "embedder",
                            format!("endpoint returned {status}"),
                        ))
                    } else if !status.is_success() {
                        Err(PipelineError::UpstreamUnavailable(format!(
                            "embedding endpoint returned {status}"
                        )))
                    } else {
                        let parsed: EmbeddingResponse = response.json().await?;
                        match parsed.data.into_iter().next() {
                            Some(datum) if !datum.embedding.is_empty() => Ok(datum.embedding),
                            _ => Err(PipelineError::UpstreamUnavailable(
                                "embedding endpoint returned an empty vector".to_string(),
                            )),
                        }
                    }
                }
            };

            match result {
                Ok(embedding) => return Ok(embedding),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                    debug!("embedder attempt {attempt} failed ({err}), retrying after {backoff:?}");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                continue;
            }
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        pub Embedder {}

        #[async_trait]
        impl EmbeddingClient for Embedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
        }
    }

    #[tokio::test]
    async fn mocked_client_preserves_order() {
        let mut mock = MockEmbedder::new();
        mock.expect_embed()
            .returning(|texts| Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect()));

        let texts = vec!["a".to_string(), "b".to_string()];
        let result = mock.embed(&texts).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn client_strips_trailing_slash_from_base_url() {
        let config = EmbeddingConfig { base_url: "http://host/".to_string(), ..Default::default() };
        let client = HttpEmbeddingClient::new(&config);
        assert_eq!(client.base_url, "http://host");
    }
}
