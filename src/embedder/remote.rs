use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{EmbeddingBackend, EmbeddingError};
use crate::config::EmbeddingConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// HTTP client for a remote embedding server speaking the batch embed API.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    base_url: Url,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    #[serde(rename = "input")]
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteBackend {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let base_url = config
            .url()
            .map_err(|e| EmbeddingError::Backend(format!("invalid backend URL: {e}")))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension as usize,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| EmbeddingError::Backend(format!("failed to build embed URL: {e}")))?;

        let request = BatchEmbedRequest {
            model: self.model.clone(),
            inputs: texts.to_vec(),
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| EmbeddingError::Backend(format!("failed to serialize request: {e}")))?;

        debug!("Requesting {} embeddings from {}", texts.len(), url);

        let response_text = self.request_with_retry(&url, &request_json)?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::Backend(format!("failed to parse response: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: response.embeddings.len(),
            });
        }

        Ok(response.embeddings)
    }

    fn request_with_retry(&self, url: &Url, body: &str) -> Result<String, EmbeddingError> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embed request attempt {}/{}", attempt, self.retry_attempts);

            let result = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string());

            match result {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let retryable = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Embedding server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                return Err(EmbeddingError::Backend(format!(
                                    "client error: HTTP {status}"
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Embedding transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !retryable {
                        return Err(EmbeddingError::Backend(format!(
                            "non-retryable error: {error}"
                        )));
                    }

                    last_error = Some(error.to_string());

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        // Retries exhausted: the backend is treated as wholly unreachable,
        // which aborts the batch rather than failing individual records.
        Err(EmbeddingError::Unreachable(
            last_error.unwrap_or_else(|| "request failed after retries".to_string()),
        ))
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteBackend {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let backend = self.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || backend.embed_batch_blocking(&texts))
            .await
            .map_err(|e| EmbeddingError::Backend(format!("embed task panicked: {e}")))?
    }
}
