use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ClassificationResult, Classifier, ClassifierError};
use crate::config::ClassifierConfig;

/// HTTP client for the external classification service.
///
/// Performs exactly one request per call; the retry loop lives in
/// [`super::classify_with_retry`] so scripted classifiers share it.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    base_url: Url,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    title: &'a str,
    description: &'a str,
    categories: Vec<&'static str>,
}

/// Raw answer shape before vocabulary filtering. Tags and confidence are
/// optional because the service omits them for low-signal records.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    categories: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    confidence: i64,
}

impl HttpClassifier {
    #[inline]
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let base_url = config
            .url()
            .map_err(|e| ClassifierError::Transport(format!("invalid classifier URL: {e}")))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self { base_url, agent })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    fn classify_blocking(
        &self,
        title: &str,
        description: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        let url = self
            .base_url
            .join("/api/classify")
            .map_err(|e| ClassifierError::Transport(format!("failed to build URL: {e}")))?;

        let request = ClassifyRequest {
            title,
            description,
            categories: super::Category::ALL.iter().map(|c| c.as_str()).collect(),
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| ClassifierError::Transport(format!("failed to serialize request: {e}")))?;

        debug!("Classifying '{}' via {}", title, url);

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(request_json.as_str())
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(map_http_error)?;

        let payload = extract_json(&response_text).ok_or_else(|| {
            ClassifierError::Malformed("no JSON object in response".to_string())
        })?;

        let response: ClassifyResponse = serde_json::from_str(payload)
            .map_err(|e| ClassifierError::Malformed(format!("failed to parse response: {e}")))?;

        Ok(ClassificationResult::sanitize(
            &response.categories,
            response.tags,
            response.confidence,
        ))
    }
}

fn map_http_error(error: ureq::Error) -> ClassifierError {
    match error {
        ureq::Error::Timeout(_) => ClassifierError::Timeout,
        ureq::Error::StatusCode(429) => ClassifierError::RateLimited,
        ureq::Error::StatusCode(status) => ClassifierError::Http(status),
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            ClassifierError::Transport(error.to_string())
        }
        other => ClassifierError::Transport(other.to_string()),
    }
}

/// Locate the JSON object inside a response body, tolerating markdown code
/// fences and surrounding prose around the payload.
pub(super) fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}

#[async_trait]
impl Classifier for HttpClassifier {
    #[inline]
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        let classifier = self.clone();
        let title = title.to_string();
        let description = description.to_string();

        tokio::task::spawn_blocking(move || classifier.classify_blocking(&title, &description))
            .await
            .map_err(|e| ClassifierError::Transport(format!("classify task panicked: {e}")))?
    }
}
