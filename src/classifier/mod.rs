// Classifier adapter
// Sends representative records to an external labeling service and parses a
// structured result; degrades to a fallback instead of failing the batch


pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;

pub use http::HttpClassifier;

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Confidence ceiling applied when the service's categories were all dropped
/// and the fallback category was substituted.
const FALLBACK_CONFIDENCE_CAP: i64 = 50;

/// Closed category vocabulary. Labels outside this set are dropped from
/// classifier responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Policy,
    Markets,
    Finance,
    RealEstate,
    Corporate,
    Legal,
    Economy,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Policy,
        Category::Markets,
        Category::Finance,
        Category::RealEstate,
        Category::Corporate,
        Category::Legal,
        Category::Economy,
        Category::Other,
    ];

    /// Reserved fallback used whenever labeling cannot produce a valid answer.
    pub const FALLBACK: Category = Category::Other;

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match *self {
            Category::Policy => "policy",
            Category::Markets => "markets",
            Category::Finance => "finance",
            Category::RealEstate => "real_estate",
            Category::Corporate => "corporate",
            Category::Legal => "legal",
            Category::Economy => "economy",
            Category::Other => "other",
        }
    }

    /// Case-insensitive label lookup within the closed vocabulary.
    #[inline]
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == normalized)
    }
}

impl std::fmt::Display for Category {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Non-empty ordered set of categories from the closed vocabulary.
    pub categories: Vec<Category>,
    pub tags: Vec<String>,
    /// Confidence in [0, 100].
    pub confidence: i64,
}

impl ClassificationResult {
    /// Degraded result: fallback category, zero confidence, no tags.
    #[inline]
    pub fn fallback() -> Self {
        Self {
            categories: vec![Category::FALLBACK],
            tags: Vec::new(),
            confidence: 0,
        }
    }

    /// Normalize a raw service answer into the closed-vocabulary shape:
    /// unknown labels are dropped silently, an emptied category set becomes
    /// the fallback with capped confidence, and confidence is clamped.
    #[inline]
    pub fn sanitize(raw_categories: &[String], tags: Vec<String>, confidence: i64) -> Self {
        let categories: Vec<Category> = raw_categories
            .iter()
            .filter_map(|label| Category::parse(label))
            .collect();

        let mut confidence = confidence.clamp(0, 100);
        let categories = if categories.is_empty() {
            confidence = confidence.min(FALLBACK_CONFIDENCE_CAP);
            vec![Category::FALLBACK]
        } else {
            categories
        };

        Self {
            categories,
            tags,
            confidence,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classification request timed out")]
    Timeout,

    #[error("Rate limited by classification service")]
    RateLimited,

    #[error("Classification service HTTP error: {0}")]
    Http(u16),

    #[error("Malformed classification response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClassifierError {
    /// Transient failures are retried; everything else degrades immediately.
    #[inline]
    pub fn is_transient(&self) -> bool {
        match *self {
            ClassifierError::Timeout
            | ClassifierError::RateLimited
            | ClassifierError::Transport(_) => true,
            ClassifierError::Http(status) => status >= 500,
            ClassifierError::Malformed(_) => false,
        }
    }
}

/// Capability boundary for the external labeling service.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        description: &str,
    ) -> Result<ClassificationResult, ClassifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl From<&ClassifierConfig> for RetryPolicy {
    #[inline]
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            backoff_base_ms: config.backoff_base_ms,
        }
    }
}

/// Outcome of classification with retries. Classification never fails the
/// pipeline; after the retry budget it degrades to the fallback result with
/// the failure reason preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOutcome {
    pub result: ClassificationResult,
    pub degraded_reason: Option<String>,
    pub attempts: u32,
}

impl ClassifyOutcome {
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.degraded_reason.is_some()
    }
}

/// Bounded retry loop around one classification call.
///
/// Transient errors back off exponentially and retry up to the attempt
/// budget; malformed responses and client errors degrade immediately.
#[inline]
pub async fn classify_with_retry(
    classifier: &dyn Classifier,
    title: &str,
    description: &str,
    policy: RetryPolicy,
) -> ClassifyOutcome {
    let mut last_reason = String::new();

    for attempt in 1..=policy.max_attempts {
        debug!(
            "Classification attempt {}/{} for '{}'",
            attempt, policy.max_attempts, title
        );

        match classifier.classify(title, description).await {
            Ok(result) => {
                return ClassifyOutcome {
                    result,
                    degraded_reason: None,
                    attempts: attempt,
                };
            }
            Err(error) if error.is_transient() => {
                warn!(
                    "Transient classification failure (attempt {}/{}): {}",
                    attempt, policy.max_attempts, error
                );
                last_reason = error.to_string();

                if attempt < policy.max_attempts {
                    let delay_ms =
                        policy.backoff_base_ms * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
            Err(error) => {
                warn!("Non-retryable classification failure: {}", error);
                return ClassifyOutcome {
                    result: ClassificationResult::fallback(),
                    degraded_reason: Some(error.to_string()),
                    attempts: attempt,
                };
            }
        }
    }

    ClassifyOutcome {
        result: ClassificationResult::fallback(),
        degraded_reason: Some(format!(
            "retries exhausted after {} attempts: {}",
            policy.max_attempts, last_reason
        )),
        attempts: policy.max_attempts,
    }
}
