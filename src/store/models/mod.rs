
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// A news record as persisted in the store.
///
/// The pipeline mutates status and annotation fields; record creation and
/// deletion belong to the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub source: String,
    pub status: ArticleStatus,
    pub cluster_id: Option<i64>,
    pub duplicate_count: i64,
    pub is_representative: bool,
    /// JSON array of category labels, set on representatives only.
    pub categories: Option<String>,
    /// JSON array of free-text tags.
    pub tags: Option<String>,
    pub confidence: Option<i64>,
    pub error_message: Option<String>,
    pub created_date: NaiveDateTime,
    pub processed_date: Option<NaiveDateTime>,
}

/// Processing status of one record. Transitions are monotonic; any stage may
/// divert to `Failed` with a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Raw,
    Embedded,
    Clustered,
    Classified,
    Processed,
    Failed,
}

impl std::fmt::Display for ArticleStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ArticleStatus::Raw => write!(f, "raw"),
            ArticleStatus::Embedded => write!(f, "embedded"),
            ArticleStatus::Clustered => write!(f, "clustered"),
            ArticleStatus::Classified => write!(f, "classified"),
            ArticleStatus::Processed => write!(f, "processed"),
            ArticleStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub description: String,
    pub source: String,
    pub created_date: NaiveDateTime,
}

/// Partial update applied to one record. `None` fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArticleUpdate {
    pub status: Option<ArticleStatus>,
    pub cluster_id: Option<i64>,
    pub duplicate_count: Option<i64>,
    pub is_representative: Option<bool>,
    pub categories: Option<String>,
    pub tags: Option<String>,
    pub confidence: Option<i64>,
    pub error_message: Option<String>,
    pub processed_date: Option<NaiveDateTime>,
}

impl Article {
    #[inline]
    pub fn is_processed(&self) -> bool {
        self.status == ArticleStatus::Processed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == ArticleStatus::Failed
    }

    /// Category labels parsed from the stored JSON array, empty when unset.
    #[inline]
    pub fn category_labels(&self) -> Vec<String> {
        self.categories
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Tags parsed from the stored JSON array, empty when unset.
    #[inline]
    pub fn tag_labels(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }
}
