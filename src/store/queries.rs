use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

use super::models::{Article, ArticleStatus, ArticleUpdate, NewArticle};

const ARTICLE_COLUMNS: &str = "id, title, description, source, status, cluster_id, \
     duplicate_count, is_representative, categories, tags, confidence, \
     error_message, created_date, processed_date";

pub struct ArticleQueries;

impl ArticleQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_article: NewArticle) -> Result<Article> {
        let id = sqlx::query(
            "INSERT INTO articles (title, description, source, status, created_date) \
             VALUES (?, ?, ?, 'raw', ?)",
        )
        .bind(&new_article.title)
        .bind(&new_article.description)
        .bind(&new_article.source)
        .bind(new_article.created_date)
        .execute(pool)
        .await
        .context("Failed to create article")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created article"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get article by id")?;

        Ok(article)
    }

    /// Fetch a window of records in creation order. The pipeline fetches
    /// status `raw` so re-runs over processed data are no-ops.
    #[inline]
    pub async fn fetch_by_status(
        pool: &SqlitePool,
        status: ArticleStatus,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE status = ? \
             ORDER BY created_date ASC, id ASC LIMIT ?"
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch articles by status")?;

        debug!("Fetched {} articles with status {}", articles.len(), status);
        Ok(articles)
    }

    /// Apply a partial update; unset fields keep their stored values.
    /// Returns false when no record with the given id exists.
    #[inline]
    pub async fn update(pool: &SqlitePool, id: i64, update: &ArticleUpdate) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE articles SET \
                 status = COALESCE(?, status), \
                 cluster_id = COALESCE(?, cluster_id), \
                 duplicate_count = COALESCE(?, duplicate_count), \
                 is_representative = COALESCE(?, is_representative), \
                 categories = COALESCE(?, categories), \
                 tags = COALESCE(?, tags), \
                 confidence = COALESCE(?, confidence), \
                 error_message = COALESCE(?, error_message), \
                 processed_date = COALESCE(?, processed_date) \
             WHERE id = ?",
        )
        .bind(update.status)
        .bind(update.cluster_id)
        .bind(update.duplicate_count)
        .bind(update.is_representative)
        .bind(update.categories.as_deref())
        .bind(update.tags.as_deref())
        .bind(update.confidence)
        .bind(update.error_message.as_deref())
        .bind(update.processed_date)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update article")?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Return a record to the raw fetch window, clearing any annotation
    /// written earlier in the run. Writes explicit NULLs, which `update`
    /// with its COALESCE semantics never can.
    #[inline]
    pub async fn reset_to_raw(pool: &SqlitePool, id: i64) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE articles SET \
                 status = 'raw', \
                 cluster_id = NULL, \
                 duplicate_count = 1, \
                 is_representative = 0, \
                 categories = NULL, \
                 tags = NULL, \
                 confidence = NULL, \
                 error_message = NULL, \
                 processed_date = NULL \
             WHERE id = ?",
        )
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to reset article")?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    #[inline]
    pub async fn count_by_status(pool: &SqlitePool, status: ArticleStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await
            .context("Failed to count articles by status")?;

        Ok(count)
    }

    #[inline]
    pub async fn count_all(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(pool)
            .await
            .context("Failed to count articles")?;

        Ok(count)
    }
}
