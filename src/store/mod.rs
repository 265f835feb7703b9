use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};


pub mod models;
pub mod queries;

pub use models::{Article, ArticleStatus, ArticleUpdate, NewArticle};
pub use queries::ArticleQueries;

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed record store. The pipeline treats this as the sole gate for
/// what counts as raw input and processed output.
#[derive(Debug, Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_url: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_url)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/store/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn insert_article(&self, article: NewArticle) -> Result<Article> {
        ArticleQueries::create(&self.pool, article).await
    }

    #[inline]
    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        ArticleQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn fetch_by_status(
        &self,
        status: ArticleStatus,
        limit: i64,
    ) -> Result<Vec<Article>> {
        ArticleQueries::fetch_by_status(&self.pool, status, limit).await
    }

    #[inline]
    pub async fn update_article(&self, id: i64, update: &ArticleUpdate) -> Result<bool> {
        ArticleQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn reset_article(&self, id: i64) -> Result<bool> {
        ArticleQueries::reset_to_raw(&self.pool, id).await
    }

    #[inline]
    pub async fn count_by_status(&self, status: ArticleStatus) -> Result<i64> {
        ArticleQueries::count_by_status(&self.pool, status).await
    }

    #[inline]
    pub async fn count_all(&self) -> Result<i64> {
        ArticleQueries::count_all(&self.pool).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
