use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::HttpClassifier;
use crate::config::{Config, EmbeddingBackendKind};
use crate::embedder::{Embedder, EmbeddingBackend, HashingBackend, RemoteBackend};
use crate::pipeline::Pipeline;
use crate::store::{ArticleStatus, Store};

async fn open_store(config: &Config) -> Result<Store> {
    let db_path = config.database_path();
    Store::new(&db_path)
        .await
        .with_context(|| format!("Failed to open record store at {}", db_path.display()))
}

fn load_config() -> Result<Config> {
    let config_dir = Config::config_dir()?;
    Config::load(config_dir)
}

fn build_backend(config: &Config) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.embedding.backend {
        EmbeddingBackendKind::Hashing => Ok(Arc::new(HashingBackend::new(
            config.embedding.dimension as usize,
        ))),
        EmbeddingBackendKind::Remote => {
            let backend = RemoteBackend::new(&config.embedding)
                .with_context(|| "Failed to configure remote embedding backend")?;
            Ok(Arc::new(backend))
        }
    }
}

/// Run one deduplication-and-classification batch
#[inline]
pub async fn run_pipeline(limit: Option<u32>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(limit) = limit {
        config.pipeline.fetch_limit = limit;
    }
    config.validate().context("Invalid configuration")?;

    let store = open_store(&config).await?;
    let embedder = Embedder::new(build_backend(&config)?, &config.embedding);
    let classifier = Arc::new(
        HttpClassifier::new(&config.classifier)
            .with_context(|| "Failed to configure classifier client")?,
    );

    info!("Starting pipeline run (fetch limit {})", config.pipeline.fetch_limit);

    let pipeline = Pipeline::new(store.clone(), embedder, classifier, config);
    let stats = pipeline.run().await?;

    println!("Pipeline run completed:");
    println!("  Fetched: {}", stats.fetched);
    println!("  Embedded: {}", stats.embedded);
    println!("  Clustered: {}", stats.clustered);
    println!("  Representatives: {}", stats.representatives);
    println!("  Classified: {}", stats.classified);
    println!("  Persisted: {}", stats.persisted);
    println!("  Failed: {}", stats.failed);

    if let Err(error) = store.optimize().await {
        warn!("Database optimization failed: {}", error);
    }

    Ok(())
}

/// Show per-status record counts
#[inline]
pub async fn show_status() -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let statuses = [
        ArticleStatus::Raw,
        ArticleStatus::Embedded,
        ArticleStatus::Clustered,
        ArticleStatus::Classified,
        ArticleStatus::Processed,
        ArticleStatus::Failed,
    ];

    println!("Record store: {}", config.database_path().display());
    for status in statuses {
        let count = store.count_by_status(status).await?;
        println!("  {status}: {count}");
    }
    println!("  total: {}", store.count_all().await?);

    Ok(())
}

/// Print the active configuration as TOML
#[inline]
pub fn show_config() -> Result<()> {
    let config = load_config()?;
    let content =
        toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("Configuration directory: {}", config.base_dir.display());
    println!();
    print!("{content}");

    Ok(())
}

/// Write the default configuration file if none exists yet
#[inline]
pub fn init_config() -> Result<()> {
    let config_dir = Config::config_dir()?;
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Configuration already exists: {}", config_path.display());
        return Ok(());
    }

    let config = Config {
        base_dir: config_dir,
        ..Config::default()
    };
    config.save()?;

    println!("Wrote default configuration: {}", config_path.display());
    Ok(())
}
