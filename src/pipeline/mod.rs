// Pipeline orchestrator
// Drives one batch through fetch, embed, cluster, select, classify, persist

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, ClassifyOutcome, RetryPolicy, classify_with_retry};
use crate::cluster::{self, ClusterParams};
use crate::config::Config;
use crate::embedder::Embedder;
use crate::selector::{ClusterOutcome, SelectionPolicy};
use crate::store::{Article, ArticleStatus, ArticleUpdate, Store};
use crate::{PipelineError, Result};

/// Counters for one pipeline run.
///
/// `clustered` counts records that joined a multi-member cluster; outliers
/// are excluded. `failed` counts distinct records whose processing failed
/// (embedding problems, lost store writes); degraded classifications are
/// persisted as processed and do not appear here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetched: usize,
    pub embedded: usize,
    pub clustered: usize,
    pub representatives: usize,
    pub classified: usize,
    pub persisted: usize,
    pub failed: usize,
}

/// A record with its unit embedding, alive through the local stages.
struct EmbeddedArticle {
    article: Article,
    vector: Vec<f32>,
}

enum RepDecision {
    Classified(i64, ClassifyOutcome),
    /// Budget ran out before dispatch; the record goes back to raw.
    Deferred(i64),
}

/// Batch orchestrator. Each run operates on a disjoint fetch window (raw
/// status only), so concurrent or repeated runs never double-process a
/// record.
pub struct Pipeline {
    store: Store,
    embedder: Embedder,
    classifier: Arc<dyn Classifier>,
    config: Config,
}

impl Pipeline {
    #[inline]
    pub fn new(
        store: Store,
        embedder: Embedder,
        classifier: Arc<dyn Classifier>,
        config: Config,
    ) -> Self {
        Self {
            store,
            embedder,
            classifier,
            config,
        }
    }

    /// Run one batch to completion.
    ///
    /// Per-record failures are persisted onto the record and counted; only
    /// batch-fatal conditions (unreachable embedding backend, store access
    /// failure) propagate as errors, and those leave every record at a status
    /// the next run can resume from.
    pub async fn run(&self) -> Result<RunStats> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let deadline = self.deadline(started);
        let mut stats = RunStats::default();
        let mut failed: HashSet<i64> = HashSet::new();

        let articles = self
            .store
            .fetch_by_status(ArticleStatus::Raw, i64::from(self.config.pipeline.fetch_limit))
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        stats.fetched = articles.len();

        if articles.is_empty() {
            info!("Run {}: no raw records, nothing to do", run_id);
            return Ok(stats);
        }

        info!("Run {}: processing {} raw records", run_id, stats.fetched);

        let embedded = self.embed_stage(&articles, &mut stats, &mut failed).await?;
        if embedded.is_empty() {
            info!("Run {}: no records survived embedding", run_id);
            stats.failed = failed.len();
            return Ok(stats);
        }

        let outcomes = self.cluster_stage(&embedded, &mut stats, &mut failed).await;

        let decisions = self
            .classify_stage(&embedded, &outcomes, deadline, &mut stats)
            .await;

        self.persist_stage(&embedded, decisions, &mut stats, &mut failed)
            .await;

        stats.failed = failed.len();

        info!(
            "Run {} finished in {:.1}s: {} fetched, {} embedded, {} representatives, {} classified, {} persisted, {} failed",
            run_id,
            started.elapsed().as_secs_f64(),
            stats.fetched,
            stats.embedded,
            stats.representatives,
            stats.classified,
            stats.persisted,
            stats.failed,
        );

        Ok(stats)
    }

    fn deadline(&self, started: Instant) -> Option<Instant> {
        let budget = self.config.pipeline.run_budget_seconds;
        (budget > 0).then(|| started + Duration::from_secs(budget))
    }

    /// Embed all fetched records. Per-record embedding problems mark that
    /// record failed; a batch-level backend failure aborts the run with
    /// every record still raw.
    async fn embed_stage(
        &self,
        articles: &[Article],
        stats: &mut RunStats,
        failed: &mut HashSet<i64>,
    ) -> Result<Vec<EmbeddedArticle>> {
        let pairs: Vec<(String, String)> = articles
            .iter()
            .map(|a| (a.title.clone(), a.description.clone()))
            .collect();

        let vectors = self
            .embedder
            .embed_pairs(&pairs)
            .await
            .map_err(|e| PipelineError::Embedding(e.to_string()))?;

        let mut embedded = Vec::with_capacity(articles.len());

        for (article, item) in articles.iter().zip(vectors) {
            match item {
                Ok(vector) => {
                    self.update_status(article.id, ArticleStatus::Embedded, failed)
                        .await;
                    embedded.push(EmbeddedArticle {
                        article: article.clone(),
                        vector,
                    });
                }
                Err(reason) => {
                    warn!("Record {} failed to embed: {}", article.id, reason);
                    self.mark_failed(article.id, &format!("embedding failed: {reason}"), failed)
                        .await;
                }
            }
        }

        stats.embedded = embedded.len();
        Ok(embedded)
    }

    /// Cluster the embedded batch and persist cluster membership together
    /// with the representative decision.
    async fn cluster_stage(
        &self,
        embedded: &[EmbeddedArticle],
        stats: &mut RunStats,
        failed: &mut HashSet<i64>,
    ) -> Vec<ClusterOutcome> {
        let vectors: Vec<Vec<f32>> = embedded.iter().map(|e| e.vector.clone()).collect();
        let params = ClusterParams::from(&self.config.clustering);
        let labels = cluster::cluster(&vectors, &params);

        let articles: Vec<Article> = embedded.iter().map(|e| e.article.clone()).collect();
        let policy = SelectionPolicy::new(&self.config.selection);
        let outcomes = policy.assign(&articles, &labels);

        // Outliers sit outside every cluster and are not counted here.
        stats.clustered = outcomes.iter().filter(|o| o.cluster_id.is_some()).count();
        stats.representatives = outcomes.iter().filter(|o| o.is_representative).count();

        debug!(
            "{} of {} records joined a cluster, {} representatives",
            stats.clustered,
            outcomes.len(),
            stats.representatives
        );

        for outcome in &outcomes {
            let update = ArticleUpdate {
                status: Some(ArticleStatus::Clustered),
                cluster_id: outcome.cluster_id,
                duplicate_count: Some(outcome.duplicate_count),
                is_representative: Some(outcome.is_representative),
                ..ArticleUpdate::default()
            };
            self.apply_update(outcome.article_id, &update, failed).await;
        }

        outcomes
    }

    /// Classify representatives concurrently, bounded by the configured
    /// in-flight limit. Classification never fails a record; after retries
    /// it degrades to the fallback result. Representatives not yet
    /// dispatched when the budget expires are deferred.
    async fn classify_stage(
        &self,
        embedded: &[EmbeddedArticle],
        outcomes: &[ClusterOutcome],
        deadline: Option<Instant>,
        stats: &mut RunStats,
    ) -> Vec<RepDecision> {
        let policy = RetryPolicy::from(&self.config.classifier);
        let representatives: Vec<&Article> = embedded
            .iter()
            .zip(outcomes)
            .filter(|(_, outcome)| outcome.is_representative)
            .map(|(e, _)| &e.article)
            .collect();

        let decisions: Vec<RepDecision> = stream::iter(representatives)
            .map(|article| {
                let classifier = Arc::clone(&self.classifier);
                async move {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return RepDecision::Deferred(article.id);
                    }
                    let outcome = classify_with_retry(
                        classifier.as_ref(),
                        &article.title,
                        &article.description,
                        policy,
                    )
                    .await;
                    RepDecision::Classified(article.id, outcome)
                }
            })
            .buffer_unordered(self.config.classifier.concurrency)
            .collect()
            .await;

        stats.classified = decisions
            .iter()
            .filter(|d| matches!(d, RepDecision::Classified(..)))
            .count();

        let degraded = decisions
            .iter()
            .filter(|d| matches!(d, RepDecision::Classified(_, o) if o.is_degraded()))
            .count();
        if degraded > 0 {
            warn!("{} representatives classified via fallback", degraded);
        }

        decisions
    }

    /// Write classification results and final statuses.
    ///
    /// Deferred representatives are reset to raw with their cluster
    /// annotation cleared, so the next run starts from a clean record; every
    /// other surviving record ends in processed status.
    async fn persist_stage(
        &self,
        embedded: &[EmbeddedArticle],
        decisions: Vec<RepDecision>,
        stats: &mut RunStats,
        failed: &mut HashSet<i64>,
    ) {
        let mut deferred: HashSet<i64> = HashSet::new();

        for decision in decisions {
            match decision {
                RepDecision::Classified(id, outcome) => {
                    let update = ArticleUpdate {
                        status: Some(ArticleStatus::Classified),
                        categories: serde_json::to_string(&outcome.result.categories).ok(),
                        tags: serde_json::to_string(&outcome.result.tags).ok(),
                        confidence: Some(outcome.result.confidence),
                        error_message: outcome.degraded_reason.clone(),
                        ..ArticleUpdate::default()
                    };
                    self.apply_update(id, &update, failed).await;
                }
                RepDecision::Deferred(id) => {
                    warn!("Record {} deferred to next run (budget exhausted)", id);
                    if let Err(error) = self.store.reset_article(id).await {
                        warn!("Failed to reset record {}: {}", id, error);
                        failed.insert(id);
                    }
                    deferred.insert(id);
                }
            }
        }

        let now = Utc::now().naive_utc();
        for embedded_article in embedded {
            let id = embedded_article.article.id;
            if deferred.contains(&id) {
                continue;
            }

            let update = ArticleUpdate {
                status: Some(ArticleStatus::Processed),
                processed_date: Some(now),
                ..ArticleUpdate::default()
            };
            if self.apply_update(id, &update, failed).await {
                stats.persisted += 1;
            }
        }
    }

    async fn update_status(&self, id: i64, status: ArticleStatus, failed: &mut HashSet<i64>) {
        let update = ArticleUpdate {
            status: Some(status),
            ..ArticleUpdate::default()
        };
        self.apply_update(id, &update, failed).await;
    }

    /// Apply one record update, isolating store errors to that record. A
    /// record with any lost write joins the failed set exactly once.
    async fn apply_update(&self, id: i64, update: &ArticleUpdate, failed: &mut HashSet<i64>) -> bool {
        match self.store.update_article(id, update).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Record {} vanished mid-run, skipping", id);
                false
            }
            Err(error) => {
                warn!("Failed to persist record {}: {}", id, error);
                failed.insert(id);
                false
            }
        }
    }

    /// Mark one record failed with a reason. Failed still counts as handled.
    async fn mark_failed(&self, id: i64, reason: &str, failed: &mut HashSet<i64>) {
        let update = ArticleUpdate {
            status: Some(ArticleStatus::Failed),
            error_message: Some(reason.to_string()),
            processed_date: Some(Utc::now().naive_utc()),
            ..ArticleUpdate::default()
        };

        if let Err(error) = self.store.update_article(id, &update).await {
            warn!("Failed to record failure for {}: {}", id, error);
        }
        failed.insert(id);
    }
}
