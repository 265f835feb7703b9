// Representative selector
// Picks one canonical record per cluster by weighted information/trust scoring


use std::cmp::Ordering;
use std::collections::HashSet;

use itertools::Itertools;
use tracing::debug;

use crate::cluster::OUTLIER;
use crate::config::SelectionConfig;
use crate::store::Article;

/// Per-record outcome of cluster assignment and representative selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOutcome {
    pub article_id: i64,
    pub cluster_id: Option<i64>,
    pub duplicate_count: i64,
    pub is_representative: bool,
}

/// Scoring policy for representative selection.
///
/// The score is a pure function of the record's text length and source
/// identifier; no external state is consulted, so a batch always resolves the
/// same way.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    information_weight: f32,
    source_weight: f32,
    max_reference_length: usize,
    default_trust: f32,
    trusted_sources: HashSet<String>,
}

impl SelectionPolicy {
    #[inline]
    pub fn new(config: &SelectionConfig) -> Self {
        Self {
            information_weight: config.information_weight,
            source_weight: config.source_weight,
            max_reference_length: config.max_reference_length,
            default_trust: config.default_trust,
            trusted_sources: config.trusted_sources.iter().cloned().collect(),
        }
    }

    /// Weighted sum of the information and trust terms, in the unit interval.
    #[inline]
    pub fn score(&self, article: &Article) -> f32 {
        self.information_weight * self.information(article)
            + self.source_weight * self.trust(&article.source)
    }

    /// Normalized combined length of title and description, clipped so
    /// arbitrarily long text cannot dominate.
    fn information(&self, article: &Article) -> f32 {
        let length = article.title.chars().count() + article.description.chars().count();
        (length as f32 / self.max_reference_length as f32).min(1.0)
    }

    fn trust(&self, source: &str) -> f32 {
        if self.trusted_sources.contains(source) {
            1.0
        } else {
            self.default_trust
        }
    }

    /// Resolve cluster labels into per-record outcomes.
    ///
    /// Every cluster gets exactly one representative; outliers become their
    /// own singleton representative with duplicate count 1. Ties resolve to
    /// the earlier-created record, then the lower id, so selection is a total
    /// order and reproducible.
    #[inline]
    pub fn assign(&self, articles: &[Article], labels: &[i64]) -> Vec<ClusterOutcome> {
        debug_assert_eq!(articles.len(), labels.len());

        let groups = labels
            .iter()
            .enumerate()
            .map(|(index, &label)| (label, index))
            .into_group_map();

        let mut outcomes: Vec<Option<ClusterOutcome>> = vec![None; articles.len()];

        for (label, members) in groups {
            if label == OUTLIER {
                for index in members {
                    outcomes[index] = Some(ClusterOutcome {
                        article_id: articles[index].id,
                        cluster_id: None,
                        duplicate_count: 1,
                        is_representative: true,
                    });
                }
                continue;
            }

            let representative = members
                .iter()
                .copied()
                .max_by(|&a, &b| self.rank(&articles[a], &articles[b]))
                .expect("cluster labels always map to at least one member");

            debug!(
                "Cluster {}: {} members, representative article {}",
                label,
                members.len(),
                articles[representative].id
            );

            let size = members.len() as i64;
            for index in members {
                outcomes[index] = Some(ClusterOutcome {
                    article_id: articles[index].id,
                    cluster_id: Some(label),
                    duplicate_count: size,
                    is_representative: index == representative,
                });
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.expect("every index belongs to exactly one group"))
            .collect()
    }

    /// Total order over cluster members: higher score, then earlier creation,
    /// then lower id.
    fn rank(&self, a: &Article, b: &Article) -> Ordering {
        self.score(a)
            .total_cmp(&self.score(b))
            .then_with(|| b.created_date.cmp(&a.created_date))
            .then_with(|| b.id.cmp(&a.id))
    }
}
