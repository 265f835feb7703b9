// Cluster engine
// Density-based clustering of unit vectors under cosine distance


use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::config::ClusteringConfig;

/// Reserved label for records that belong to no cluster.
pub const OUTLIER: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Maximum cosine distance between neighbors.
    pub epsilon: f32,
    /// Minimum neighborhood size, including the point itself, for a core point.
    pub min_samples: usize,
}

impl From<&ClusteringConfig> for ClusterParams {
    #[inline]
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            epsilon: config.epsilon,
            min_samples: config.min_samples,
        }
    }
}

/// Assign a cluster label to each vector; `OUTLIER` means no cluster.
///
/// DBSCAN over cosine distance (`1 - dot` for unit vectors). Connected dense
/// regions merge transitively into one label. Label numbering follows input
/// order and is arbitrary across permutations; membership is what callers may
/// rely on. Quadratic in batch size, so batches must stay bounded.
#[inline]
pub fn cluster(vectors: &[Vec<f32>], params: &ClusterParams) -> Vec<i64> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }

    let neighborhoods = build_neighborhoods(vectors, params.epsilon);

    let mut labels = vec![OUTLIER; n];
    let mut visited = vec![false; n];
    let mut next_label = 0i64;

    for point in 0..n {
        if visited[point] {
            continue;
        }
        visited[point] = true;

        if neighborhoods[point].len() < params.min_samples {
            // Not a core point; may still be claimed later as a border point.
            continue;
        }

        let label = next_label;
        next_label += 1;
        labels[point] = label;

        let mut seeds: VecDeque<usize> = neighborhoods[point]
            .iter()
            .copied()
            .filter(|&idx| idx != point)
            .collect();

        while let Some(neighbor) = seeds.pop_front() {
            if labels[neighbor] == OUTLIER {
                labels[neighbor] = label;
            }

            if visited[neighbor] {
                continue;
            }
            visited[neighbor] = true;

            // Only core points extend the cluster further.
            if neighborhoods[neighbor].len() >= params.min_samples {
                for &candidate in &neighborhoods[neighbor] {
                    if !visited[candidate] || labels[candidate] == OUTLIER {
                        seeds.push_back(candidate);
                    }
                }
            }
        }
    }

    let cluster_count = next_label;
    let outliers = labels.iter().filter(|&&l| l == OUTLIER).count();
    debug!(
        "Clustered {} vectors into {} clusters ({} outliers)",
        n, cluster_count, outliers
    );

    labels
}

/// Epsilon-neighborhood of every point, self included.
fn build_neighborhoods(vectors: &[Vec<f32>], epsilon: f32) -> Vec<Vec<usize>> {
    let n = vectors.len();
    let mut neighborhoods = vec![Vec::new(); n];

    for i in 0..n {
        for j in i..n {
            if cosine_distance(&vectors[i], &vectors[j]) <= epsilon {
                neighborhoods[i].push(j);
                if j != i {
                    neighborhoods[j].push(i);
                }
            }
        }
    }

    neighborhoods
}

/// Cosine distance for unit vectors. A zero vector is at distance 1 from
/// everything, including itself, which keeps empty-text records unclusterable.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    1.0 - dot
}

/// Member count per cluster label, outliers excluded.
#[inline]
pub fn cluster_sizes(labels: &[i64]) -> HashMap<i64, usize> {
    let mut sizes = HashMap::new();
    for &label in labels {
        if label != OUTLIER {
            *sizes.entry(label).or_insert(0) += 1;
        }
    }
    sizes
}
