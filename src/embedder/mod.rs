// Embedder module
// Turns (title, description) pairs into unit-length vectors via a pluggable backend


pub mod hashing;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::EmbeddingConfig;

pub use hashing::HashingBackend;
pub use remote::RemoteBackend;

/// Norm guard so normalization never divides by zero.
const NORM_EPSILON: f32 = 1e-8;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The backend is wholly unreachable. Aborts the batch.
    #[error("Embedding backend unreachable: {0}")]
    Unreachable(String),

    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("Backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Per-index embedding outcome; an `Err` carries the reason and lets the
/// caller fail that record without aborting the batch.
pub type ItemEmbedding = Result<Vec<f32>, String>;

/// Capability boundary for the external embedding model.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn dimension(&self) -> usize;

    /// Returns exactly one vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Blends title and description embeddings into one unit vector per record.
///
/// Titles carry a fixed larger share of the semantic content than
/// descriptions; both are embedded separately and combined as a weighted sum
/// before normalization.
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    title_weight: f32,
    description_weight: f32,
}

impl Embedder {
    #[inline]
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        Self {
            backend,
            batch_size: config.batch_size as usize,
            title_weight: config.title_weight,
            description_weight: config.description_weight,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed a batch of (title, description) pairs.
    ///
    /// Pairs where both texts are empty yield a zero vector instead of a
    /// backend call; zero vectors have no neighbors under cosine distance, so
    /// downstream clustering treats those records as outliers.
    #[inline]
    pub async fn embed_pairs(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<ItemEmbedding>, EmbeddingError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} record pairs", pairs.len());

        let titles: Vec<String> = pairs.iter().map(|(t, _)| t.clone()).collect();
        let descriptions: Vec<String> = pairs.iter().map(|(_, d)| d.clone()).collect();

        let title_vectors = self.embed_texts(&titles).await?;
        let description_vectors = self.embed_texts(&descriptions).await?;

        let dimension = self.backend.dimension();
        let results = pairs
            .iter()
            .zip(title_vectors.into_iter().zip(description_vectors))
            .map(|((title, description), (title_vec, desc_vec))| {
                if title.trim().is_empty() && description.trim().is_empty() {
                    return Ok(vec![0.0; dimension]);
                }
                self.combine(&title_vec, &desc_vec, dimension)
            })
            .collect();

        Ok(results)
    }

    /// Push texts through the backend in bounded batches, preserving order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.batch_size) {
            let batch = self.backend.embed_batch(chunk).await?;
            if batch.len() != chunk.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: chunk.len(),
                    got: batch.len(),
                });
            }
            vectors.extend(batch);
        }

        Ok(vectors)
    }

    fn combine(&self, title_vec: &[f32], desc_vec: &[f32], dimension: usize) -> ItemEmbedding {
        if title_vec.len() != dimension || desc_vec.len() != dimension {
            return Err(format!(
                "backend vector dimension mismatch: expected {}, got {}/{}",
                dimension,
                title_vec.len(),
                desc_vec.len()
            ));
        }

        let mut combined: Vec<f32> = title_vec
            .iter()
            .zip(desc_vec)
            .map(|(t, d)| self.title_weight * t + self.description_weight * d)
            .collect();

        if combined.iter().any(|v| !v.is_finite()) {
            return Err("backend returned a non-finite vector component".to_string());
        }

        normalize(&mut combined);
        Ok(combined)
    }
}

/// Scale a vector to unit length. Zero vectors stay zero.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > NORM_EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
