use async_trait::async_trait;

use super::{EmbeddingBackend, EmbeddingError, normalize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic local embedding backend based on feature hashing.
///
/// Words and character trigrams are hashed into a fixed number of signed
/// buckets. Identical text always produces an identical vector, which makes
/// this backend suitable for offline runs and for pipeline tests that must
/// not depend on a model server. Near-duplicate texts share most of their
/// tokens and land close together under cosine distance.
#[derive(Debug, Clone)]
pub struct HashingBackend {
    dimension: usize,
}

impl HashingBackend {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text.to_lowercase().split_whitespace() {
            self.bump(&mut vector, token.as_bytes());

            // Character trigrams soften tokenization differences between
            // otherwise near-identical texts.
            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                self.bump(&mut vector, gram.as_bytes());
            }
        }

        normalize(&mut vector);
        vector
    }

    fn bump(&self, vector: &mut [f32], feature: &[u8]) {
        let hash = fnv1a(feature);
        let index = ((hash >> 1) % self.dimension as u64) as usize;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

/// FNV-1a. Stable across runs and platforms, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
