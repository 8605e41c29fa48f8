//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;
use crate::lexicon::tokenize;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding model behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// Failures should be reported as
/// [`RagError::EmbeddingUnavailable`](crate::RagError::EmbeddingUnavailable).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Dimension of the MiniLM-class sentence embeddings the core is tuned for.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// A deterministic, offline embedder based on feature hashing.
///
/// Each normalized token is hashed (FNV-1a) into one of `dimensions` buckets
/// with a hash-derived sign, and the resulting bag-of-words vector is
/// L2-normalized. Texts that share vocabulary get a high cosine similarity;
/// texts with disjoint vocabulary score about zero. It carries no semantics
/// beyond shared tokens, which makes it useful for tests and for running the
/// core without a model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    /// Embed synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cosine_similarity;

    #[tokio::test]
    async fn vectors_have_the_declared_dimension() {
        let embedder = HashingEmbedder::default();
        let vector = embedder.embed("Rate: $1,250.00 USD").await.unwrap();
        assert_eq!(vector.len(), embedder.dimensions());
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn batch_matches_single_calls() {
        let embedder = HashingEmbedder::new(64);
        let batch = embedder.embed_batch(&["carrier name", "pickup date"]).await.unwrap();
        assert_eq!(batch[0], embedder.embed_text("carrier name"));
        assert_eq!(batch[1], embedder.embed_text("pickup date"));
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let chunk = embedder.embed_text("Rate: $1,250.00 USD");
        let related = embedder.embed_text("What is the rate in USD?");
        let unrelated = embedder.embed_text("Reefer trailer temperature log");
        assert!(cosine_similarity(&chunk, &related) > cosine_similarity(&chunk, &unrelated));
    }

    #[test]
    fn text_without_tokens_is_the_zero_vector() {
        let vector = HashingEmbedder::new(8).embed_text("  ... ");
        assert!(vector.iter().all(|x| *x == 0.0));
    }
}
