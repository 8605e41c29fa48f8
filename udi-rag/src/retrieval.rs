//! Similarity ranking of a document's chunks against a query.
//!
//! Ranking is deterministic: hits are ordered by descending similarity and
//! equal scores are broken by ascending chunk index. Asking for more chunks
//! than a document has returns all of them; too few results is a guardrail
//! concern, not a retrieval error.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::document::{Chunk, Document, RetrievalResult, RetrievedChunk};
use crate::error::{RagError, Result};
use crate::index::EmbeddingIndex;
use crate::lexicon::{CompiledLexicon, tokenize};

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the result is not
/// finite. The result is clamped to `[-1, 1]` to absorb rounding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    similarity_from_parts(dot, norm_a, norm_b)
}

/// Euclidean length of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn similarity_from_parts(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() { similarity.clamp(-1.0, 1.0) } else { 0.0 }
}

/// Rank `document`'s chunks by cosine similarity to `query` and keep the top `k`.
///
/// # Errors
///
/// Returns [`RagError::DimensionMismatch`] if `query` and the document's
/// embeddings differ in length.
pub fn rank(document: &Document, query: &[f32], k: usize) -> Result<RetrievalResult> {
    let dimensions = document.dimensions();
    if query.len() != dimensions {
        return Err(RagError::DimensionMismatch { expected: dimensions, actual: query.len() });
    }

    let query_norm = l2_norm(query);
    let scored = document.chunks.iter().map(|chunk| {
        let dot: f32 = chunk.embedding.iter().zip(query).map(|(x, y)| x * y).sum();
        let chunk_norm = chunk.norm.unwrap_or_else(|| l2_norm(&chunk.embedding));
        (chunk, similarity_from_parts(dot, chunk_norm, query_norm))
    });
    Ok(top_k(document, scored, k))
}

/// Rank `document`'s chunks by how many of the query's content tokens they
/// contain. Scores are in `[0, 1]`.
///
/// Used when the query cannot be embedded.
pub fn rank_lexical(
    document: &Document,
    query: &str,
    lexicon: &CompiledLexicon,
    k: usize,
) -> RetrievalResult {
    let query_tokens = lexicon.content_tokens(query);
    let scored = document.chunks.iter().map(|chunk| {
        if query_tokens.is_empty() {
            return (chunk, 0.0);
        }
        let chunk_tokens: HashSet<String> = tokenize(&chunk.text).collect();
        let present = query_tokens.iter().filter(|t| chunk_tokens.contains(*t)).count();
        (chunk, present as f32 / query_tokens.len() as f32)
    });
    top_k(document, scored, k)
}

fn top_k<'a>(
    document: &Document,
    scored: impl Iterator<Item = (&'a Chunk, f32)>,
    k: usize,
) -> RetrievalResult {
    // NaN and -0.0 rank as 0.0
    let mut scored: Vec<_> = scored
        .map(|(chunk, score)| (chunk, if score.is_nan() || score == 0.0 { 0.0 } else { score }))
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| sb.total_cmp(sa).then_with(|| a.index.cmp(&b.index)));
    scored.truncate(k);

    let hits = scored
        .into_iter()
        .enumerate()
        .map(|(rank, (chunk, similarity))| RetrievedChunk {
            chunk: chunk.clone(),
            similarity,
            rank,
        })
        .collect();
    RetrievalResult { document_id: document.id.clone(), hits }
}

/// Top-K retrieval over an [`EmbeddingIndex`].
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(index.clone(), 3);
/// let result = retriever.retrieve("bol-1", &query_vector, 3).await?;
/// ```
#[derive(Clone)]
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    default_k: usize,
}

impl Retriever {
    /// Create a retriever over `index` returning `default_k` hits by default.
    pub fn new(index: Arc<EmbeddingIndex>, default_k: usize) -> Self {
        Self { index, default_k }
    }

    /// The configured default `k`.
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Return the `k` chunks of `document_id` most similar to `query_vector`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document has no indexed
    /// chunks and [`RagError::DimensionMismatch`] for a wrongly sized query.
    pub async fn retrieve(
        &self,
        document_id: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<RetrievalResult> {
        let document = self.index.document(document_id).await?;
        let result = rank(&document, query_vector, k)?;
        debug!(
            document.id = document_id,
            k,
            hits = result.len(),
            max_similarity = result.max_similarity(),
            "retrieved chunks"
        );
        Ok(result)
    }

    /// Lexical ranking of `document_id` against `query`, for when the query
    /// cannot be embedded.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document has no indexed chunks.
    pub async fn retrieve_lexical(
        &self,
        document_id: &str,
        query: &str,
        lexicon: &CompiledLexicon,
        k: usize,
    ) -> Result<RetrievalResult> {
        let document = self.index.document(document_id).await?;
        Ok(rank_lexical(&document, query, lexicon, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::lexicon::Lexicon;

    fn document(vectors: &[Vec<f32>]) -> Document {
        let chunks = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| {
                Chunk::new("doc", i, format!("chunk {i}"), i, i + 1).with_embedding(v.clone())
            })
            .collect();
        Document::new("doc", "", chunks)
    }

    #[test]
    fn self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![-2.0, 0.5, 1.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn zero_vectors_have_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn ranking_orders_by_similarity_then_index() {
        let doc = document(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 1.0]]);
        let result = rank(&doc, &[1.0, 0.0], 3).unwrap();
        let order: Vec<usize> = result.hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        let ranks: Vec<usize> = result.hits.iter().map(|h| h.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn non_finite_embeddings_rank_as_zero() {
        let doc = document(&[vec![f32::NAN, 0.0], vec![1.0, 0.0], vec![f32::INFINITY, 1.0]]);
        let result = rank(&doc, &[1.0, 0.0], 3).unwrap();
        let order: Vec<usize> = result.hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(result.similarities(), vec![1.0, 0.0, 0.0]);

        let result = rank(&doc, &[f32::NAN, 0.0], 3).unwrap();
        let order: Vec<usize> = result.hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(result.hits.iter().all(|h| h.similarity == 0.0));
    }

    #[test]
    fn negative_zero_ties_with_zero() {
        let doc = document(&[vec![-1.0, 0.0], vec![1.0, 0.0]]);
        let result = rank(&doc, &[0.0, -1.0], 2).unwrap();
        let order: Vec<usize> = result.hits.iter().map(|h| h.chunk.index).collect();
        assert_eq!(order, vec![0, 1]);
        assert!(result.hits.iter().all(|h| h.similarity.is_sign_positive()));
    }

    #[test]
    fn asking_for_more_than_available_returns_everything() {
        let doc = document(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(rank(&doc, &[1.0, 1.0], 10).unwrap().len(), 2);
        assert!(rank(&doc, &[1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn precomputed_norms_are_used() {
        let mut doc = document(&[vec![3.0, 4.0]]);
        doc.chunks[0].norm = Some(5.0);
        let result = rank(&doc, &[3.0, 4.0], 1).unwrap();
        assert!((result.hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_query_dimension_is_rejected() {
        let doc = document(&[vec![1.0, 0.0]]);
        assert!(matches!(
            rank(&doc, &[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn lexical_ranking_scores_query_coverage() {
        let chunks = vec![
            Chunk::new("doc", 0, "Carrier: Swift Transport", 0, 24),
            Chunk::new("doc", 1, "Rate: $1,250.00 USD", 25, 44),
        ];
        let doc = Document::new("doc", "", chunks);
        let lexicon = Lexicon::default().compile();
        let result = rank_lexical(&doc, "What is the rate in USD?", &lexicon, 2);
        assert_eq!(result.hits[0].chunk.index, 1);
        assert!((result.hits[0].similarity - 1.0).abs() < f32::EPSILON);
        assert_eq!(result.hits[1].similarity, 0.0);
    }

    #[tokio::test]
    async fn retriever_rejects_unknown_documents() {
        let index = Arc::new(EmbeddingIndex::new(Arc::new(HashingEmbedder::new(2))));
        let retriever = Retriever::new(index, 3);
        assert_eq!(retriever.default_k(), 3);
        assert!(matches!(
            retriever.retrieve("missing", &[1.0, 0.0], 3).await,
            Err(RagError::UnknownDocument { .. })
        ));
    }
}
