//! Data types for documents, chunks, and retrieval results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An indexed source document and its ordered chunks.
///
/// Documents are immutable once indexed: uploading the same ID again builds a
/// new `Document` that replaces this one wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The full extracted text.
    pub text: String,
    /// Chunks in document order; `chunks[i].index == i`.
    pub chunks: Vec<Chunk>,
    /// When the document was indexed.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a document stamped with the current time.
    pub fn new(id: impl Into<String>, text: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self { id: id.into(), text: text.into(), chunks, created_at: Utc::now() }
    }

    /// Embedding dimension shared by every chunk.
    pub fn dimensions(&self) -> usize {
        self.chunks.first().map_or(0, |c| c.embedding.len())
    }
}

/// A contiguous span of a [`Document`], the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Zero-based position within the document.
    pub index: usize,
    /// The chunk text, equal to `source[start..end]`.
    pub text: String,
    /// Byte offset of the first character in the source text.
    pub start: usize,
    /// Byte offset one past the last character in the source text.
    pub end: usize,
    /// The vector embedding for this chunk's text; empty until embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Precomputed L2 norm of `embedding`, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm: Option<f32>,
}

impl Chunk {
    /// Create an un-embedded chunk.
    pub fn new(
        document_id: impl Into<String>,
        index: usize,
        text: impl Into<String>,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            index,
            text: text.into(),
            start,
            end,
            embedding: Vec::new(),
            norm: None,
        }
    }

    /// Identifier of the form `{document_id}_{index}`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.document_id, self.index)
    }

    /// Attach an embedding, clearing any stale norm.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self.norm = None;
        self
    }
}

/// One retrieved [`Chunk`] with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]` (higher is more relevant).
    pub similarity: f32,
    /// Zero-based rank by descending similarity.
    pub rank: usize,
}

impl RetrievedChunk {
    fn score(&self) -> f32 {
        if self.similarity.is_nan() { 0.0 } else { self.similarity }
    }
}

/// The ranked chunks returned for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// The document that was searched.
    pub document_id: String,
    /// Hits ordered by rank.
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    /// Number of retrieved chunks.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Best similarity, or `None` when nothing was retrieved. A NaN
    /// similarity counts as 0.
    pub fn max_similarity(&self) -> Option<f32> {
        self.hits.iter().map(RetrievedChunk::score).reduce(f32::max)
    }

    /// Similarities in rank order, NaN read as 0.
    pub fn similarities(&self) -> Vec<f32> {
        self.hits.iter().map(RetrievedChunk::score).collect()
    }

    /// Retrieved chunk texts in rank order.
    pub fn texts(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.chunk.text.as_str()).collect()
    }

    /// All retrieved texts joined into one context string.
    pub fn context(&self) -> String {
        self.texts().join("\n\n")
    }

    /// The top-ranked hit.
    pub fn best(&self) -> Option<&RetrievedChunk> {
        self.hits.first()
    }

    /// Source attributions for a response payload.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.hits
            .iter()
            .map(|h| SourceRef {
                text: h.chunk.text.clone(),
                similarity: h.score(),
                chunk_index: h.chunk.index,
            })
            .collect()
    }
}

/// A source passage cited in an answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    /// The passage text.
    pub text: String,
    /// Its similarity to the question.
    pub similarity: f32,
    /// Its chunk index in the document.
    pub chunk_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(index: usize, similarity: f32, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk::new("doc", index, format!("chunk {index}"), 0, 7),
            similarity,
            rank,
        }
    }

    #[test]
    fn max_similarity_of_empty_result_is_none() {
        assert_eq!(RetrievalResult::default().max_similarity(), None);
    }

    #[test]
    fn sources_follow_rank_order() {
        let result = RetrievalResult {
            document_id: "doc".into(),
            hits: vec![hit(2, 0.9, 0), hit(0, 0.4, 1)],
        };
        let sources = result.sources();
        assert_eq!(sources[0].chunk_index, 2);
        assert_eq!(sources[1].chunk_index, 0);
        assert_eq!(result.max_similarity(), Some(0.9));
        assert_eq!(result.context(), "chunk 2\n\nchunk 0");
    }

    #[test]
    fn nan_similarities_read_as_zero() {
        let result = RetrievalResult {
            document_id: "doc".into(),
            hits: vec![hit(0, f32::NAN, 0), hit(1, f32::NAN, 1)],
        };
        assert_eq!(result.max_similarity(), Some(0.0));
        assert_eq!(result.similarities(), vec![0.0, 0.0]);
        assert_eq!(result.sources()[0].similarity, 0.0);
    }

    #[test]
    fn chunk_json_omits_missing_embedding() {
        let chunk = Chunk::new("doc", 0, "Rate: $1,250.00 USD", 0, 19);
        let json = serde_json::to_value(chunk).unwrap();
        assert!(json.get("embedding").is_none());
        assert!(json.get("norm").is_none());
        assert_eq!(json["index"], 0);
        assert_eq!(Chunk::new("doc", 3, "x", 0, 1).id(), "doc_3");
    }
}
