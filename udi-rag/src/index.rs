//! In-memory embedding index.
//!
//! This module provides [`EmbeddingIndex`], a map from document ID to an
//! immutable, fully embedded [`Document`], protected by a
//! `tokio::sync::RwLock`. Writers build the replacement document completely
//! before taking the lock and swap it in with a single insert, so a reader
//! either sees the old chunk set or the new one, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::{Chunk, Document};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Stores embedded chunks per document and delegates embedding to an
/// [`EmbeddingProvider`].
///
/// The index keeps raw vectors; normalization happens at query time in the
/// [`retrieval`](crate::retrieval) module.
///
/// # Example
///
/// ```rust,ignore
/// use udi_rag::{EmbeddingIndex, HashingEmbedder};
///
/// let index = EmbeddingIndex::new(Arc::new(HashingEmbedder::default()));
/// let count = index.add_document("bol-1", embedded_chunks).await?;
/// let chunks = index.get_chunks("bol-1").await?;
/// ```
pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    embed_timeout: Duration,
    documents: RwLock<HashMap<String, Arc<Document>>>,
}

impl EmbeddingIndex {
    /// Create an empty index backed by `provider`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider, embed_timeout: DEFAULT_EMBED_TIMEOUT, documents: RwLock::default() }
    }

    /// Bound every embedding call by `timeout`.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// The embedding provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed one text through the provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if the provider fails, does
    /// not answer within the embedding timeout, or returns an empty or
    /// non-finite vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let outcome = tokio::time::timeout(self.embed_timeout, self.provider.embed(text)).await;
        let vector = self.unwrap_outcome(outcome)?;
        self.check_vector(&vector, vector.len())?;
        Ok(vector)
    }

    /// Embed a query for ranking against `document_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document is not indexed
    /// and [`RagError::EmbeddingUnavailable`] for everything
    /// [`embed`](Self::embed) rejects, plus a vector whose length differs
    /// from the document's embeddings.
    pub async fn embed_query(&self, document_id: &str, text: &str) -> Result<Vec<f32>> {
        let dimensions = self.document(document_id).await?.dimensions();
        let vector = self.embed(text).await?;
        self.check_vector(&vector, dimensions)?;
        Ok(vector)
    }

    /// Embed several texts through the provider, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`] if the provider fails, times
    /// out, returns the wrong number of vectors, or returns vectors that are
    /// empty, non-finite or of differing lengths.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let outcome =
            tokio::time::timeout(self.embed_timeout, self.provider.embed_batch(texts)).await;
        let vectors = self.unwrap_outcome(outcome)?;
        if vectors.len() != texts.len() {
            return Err(self.unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let dimensions = vectors.first().map_or(0, Vec::len);
        for vector in &vectors {
            self.check_vector(vector, dimensions)?;
        }
        Ok(vectors)
    }

    fn check_vector(&self, vector: &[f32], dimensions: usize) -> Result<()> {
        if vector.is_empty() {
            return Err(self.unavailable("empty embedding".to_string()));
        }
        if vector.len() != dimensions {
            return Err(self.unavailable(format!(
                "embedding has {} dimensions, expected {dimensions}",
                vector.len()
            )));
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(self.unavailable("embedding contains non-finite values".to_string()));
        }
        Ok(())
    }

    fn unwrap_outcome<T>(
        &self,
        outcome: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ RagError::EmbeddingUnavailable { .. })) => Err(e),
            Ok(Err(e)) => Err(self.unavailable(e.to_string())),
            Err(_) => {
                warn!(
                    provider = self.provider.name(),
                    timeout_ms = self.embed_timeout.as_millis() as u64,
                    "embedding timed out"
                );
                Err(self.unavailable(format!(
                    "timed out after {} ms",
                    self.embed_timeout.as_millis()
                )))
            }
        }
    }

    fn unavailable(&self, message: String) -> RagError {
        RagError::EmbeddingUnavailable { provider: self.provider.name().to_string(), message }
    }

    /// Index embedded `chunks` under `document_id`, replacing any previous
    /// entry atomically. Returns the number of chunks stored.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyChunkSet`] for zero chunks and
    /// [`RagError::DimensionMismatch`] when a chunk lacks an embedding or the
    /// embeddings disagree in length. The index is unchanged on error.
    pub async fn add_document(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<usize> {
        self.add_document_with_text(document_id, String::new(), chunks).await
    }

    /// Like [`add_document`](Self::add_document), also keeping the source text.
    pub async fn add_document_with_text(
        &self,
        document_id: &str,
        text: impl Into<String>,
        mut chunks: Vec<Chunk>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Err(RagError::EmptyChunkSet { document_id: document_id.to_string() });
        }

        let dimensions = chunks[0].embedding.len();
        if dimensions == 0 {
            return Err(RagError::DimensionMismatch {
                expected: self.provider.dimensions(),
                actual: 0,
            });
        }
        for (position, chunk) in chunks.iter_mut().enumerate() {
            if chunk.embedding.len() != dimensions {
                return Err(RagError::DimensionMismatch {
                    expected: dimensions,
                    actual: chunk.embedding.len(),
                });
            }
            chunk.document_id = document_id.to_string();
            chunk.index = position;
        }

        let count = chunks.len();
        let document = Arc::new(Document::new(document_id, text, chunks));
        let previous = self.documents.write().await.insert(document_id.to_string(), document);

        info!(
            document.id = document_id,
            chunk_count = count,
            dimensions,
            replaced = previous.is_some(),
            "indexed document"
        );
        Ok(count)
    }

    /// Remove a document and all of its chunks. Returns whether it existed.
    pub async fn remove_document(&self, document_id: &str) -> bool {
        let removed = self.documents.write().await.remove(document_id).is_some();
        debug!(document.id = document_id, removed, "remove document");
        removed
    }

    /// A consistent snapshot of one indexed document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if nothing is indexed under the ID.
    pub async fn document(&self, document_id: &str) -> Result<Arc<Document>> {
        self.documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| RagError::unknown(document_id))
    }

    /// The ordered chunks of a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if nothing is indexed under the ID.
    pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self.document(document_id).await?.chunks.clone())
    }

    /// Whether a document is indexed under the ID.
    pub async fn contains(&self, document_id: &str) -> bool {
        self.documents.read().await.contains_key(document_id)
    }

    /// IDs of all indexed documents, sorted.
    pub async fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of indexed documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Whether no documents are indexed.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Drop every indexed document.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }
}
