//! The document question-answering service.
//!
//! [`DocumentQa`] owns the embedding index and wires the chunker, retriever,
//! guardrails, confidence scorer and answer chain together. One instance
//! serves many requests concurrently; create it with
//! [`DocumentQa::builder()`] and shut it down with [`DocumentQa::close`].
//!
//! # Example
//!
//! ```rust,ignore
//! use udi_rag::{DocumentQa, HashingEmbedder, RagConfig};
//!
//! let qa = DocumentQa::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .generator(Arc::new(my_llm))   // optional
//!     .open()?;
//!
//! qa.process_document("bol-1", &text).await?;
//! let response = qa.answer_question("bol-1", "What is the rate?").await?;
//! if response.guardrail_triggered {
//!     println!("refused: {}", response.guardrail_reason);
//! }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::chunking::{Chunker, SentenceChunker};
use crate::confidence::{ConfidenceBand, ConfidenceScore, ConfidenceScorer};
use crate::config::RagConfig;
use crate::document::{Chunk, RetrievalResult, SourceRef};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::{Extraction, ExtractionModel, FieldExtractor};
use crate::generation::{AnswerChain, AnswerGenerator, AnswerSource};
use crate::guardrail::{GuardrailEvaluator, GuardrailReason, GuardrailVerdict};
use crate::index::EmbeddingIndex;
use crate::retrieval::Retriever;

/// How the chunks behind an answer were ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Cosine similarity of embeddings.
    Semantic,
    /// Query token coverage, used when the query could not be embedded.
    Lexical,
}

/// The answer to one question, or a refusal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResponse {
    /// The answer text, or the refusal message when a guardrail fired.
    pub answer: String,
    /// Retrieved passages backing the answer; empty on refusal.
    pub sources: Vec<SourceRef>,
    /// Confidence in `[0, 1]`; 0.0 on refusal.
    pub confidence: f32,
    /// Band of `confidence`.
    pub confidence_band: ConfidenceBand,
    /// Whether the answer was replaced by a refusal.
    pub guardrail_triggered: bool,
    /// Which guardrail fired, or `NONE`.
    pub guardrail_reason: GuardrailReason,
    /// Best similarity among the retrieved chunks.
    pub max_similarity: f32,
    /// Origin of the answer; `None` on refusal.
    pub answer_source: Option<AnswerSource>,
    /// How the chunks were ranked.
    pub retrieval_mode: RetrievalMode,
}

/// Question answering over indexed logistics documents.
pub struct DocumentQa {
    config: RagConfig,
    index: Arc<EmbeddingIndex>,
    retriever: Retriever,
    chunker: Arc<dyn Chunker>,
    guardrails: GuardrailEvaluator,
    scorer: ConfidenceScorer,
    answers: AnswerChain,
    extractor: FieldExtractor,
    closed: AtomicBool,
}

impl DocumentQa {
    /// Create a new [`DocumentQaBuilder`].
    pub fn builder() -> DocumentQaBuilder {
        DocumentQaBuilder::default()
    }

    /// The active configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The underlying embedding index.
    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting requests and drop every indexed document.
    ///
    /// Later calls fail with [`RagError::ServiceClosed`]. Closing twice is a
    /// no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let documents = self.index.len().await;
        self.index.clear().await;
        info!(documents, "document service closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() { Err(RagError::ServiceClosed) } else { Ok(()) }
    }

    /// Chunk, embed and index a document, replacing any previous version.
    /// Returns the number of chunks indexed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] for blank text and
    /// [`RagError::EmbeddingUnavailable`] when the chunks cannot be embedded.
    /// On error the index is left exactly as it was.
    pub async fn process_document(&self, document_id: &str, text: &str) -> Result<usize> {
        self.ensure_open()?;

        let chunks = self.chunker.chunk(document_id, text).inspect_err(|e| {
            warn!(document.id = document_id, error = %e, "document rejected by chunker");
        })?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let outcome = AssertUnwindSafe(self.index.embed_batch(&texts)).catch_unwind().await;
        let embeddings = outcome
            .unwrap_or_else(|_| {
                Err(RagError::EmbeddingUnavailable {
                    provider: self.index.provider().name().to_string(),
                    message: "embedding provider panicked".to_string(),
                })
            })
            .inspect_err(|e| {
                error!(document.id = document_id, error = %e, "embedding failed during ingestion");
            })?;

        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| chunk.with_embedding(embedding))
            .collect();
        self.index.add_document_with_text(document_id, text, chunks).await
    }

    /// Answer `question` from the chunks of `document_id`.
    ///
    /// A guardrail refusal is a successful response with
    /// `guardrail_triggered` set, the refusal text as `answer`, no sources
    /// and zero confidence. Best-evidence answers only face the retrieval
    /// checks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document is not indexed.
    /// Embedding and generation failures are absorbed by the fallbacks,
    /// including query vectors that are malformed or sized for another
    /// model.
    pub async fn answer_question(&self, document_id: &str, question: &str) -> Result<QaResponse> {
        self.ensure_open()?;
        if !self.index.contains(document_id).await {
            return Err(RagError::unknown(document_id));
        }

        let top_k = self.retriever.default_k();
        let semantic = async {
            let query_vector = self.index.embed_query(document_id, question).await?;
            self.retriever.retrieve(document_id, &query_vector, top_k).await
        }
        .await;
        let (result, mode) = match semantic {
            Ok(result) => (result, RetrievalMode::Semantic),
            // a replacement with new dimensions can land between embedding and ranking
            Err(
                e @ (RagError::EmbeddingUnavailable { .. } | RagError::DimensionMismatch { .. }),
            ) => {
                warn!(
                    document.id = document_id,
                    error = %e,
                    "query embedding failed, ranking lexically"
                );
                let lexicon = self.guardrails.lexicon();
                let result =
                    self.retriever.retrieve_lexical(document_id, question, lexicon, top_k).await?;
                (result, RetrievalMode::Lexical)
            }
            Err(e) => return Err(e),
        };

        if let Some(verdict) = self.guardrails.check_retrieval(&result) {
            return Ok(self.refuse(&result, verdict, mode));
        }

        let Some(draft) = self.answers.answer(question, &result).await else {
            let verdict = GuardrailVerdict::triggered(
                GuardrailReason::PoorGrounding,
                "no answer strategy produced an answer",
                result.max_similarity().unwrap_or(0.0),
            );
            return Ok(self.refuse(&result, verdict, mode));
        };

        let verdict = match draft.source {
            AnswerSource::Generated => self.guardrails.evaluate(&result, &draft.text),
            // the answer is retrieved text, so only the retrieval checks apply
            AnswerSource::BestEvidence => {
                GuardrailVerdict::pass(result.max_similarity().unwrap_or(0.0))
            }
        };
        if verdict.triggered {
            return Ok(self.refuse(&result, verdict, mode));
        }

        let mut confidence = self.scorer.score(&result, &draft.text, &verdict);
        if draft.source == AnswerSource::BestEvidence {
            confidence = self.scorer.cap(confidence, self.config.confidence.best_evidence_cap);
        }

        info!(
            document.id = document_id,
            max_similarity = verdict.max_similarity,
            confidence = confidence.score,
            band = %confidence.band,
            source = %draft.source,
            "question answered"
        );
        Ok(QaResponse {
            answer: draft.text,
            sources: result.sources(),
            confidence: confidence.score,
            confidence_band: confidence.band,
            guardrail_triggered: false,
            guardrail_reason: GuardrailReason::None,
            max_similarity: verdict.max_similarity,
            answer_source: Some(draft.source),
            retrieval_mode: mode,
        })
    }

    fn refuse(
        &self,
        result: &RetrievalResult,
        verdict: GuardrailVerdict,
        mode: RetrievalMode,
    ) -> QaResponse {
        info!(
            document.id = %result.document_id,
            reason = %verdict.reason,
            max_similarity = verdict.max_similarity,
            explanation = %verdict.explanation,
            "question refused"
        );
        let confidence = ConfidenceScore::zero();
        QaResponse {
            answer: verdict.refusal_message(),
            sources: Vec::new(),
            confidence: confidence.score,
            confidence_band: confidence.band,
            guardrail_triggered: true,
            guardrail_reason: verdict.reason,
            max_similarity: verdict.max_similarity,
            answer_source: None,
            retrieval_mode: mode,
        }
    }

    /// Remove a document and all of its chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if nothing is indexed under the ID.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.ensure_open()?;
        if self.index.remove_document(document_id).await {
            info!(document.id = document_id, "document deleted");
            Ok(())
        } else {
            Err(RagError::unknown(document_id))
        }
    }

    /// Extract structured shipment fields from an indexed document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document is not indexed.
    pub async fn extract_fields(&self, document_id: &str) -> Result<Extraction> {
        self.ensure_open()?;
        let document = self.index.document(document_id).await?;
        let extraction = self.extractor.extract(&document.text).await;
        info!(
            document.id = document_id,
            method = ?extraction.method,
            filled = extraction.record.filled(),
            "fields extracted"
        );
        Ok(extraction)
    }

    /// The full text a document was indexed from.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document is not indexed.
    pub async fn document_text(&self, document_id: &str) -> Result<String> {
        self.ensure_open()?;
        Ok(self.index.document(document_id).await?.text.clone())
    }

    /// The ordered chunks of a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnknownDocument`] if the document is not indexed.
    pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.ensure_open()?;
        self.index.get_chunks(document_id).await
    }

    /// IDs of all indexed documents, sorted.
    pub async fn document_ids(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.index.document_ids().await)
    }
}

/// Builder for constructing a [`DocumentQa`].
///
/// Only the embedding provider is required. Without a generator, answers
/// come from the best-matching chunk; without an extraction model, fields
/// come from the rule extractor. The chunker defaults to a
/// [`SentenceChunker`] built from the configuration.
#[derive(Default)]
pub struct DocumentQaBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    extraction_model: Option<Arc<dyn ExtractionModel>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl DocumentQaBuilder {
    /// Set the configuration (defaults to [`RagConfig::default`]).
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the structured-extraction model.
    pub fn extraction_model(mut self, model: Arc<dyn ExtractionModel>) -> Self {
        self.extraction_model = Some(model);
        self
    }

    /// Replace the default sentence chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Validate the configuration and open the service.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the embedding provider is missing
    /// or the configuration is invalid.
    pub fn open(self) -> Result<DocumentQa> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(SentenceChunker::from_config(&config.chunking)));

        let index = Arc::new(
            EmbeddingIndex::new(embedding_provider).with_embed_timeout(config.embed_timeout()),
        );
        let retriever = Retriever::new(index.clone(), config.retrieval.top_k);
        let guardrails = GuardrailEvaluator::new(config.guardrail.clone());
        let scorer = ConfidenceScorer::new(config.confidence.clone(), guardrails.lexicon().clone());
        let answers = AnswerChain::standard(self.generator, config.generate_timeout());
        let extractor = FieldExtractor::new(self.extraction_model, config.generate_timeout());

        info!(
            top_k = config.retrieval.top_k,
            min_similarity = config.guardrail.min_similarity,
            generator = answers.len() > 1,
            "document service opened"
        );
        Ok(DocumentQa {
            config,
            index,
            retriever,
            chunker,
            guardrails,
            scorer,
            answers,
            extractor,
            closed: AtomicBool::new(false),
        })
    }

    /// Alias for [`open`](Self::open).
    pub fn build(self) -> Result<DocumentQa> {
        self.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn service() -> DocumentQa {
        DocumentQa::builder()
            .embedding_provider(Arc::new(HashingEmbedder::new(64)))
            .open()
            .unwrap()
    }

    #[test]
    fn missing_embedder_is_a_config_error() {
        let err = DocumentQa::builder().open().err().unwrap();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("embedding_provider")));
    }

    #[test]
    fn invalid_config_is_rejected_at_open() {
        let config = RagConfig { embed_timeout_ms: 0, ..Default::default() };
        let result = DocumentQa::builder()
            .config(config)
            .embedding_provider(Arc::new(HashingEmbedder::default()))
            .open();
        assert!(matches!(result, Err(RagError::ConfigError(_))));
    }

    #[tokio::test]
    async fn blank_documents_are_rejected() {
        let qa = service();
        assert!(matches!(qa.process_document("doc", "  \n ").await, Err(RagError::EmptyDocument)));
        assert!(qa.document_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_documents_are_client_errors() {
        let qa = service();
        let err = qa.answer_question("nope", "What is the rate?").await.unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(qa.delete_document("nope").await, Err(RagError::UnknownDocument { .. })));
    }

    #[tokio::test]
    async fn text_and_chunks_are_kept() {
        let qa = service();
        let text = "Carrier: Swift Transport LLC. Rate: $1,250.00 USD.";
        assert_eq!(qa.process_document("doc", text).await.unwrap(), 1);
        assert_eq!(qa.document_text("doc").await.unwrap(), text);
        let chunks = qa.get_chunks("doc").await.unwrap();
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].embedding.len(), 64);
    }
}
