//! # udi-rag
//!
//! Retrieval, guardrail and confidence core for grounded question answering
//! over logistics documents (rate confirmations, bills of lading, load
//! tenders).
//!
//! ## Overview
//!
//! A document is split into overlapping, sentence-bounded chunks, each chunk
//! is embedded, and questions are answered from the most similar chunks. An
//! answer is only surfaced when the evidence is good enough; otherwise the
//! caller gets a refusal that states why and how similar the best evidence
//! was.
//!
//! - [`SentenceChunker`] - sentence-packed chunks with word overlap
//! - [`EmbeddingIndex`] - per-document embedded chunks with atomic replacement
//! - [`Retriever`] - deterministic top-K cosine ranking
//! - [`GuardrailEvaluator`] - similarity, sufficiency, quality and grounding checks
//! - [`ConfidenceScorer`] - weighted similarity, agreement and coverage score
//! - [`DocumentQa`] - the service tying them together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use udi_rag::{DocumentQa, HashingEmbedder};
//!
//! let qa = DocumentQa::builder()
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .open()?;
//!
//! qa.process_document("bol-1", "Carrier: Swift Transport LLC. Rate: $1,250.00 USD.").await?;
//! let response = qa.answer_question("bol-1", "What is the rate?").await?;
//! println!("{} ({:?})", response.answer, response.confidence_band);
//! ```
//!
//! ## Features
//!
//! - `openrouter` - [`openrouter::OpenRouterClient`], an LLM collaborator for
//!   answer generation and field extraction

pub mod chunking;
pub mod confidence;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod guardrail;
pub mod index;
pub mod lexicon;
#[cfg(feature = "openrouter")]
pub mod openrouter;
pub mod retrieval;
pub mod service;
pub mod telemetry;

pub use chunking::{Chunker, SentenceChunker};
pub use confidence::{ConfidenceBand, ConfidenceFactors, ConfidenceScore, ConfidenceScorer};
pub use config::{
    ChunkingConfig, ConfidenceConfig, GuardrailConfig, RagConfig, RagConfigBuilder,
    RetrievalConfig,
};
pub use document::{Chunk, Document, RetrievalResult, RetrievedChunk, SourceRef};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{RagError, Result};
pub use extract::{
    Extraction, ExtractionMethod, ExtractionModel, FieldExtractor, RuleExtractor, ShipmentRecord,
    parse_model_output,
};
pub use generation::{
    AnswerChain, AnswerGenerator, AnswerSource, AnswerStrategy, BestEvidenceStrategy, DraftAnswer,
    GenerativeStrategy,
};
pub use guardrail::{GuardrailEvaluator, GuardrailReason, GuardrailVerdict};
pub use index::EmbeddingIndex;
pub use lexicon::{CompiledLexicon, Lexicon};
#[cfg(feature = "openrouter")]
pub use openrouter::OpenRouterClient;
pub use retrieval::{Retriever, cosine_similarity};
pub use service::{DocumentQa, DocumentQaBuilder, QaResponse, RetrievalMode};
