//! Configuration for chunking, retrieval, guardrails and confidence scoring.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::lexicon::Lexicon;

/// Sentence-window chunking parameters, in words.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Word count at which a chunk is closed.
    pub target_words: usize,
    /// Words of the previous chunk repeated at the start of the next one.
    pub overlap_words: usize,
    /// A trailing chunk with fewer new words than this is merged into its
    /// predecessor when the merge stays within bounds.
    pub min_chunk_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { target_words: 500, overlap_words: 100, min_chunk_words: 5 }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks returned per question.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// Thresholds for the guardrail checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Refuse when the best similarity is below this value.
    pub min_similarity: f32,
    /// Refuse when fewer chunks than this were retrieved.
    pub min_chunks: usize,
    /// Refuse when every retrieved chunk is shorter than this (in characters).
    pub min_chunk_chars: usize,
    /// Refuse when fewer than this fraction of the answer's content tokens
    /// appear in the retrieved context.
    pub min_grounding_overlap: f32,
    /// Stop words and "missing information" phrases.
    pub lexicon: Lexicon,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.3,
            min_chunks: 1,
            min_chunk_chars: 20,
            min_grounding_overlap: 0.2,
            lexicon: Lexicon::default(),
        }
    }
}

/// Weights and band thresholds for confidence scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Weight of the mean retrieval similarity.
    pub similarity_weight: f32,
    /// Weight of cross-chunk agreement.
    pub agreement_weight: f32,
    /// Weight of answer coverage of the context.
    pub coverage_weight: f32,
    /// Scores at or above this value are [`High`](crate::confidence::ConfidenceBand::High).
    pub high_threshold: f32,
    /// Scores at or above this value (and below `high_threshold`) are
    /// [`Medium`](crate::confidence::ConfidenceBand::Medium).
    pub medium_threshold: f32,
    /// Upper bound applied to non-generative "best evidence" answers.
    pub best_evidence_cap: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.6,
            agreement_weight: 0.2,
            coverage_weight: 0.2,
            high_threshold: 0.7,
            medium_threshold: 0.4,
            best_evidence_cap: 0.69,
        }
    }
}

/// Configuration for the whole question-answering core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Chunking parameters.
    pub chunking: ChunkingConfig,
    /// Retrieval parameters.
    pub retrieval: RetrievalConfig,
    /// Guardrail thresholds.
    pub guardrail: GuardrailConfig,
    /// Confidence scoring parameters.
    pub confidence: ConfidenceConfig,
    /// Budget for one embedding call, in milliseconds.
    pub embed_timeout_ms: u64,
    /// Budget for one generation or extraction call, in milliseconds.
    pub generate_timeout_ms: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            guardrail: GuardrailConfig::default(),
            confidence: ConfidenceConfig::default(),
            embed_timeout_ms: 10_000,
            generate_timeout_ms: 30_000,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Embedding call budget.
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    /// Generation call budget.
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.generate_timeout_ms)
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.target_words == 0 {
            return Err(RagError::ConfigError("target_words must be greater than zero".into()));
        }
        if chunking.overlap_words >= chunking.target_words {
            return Err(RagError::ConfigError(format!(
                "overlap_words ({}) must be less than target_words ({})",
                chunking.overlap_words, chunking.target_words
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".into()));
        }

        let guardrail = &self.guardrail;
        if !(-1.0..=1.0).contains(&guardrail.min_similarity) {
            return Err(RagError::ConfigError(format!(
                "min_similarity ({}) must be within [-1, 1]",
                guardrail.min_similarity
            )));
        }
        if !(0.0..=1.0).contains(&guardrail.min_grounding_overlap) {
            return Err(RagError::ConfigError(format!(
                "min_grounding_overlap ({}) must be within [0, 1]",
                guardrail.min_grounding_overlap
            )));
        }

        let confidence = &self.confidence;
        let weights =
            [confidence.similarity_weight, confidence.agreement_weight, confidence.coverage_weight];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(RagError::ConfigError("confidence weights must not be negative".into()));
        }
        let total: f32 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(RagError::ConfigError(format!(
                "confidence weights must sum to 1.0 (got {total})"
            )));
        }
        if !(0.0 < confidence.medium_threshold
            && confidence.medium_threshold < confidence.high_threshold
            && confidence.high_threshold <= 1.0)
        {
            return Err(RagError::ConfigError(format!(
                "band thresholds must satisfy 0 < medium ({}) < high ({}) <= 1",
                confidence.medium_threshold, confidence.high_threshold
            )));
        }
        if confidence.best_evidence_cap >= confidence.high_threshold {
            return Err(RagError::ConfigError(format!(
                "best_evidence_cap ({}) must stay below the high threshold ({})",
                confidence.best_evidence_cap, confidence.high_threshold
            )));
        }

        if self.embed_timeout_ms == 0 || self.generate_timeout_ms == 0 {
            return Err(RagError::ConfigError("timeouts must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the chunk target size in words.
    pub fn target_words(mut self, words: usize) -> Self {
        self.config.chunking.target_words = words;
        self
    }

    /// Set the overlap between consecutive chunks in words.
    pub fn overlap_words(mut self, words: usize) -> Self {
        self.config.chunking.overlap_words = words;
        self
    }

    /// Set the minimum number of new words in a trailing chunk.
    pub fn min_chunk_words(mut self, words: usize) -> Self {
        self.config.chunking.min_chunk_words = words;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.retrieval.top_k = k;
        self
    }

    /// Set the minimum best similarity required to answer.
    pub fn min_similarity(mut self, threshold: f32) -> Self {
        self.config.guardrail.min_similarity = threshold;
        self
    }

    /// Set the minimum number of retrieved chunks required to answer.
    pub fn min_chunks(mut self, count: usize) -> Self {
        self.config.guardrail.min_chunks = count;
        self
    }

    /// Set the minimum chunk length, in characters, for evidence to count.
    pub fn min_chunk_chars(mut self, chars: usize) -> Self {
        self.config.guardrail.min_chunk_chars = chars;
        self
    }

    /// Set the minimum answer-to-context token overlap.
    pub fn min_grounding_overlap(mut self, ratio: f32) -> Self {
        self.config.guardrail.min_grounding_overlap = ratio;
        self
    }

    /// Replace the stop-word and missing-information tables.
    pub fn lexicon(mut self, lexicon: Lexicon) -> Self {
        self.config.guardrail.lexicon = lexicon;
        self
    }

    /// Replace the confidence scoring parameters.
    pub fn confidence(mut self, confidence: ConfidenceConfig) -> Self {
        self.config.confidence = confidence;
        self
    }

    /// Set the embedding call budget.
    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout_ms = duration_millis(timeout);
        self
    }

    /// Set the generation call budget.
    pub fn generate_timeout(mut self, timeout: Duration) -> Self {
        self.config.generate_timeout_ms = duration_millis(timeout);
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any parameter is out of range.
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunking.target_words, 500);
        assert_eq!(config.chunking.overlap_words, 100);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.guardrail.min_chunk_chars, 20);
        assert_eq!(config.embed_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn overlap_must_be_smaller_than_target() {
        let err = RagConfig::builder().target_words(50).overlap_words(50).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        assert!(RagConfig::builder().top_k(0).build().is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let confidence = ConfidenceConfig { similarity_weight: 0.9, ..Default::default() };
        assert!(RagConfig::builder().confidence(confidence).build().is_err());
    }

    #[test]
    fn best_evidence_cap_must_stay_below_high_band() {
        let confidence = ConfidenceConfig { best_evidence_cap: 0.7, ..Default::default() };
        assert!(RagConfig::builder().confidence(confidence).build().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = r#"{"retrieval": {"top_k": 5}, "guardrail": {"min_similarity": 0.5}}"#;
        let config: RagConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.guardrail.min_similarity - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.guardrail.min_chunks, 1);
        assert_eq!(config.chunking, ChunkingConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn builder_sets_timeouts() {
        let config = RagConfig::builder()
            .embed_timeout(Duration::from_millis(250))
            .generate_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(config.embed_timeout_ms, 250);
        assert_eq!(config.generate_timeout(), Duration::from_secs(2));
    }
}
