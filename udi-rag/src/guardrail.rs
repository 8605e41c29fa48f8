//! Guardrails that decide whether an answer may be surfaced.
//!
//! [`GuardrailEvaluator::evaluate`] runs three checks in order and stops at
//! the first one that fails:
//!
//! 1. **Similarity**: the best retrieved chunk must reach `min_similarity`.
//! 2. **Sufficiency and quality**: at least `min_chunks` chunks, and at least
//!    one of them `min_chunk_chars` long.
//! 3. **Grounding**: the answer must not admit missing information, and
//!    enough of its content tokens must occur in the retrieved context.
//!
//! The evaluator only classifies; it never rewrites the answer. A triggered
//! verdict is a normal outcome, not an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GuardrailConfig;
use crate::document::RetrievalResult;
use crate::lexicon::CompiledLexicon;

/// Why a guardrail fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardrailReason {
    /// The best chunk is not similar enough to the question.
    LowSimilarity,
    /// Too few chunks were retrieved.
    InsufficientChunks,
    /// Every retrieved chunk is too short to be meaningful evidence.
    LowQualityChunk,
    /// The answer is not supported by the retrieved context.
    PoorGrounding,
    /// No guardrail fired.
    None,
}

impl GuardrailReason {
    /// Wire name, e.g. `LOW_SIMILARITY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowSimilarity => "LOW_SIMILARITY",
            Self::InsufficientChunks => "INSUFFICIENT_CHUNKS",
            Self::LowQualityChunk => "LOW_QUALITY_CHUNK",
            Self::PoorGrounding => "POOR_GROUNDING",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for GuardrailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a guardrail evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    /// Whether the answer must be replaced by a refusal.
    pub triggered: bool,
    /// Which check fired, or [`GuardrailReason::None`].
    pub reason: GuardrailReason,
    /// Human-readable description of the decision.
    pub explanation: String,
    /// Best observed similarity (0.0 when nothing was retrieved).
    pub max_similarity: f32,
}

impl GuardrailVerdict {
    /// A passing verdict.
    pub fn pass(max_similarity: f32) -> Self {
        Self {
            triggered: false,
            reason: GuardrailReason::None,
            explanation: "all guardrails passed".to_string(),
            max_similarity,
        }
    }

    /// A triggered verdict.
    pub fn triggered(
        reason: GuardrailReason,
        explanation: impl Into<String>,
        max_similarity: f32,
    ) -> Self {
        Self { triggered: true, reason, explanation: explanation.into(), max_similarity }
    }

    /// Whether the answer may be surfaced.
    pub fn is_pass(&self) -> bool {
        !self.triggered
    }

    /// The fixed refusal shown to the user in place of the answer.
    ///
    /// Always states the reason and the observed similarity.
    pub fn refusal_message(&self) -> String {
        let similarity = self.max_similarity;
        match self.reason {
            GuardrailReason::LowSimilarity => format!(
                "I cannot find this information in the document. The retrieved content has low \
                 relevance (similarity: {similarity:.2})."
            ),
            GuardrailReason::InsufficientChunks => format!(
                "Insufficient context found in the document to provide a reliable answer \
                 (similarity: {similarity:.2})."
            ),
            GuardrailReason::LowQualityChunk => format!(
                "The retrieved document sections are too short to provide a meaningful answer \
                 (similarity: {similarity:.2})."
            ),
            GuardrailReason::PoorGrounding => format!(
                "I cannot find a well-supported answer in the document. The answer is poorly \
                 grounded in the retrieved content (similarity: {similarity:.2})."
            ),
            GuardrailReason::None => String::new(),
        }
    }
}

/// Applies the configured guardrail checks.
///
/// Evaluation is a pure function of its inputs: identical inputs always give
/// identical verdicts.
#[derive(Debug, Clone)]
pub struct GuardrailEvaluator {
    config: GuardrailConfig,
    lexicon: CompiledLexicon,
}

impl Default for GuardrailEvaluator {
    fn default() -> Self {
        Self::new(GuardrailConfig::default())
    }
}

impl GuardrailEvaluator {
    /// Create an evaluator from thresholds and lexicon tables.
    pub fn new(config: GuardrailConfig) -> Self {
        let lexicon = config.lexicon.compile();
        Self { config, lexicon }
    }

    /// The active thresholds.
    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// The compiled lexicon shared with grounding and coverage measures.
    pub fn lexicon(&self) -> &CompiledLexicon {
        &self.lexicon
    }

    /// Run the retrieval-only checks (similarity, sufficiency, quality).
    ///
    /// Returns `Some(verdict)` when one fires. Callers use this to refuse
    /// before paying for answer generation.
    pub fn check_retrieval(&self, result: &RetrievalResult) -> Option<GuardrailVerdict> {
        let max_similarity = result.max_similarity().unwrap_or(0.0);

        if let Some(best) = result.max_similarity() {
            if best < self.config.min_similarity {
                return Some(GuardrailVerdict::triggered(
                    GuardrailReason::LowSimilarity,
                    format!(
                        "best similarity {best:.3} is below the minimum {:.3}",
                        self.config.min_similarity
                    ),
                    max_similarity,
                ));
            }
        }

        if result.len() < self.config.min_chunks {
            return Some(GuardrailVerdict::triggered(
                GuardrailReason::InsufficientChunks,
                format!(
                    "retrieved {} chunk(s), at least {} required",
                    result.len(),
                    self.config.min_chunks
                ),
                max_similarity,
            ));
        }

        let min_chars = self.config.min_chunk_chars;
        if !result.is_empty()
            && result.hits.iter().all(|h| h.chunk.text.trim().chars().count() < min_chars)
        {
            return Some(GuardrailVerdict::triggered(
                GuardrailReason::LowQualityChunk,
                format!("every retrieved chunk is shorter than {min_chars} characters"),
                max_similarity,
            ));
        }

        None
    }

    /// Run the grounding check on a candidate answer.
    pub fn check_grounding(
        &self,
        result: &RetrievalResult,
        candidate_answer: &str,
    ) -> Option<GuardrailVerdict> {
        let max_similarity = result.max_similarity().unwrap_or(0.0);

        if let Some(phrase) = self.lexicon.missing_info_phrase(candidate_answer) {
            return Some(GuardrailVerdict::triggered(
                GuardrailReason::PoorGrounding,
                format!("answer indicates missing information (\"{phrase}\")"),
                max_similarity,
            ));
        }

        let overlap = self.grounding_overlap(result, candidate_answer);
        if overlap < self.config.min_grounding_overlap {
            return Some(GuardrailVerdict::triggered(
                GuardrailReason::PoorGrounding,
                format!(
                    "answer token overlap {overlap:.2} is below the minimum {:.2}",
                    self.config.min_grounding_overlap
                ),
                max_similarity,
            ));
        }

        None
    }

    /// Fraction of the answer's content tokens found in the retrieved context.
    pub fn grounding_overlap(&self, result: &RetrievalResult, candidate_answer: &str) -> f32 {
        self.lexicon.overlap_ratio(candidate_answer, &result.context())
    }

    /// Evaluate all checks in order; the first that fails wins.
    pub fn evaluate(&self, result: &RetrievalResult, candidate_answer: &str) -> GuardrailVerdict {
        let verdict = self
            .check_retrieval(result)
            .or_else(|| self.check_grounding(result, candidate_answer))
            .unwrap_or_else(|| GuardrailVerdict::pass(result.max_similarity().unwrap_or(0.0)));

        debug!(
            document.id = %result.document_id,
            triggered = verdict.triggered,
            reason = %verdict.reason,
            max_similarity = verdict.max_similarity,
            "guardrail evaluated"
        );
        verdict
    }
}
