//! Multi-factor confidence scoring.
//!
//! ```text
//! avg_similarity  = mean(similarity clamped to [0, 1])
//! agreement       = 1 - stddev(clamped similarities) / 0.5
//! coverage        = answer-to-context token overlap
//! raw             = 0.6 * avg_similarity + 0.2 * agreement + 0.2 * coverage
//! confidence      = clamp(raw * (0 if guardrail triggered else 1), 0, 1)
//! ```
//!
//! 0.5 is the largest possible standard deviation of values in `[0, 1]`, so
//! the normalized spread is itself in `[0, 1]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfidenceConfig;
use crate::document::RetrievalResult;
use crate::guardrail::GuardrailVerdict;
use crate::lexicon::CompiledLexicon;

const MAX_UNIT_STDDEV: f32 = 0.5;

/// Coarse trust level derived from a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceBand {
    /// Below the medium threshold.
    Low,
    /// At or above the medium threshold, below the high one.
    Medium,
    /// At or above the high threshold.
    High,
}

impl ConfidenceBand {
    /// Classify `score` against the thresholds in `config`.
    pub fn classify(score: f32, config: &ConfidenceConfig) -> Self {
        if score >= config.high_threshold {
            Self::High
        } else if score >= config.medium_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

/// A normalized trust score and its band.
///
/// Always derived from a specific retrieval; never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Score in `[0, 1]`.
    pub score: f32,
    /// Band of `score`.
    pub band: ConfidenceBand,
}

impl ConfidenceScore {
    /// The zero score.
    pub fn zero() -> Self {
        Self { score: 0.0, band: ConfidenceBand::Low }
    }
}

/// The individual signals behind a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    /// Mean clamped similarity.
    pub avg_similarity: f32,
    /// One minus the normalized spread of similarities.
    pub agreement: f32,
    /// Answer-to-context token overlap.
    pub coverage: f32,
}

/// Combines retrieval and answer-coverage signals into a [`ConfidenceScore`].
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
    lexicon: CompiledLexicon,
}

impl ConfidenceScorer {
    /// Create a scorer; `lexicon` must be the one used for grounding so that
    /// coverage and grounding measure the same thing.
    pub fn new(config: ConfidenceConfig, lexicon: CompiledLexicon) -> Self {
        Self { config, lexicon }
    }

    /// The active weights and thresholds.
    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    /// Compute the raw signals for a retrieval and answer.
    pub fn factors(&self, result: &RetrievalResult, candidate_answer: &str) -> ConfidenceFactors {
        let similarities: Vec<f32> =
            result.similarities().into_iter().map(|s| s.clamp(0.0, 1.0)).collect();
        let avg_similarity = mean(&similarities);
        let spread = (stddev(&similarities, avg_similarity) / MAX_UNIT_STDDEV).clamp(0.0, 1.0);
        let coverage = self.lexicon.overlap_ratio(candidate_answer, &result.context());
        ConfidenceFactors { avg_similarity, agreement: 1.0 - spread, coverage }
    }

    /// Weighted combination of `factors`, clamped to `[0, 1]`.
    pub fn combine(&self, factors: &ConfidenceFactors) -> f32 {
        let raw = factors.avg_similarity * self.config.similarity_weight
            + factors.agreement * self.config.agreement_weight
            + factors.coverage * self.config.coverage_weight;
        raw.clamp(0.0, 1.0)
    }

    /// Score a retrieval and candidate answer under a guardrail verdict.
    ///
    /// A triggered verdict always yields 0.0, as does an empty retrieval.
    pub fn score(
        &self,
        result: &RetrievalResult,
        candidate_answer: &str,
        verdict: &GuardrailVerdict,
    ) -> ConfidenceScore {
        if verdict.triggered || result.is_empty() {
            return ConfidenceScore::zero();
        }
        let score = self.combine(&self.factors(result, candidate_answer));
        self.band(score)
    }

    /// Lower a score to at most `cap`, re-deriving the band.
    pub fn cap(&self, score: ConfidenceScore, cap: f32) -> ConfidenceScore {
        self.band(score.score.min(cap))
    }

    fn band(&self, score: f32) -> ConfidenceScore {
        ConfidenceScore { score, band: ConfidenceBand::classify(score, &self.config) }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn stddev(values: &[f32], mean: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, RetrievedChunk};
    use crate::guardrail::GuardrailReason;
    use crate::lexicon::Lexicon;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(ConfidenceConfig::default(), Lexicon::default().compile())
    }

    fn result(similarities: &[f32]) -> RetrievalResult {
        RetrievalResult {
            document_id: "doc".into(),
            hits: similarities
                .iter()
                .enumerate()
                .map(|(i, s)| RetrievedChunk {
                    chunk: Chunk::new("doc", i, "Rate: $1,250.00 USD flat", 0, 24),
                    similarity: *s,
                    rank: i,
                })
                .collect(),
        }
    }

    #[test]
    fn bands_follow_thresholds() {
        let config = ConfidenceConfig::default();
        assert_eq!(ConfidenceBand::classify(0.7, &config), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::classify(0.69, &config), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(0.4, &config), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(0.39, &config), ConfidenceBand::Low);
    }

    #[test]
    fn perfect_evidence_scores_one() {
        let pass = GuardrailVerdict::pass(1.0);
        let score = scorer().score(&result(&[1.0]), "Rate $1,250.00 USD", &pass);
        assert!((score.score - 1.0).abs() < 1e-6);
        assert_eq!(score.band, ConfidenceBand::High);
    }

    #[test]
    fn triggered_guardrail_forces_zero() {
        let verdict = GuardrailVerdict::triggered(GuardrailReason::PoorGrounding, "x", 0.95);
        let score = scorer().score(&result(&[0.95, 0.9]), "Rate $1,250.00 USD", &verdict);
        assert_eq!(score, ConfidenceScore::zero());
    }

    #[test]
    fn disagreement_lowers_confidence() {
        let scorer = scorer();
        let agreeing = scorer.factors(&result(&[0.6, 0.6]), "rate");
        let split = scorer.factors(&result(&[1.0, 0.2]), "rate");
        assert!((agreeing.avg_similarity - split.avg_similarity).abs() < 1e-6);
        assert!(agreeing.agreement > split.agreement);
        assert!(scorer.combine(&agreeing) > scorer.combine(&split));
    }

    #[test]
    fn negative_similarities_are_clamped() {
        let factors = scorer().factors(&result(&[-0.5, -0.2]), "nothing relevant");
        assert_eq!(factors.avg_similarity, 0.0);
        assert!((factors.agreement - 1.0).abs() < 1e-6);
        assert_eq!(factors.coverage, 0.0);
    }

    #[test]
    fn cap_rebands() {
        let scorer = scorer();
        let high = ConfidenceScore { score: 0.92, band: ConfidenceBand::High };
        let capped = scorer.cap(high, 0.69);
        assert_eq!(capped.band, ConfidenceBand::Medium);
        assert!((capped.score - 0.69).abs() < 1e-6);
        let low = ConfidenceScore { score: 0.2, band: ConfidenceBand::Low };
        assert_eq!(scorer.cap(low, 0.69), low);
    }

    #[test]
    fn score_serializes_with_band_name() {
        let score = ConfidenceScore { score: 0.5, band: ConfidenceBand::Medium };
        let json = serde_json::to_value(score).unwrap();
        assert_eq!(json["band"], "MEDIUM");
        assert_eq!(json["score"], 0.5);
    }
}
