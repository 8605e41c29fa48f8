//! Answer generation and the fallback chain around it.
//!
//! An [`AnswerChain`] holds an ordered list of [`AnswerStrategy`]s. Each one
//! is tried in turn inside its own failure boundary (errors and panics are
//! both caught) and the first success wins. The usual chain is a
//! [`GenerativeStrategy`] backed by an LLM followed by
//! [`BestEvidenceStrategy`], which returns the most similar chunk verbatim.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::RetrievalResult;
use crate::error::{RagError, Result};

/// Build the question-answering prompt sent to a chat model.
pub fn qa_prompt(question: &str, context: &[&str]) -> String {
    format!(
        "You are an AI assistant that answers questions about logistics documents. Answer ONLY \
         based on the provided document context. If the answer is not in the context, say \"I \
         cannot find this information in the document.\"\n\nDocument Context:\n{}\n\n\
         Question: {question}\n\nAnswer:",
        context.join("\n\n")
    )
}

/// A text-generation model that answers a question from context passages.
///
/// Failures should be reported as
/// [`RagError::GenerationUnavailable`].
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `question` using only `context`.
    async fn generate(&self, question: &str, context: &[&str]) -> Result<String>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// Written by a text-generation model.
    Generated,
    /// The most similar chunk, returned verbatim.
    BestEvidence,
}

impl fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generated => "generated",
            Self::BestEvidence => "best_evidence",
        })
    }
}

/// A candidate answer before guardrails have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAnswer {
    pub text: String,
    pub source: AnswerSource,
}

/// One way of producing a candidate answer from retrieved evidence.
#[async_trait]
pub trait AnswerStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produce a candidate answer for `question` from `evidence`.
    async fn answer(&self, question: &str, evidence: &RetrievalResult) -> Result<DraftAnswer>;
}

/// Asks an [`AnswerGenerator`] for an answer, bounded by a timeout.
pub struct GenerativeStrategy {
    generator: Arc<dyn AnswerGenerator>,
    timeout: Duration,
}

impl GenerativeStrategy {
    pub fn new(generator: Arc<dyn AnswerGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    fn unavailable(&self, message: impl Into<String>) -> RagError {
        RagError::GenerationUnavailable {
            provider: self.generator.name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl AnswerStrategy for GenerativeStrategy {
    fn name(&self) -> &str {
        "generative"
    }

    async fn answer(&self, question: &str, evidence: &RetrievalResult) -> Result<DraftAnswer> {
        let context = evidence.texts();
        let text = tokio::time::timeout(self.timeout, self.generator.generate(question, &context))
            .await
            .map_err(|_| {
                self.unavailable(format!("timed out after {} ms", self.timeout.as_millis()))
            })??;

        let text = text.trim();
        if text.is_empty() {
            return Err(self.unavailable("model returned an empty answer"));
        }
        Ok(DraftAnswer { text: text.to_string(), source: AnswerSource::Generated })
    }
}

/// Returns the text of the most similar retrieved chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestEvidenceStrategy;

#[async_trait]
impl AnswerStrategy for BestEvidenceStrategy {
    fn name(&self) -> &str {
        "best_evidence"
    }

    async fn answer(&self, _question: &str, evidence: &RetrievalResult) -> Result<DraftAnswer> {
        let best = evidence.best().ok_or_else(|| RagError::GenerationUnavailable {
            provider: self.name().to_string(),
            message: "no evidence retrieved".to_string(),
        })?;
        let text = best.chunk.text.trim().to_string();
        Ok(DraftAnswer { text, source: AnswerSource::BestEvidence })
    }
}

/// Ordered answer strategies; the first to succeed wins.
#[derive(Clone, Default)]
pub struct AnswerChain {
    strategies: Vec<Arc<dyn AnswerStrategy>>,
}

impl AnswerChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard chain: the generator (if any), then best evidence.
    pub fn standard(generator: Option<Arc<dyn AnswerGenerator>>, timeout: Duration) -> Self {
        let mut chain = Self::new();
        if let Some(generator) = generator {
            chain = chain.with_strategy(GenerativeStrategy::new(generator, timeout));
        }
        chain.with_strategy(BestEvidenceStrategy)
    }

    /// Append a strategy to the end of the chain.
    pub fn with_strategy(mut self, strategy: impl AnswerStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    /// Number of strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain has no strategies.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run the strategies in order and return the first answer.
    ///
    /// Returns `None` when every strategy failed or panicked.
    pub async fn answer(&self, question: &str, evidence: &RetrievalResult) -> Option<DraftAnswer> {
        for strategy in &self.strategies {
            match AssertUnwindSafe(strategy.answer(question, evidence)).catch_unwind().await {
                Ok(Ok(draft)) => {
                    debug!(strategy = strategy.name(), source = %draft.source, "answer produced");
                    return Some(draft);
                }
                Ok(Err(e)) => {
                    warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "answer strategy failed, falling back"
                    );
                }
                Err(_) => {
                    warn!(strategy = strategy.name(), "answer strategy panicked, falling back");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, RetrievedChunk};

    struct Scripted(&'static str);

    #[async_trait]
    impl AnswerGenerator for Scripted {
        async fn generate(&self, _question: &str, context: &[&str]) -> Result<String> {
            assert!(!context.is_empty());
            Ok(self.0.to_string())
        }
    }

    struct Failing;

    #[async_trait]
    impl AnswerGenerator for Failing {
        async fn generate(&self, _question: &str, _context: &[&str]) -> Result<String> {
            Err(RagError::GenerationUnavailable {
                provider: "failing".into(),
                message: "503".into(),
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl AnswerGenerator for Slow {
        async fn generate(&self, _question: &str, _context: &[&str]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl AnswerGenerator for Panicking {
        async fn generate(&self, _question: &str, _context: &[&str]) -> Result<String> {
            panic!("generator bug")
        }
    }

    fn evidence() -> RetrievalResult {
        let hit = |i: usize, text: &str, similarity: f32| RetrievedChunk {
            chunk: Chunk::new("doc", i, text, 0, text.len()),
            similarity,
            rank: i,
        };
        RetrievalResult {
            document_id: "doc".into(),
            hits: vec![hit(1, "  Rate: $1,250.00 USD ", 0.8), hit(0, "Carrier: Swift", 0.4)],
        }
    }

    fn chain(generator: impl AnswerGenerator + 'static) -> AnswerChain {
        AnswerChain::standard(Some(Arc::new(generator)), Duration::from_millis(50))
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let prompt = qa_prompt("What is the rate?", &["Rate: $1,250.00 USD", "Carrier: Swift"]);
        assert!(prompt.contains("Rate: $1,250.00 USD\n\nCarrier: Swift"));
        assert!(prompt.ends_with("Question: What is the rate?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn generator_answer_wins() {
        let answers = chain(Scripted(" The rate is $1,250.00 USD. "));
        let draft = answers.answer("rate?", &evidence()).await;
        assert_eq!(
            draft,
            Some(DraftAnswer {
                text: "The rate is $1,250.00 USD.".into(),
                source: AnswerSource::Generated
            })
        );
    }

    #[tokio::test]
    async fn failing_generator_falls_back_to_best_evidence() {
        let draft = chain(Failing).answer("rate?", &evidence()).await.unwrap();
        assert_eq!(draft.source, AnswerSource::BestEvidence);
        assert_eq!(draft.text, "Rate: $1,250.00 USD");
    }

    #[tokio::test]
    async fn empty_generation_falls_back() {
        let draft = chain(Scripted("   ")).answer("rate?", &evidence()).await.unwrap();
        assert_eq!(draft.source, AnswerSource::BestEvidence);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generator_times_out() {
        let draft = chain(Slow).answer("rate?", &evidence()).await.unwrap();
        assert_eq!(draft.source, AnswerSource::BestEvidence);
    }

    #[tokio::test]
    async fn panicking_generator_is_contained() {
        let draft = chain(Panicking).answer("rate?", &evidence()).await.unwrap();
        assert_eq!(draft.source, AnswerSource::BestEvidence);
    }

    #[tokio::test]
    async fn no_generator_means_best_evidence_only() {
        let chain = AnswerChain::standard(None, Duration::from_secs(1));
        assert_eq!(chain.len(), 1);
        let draft = chain.answer("rate?", &evidence()).await.unwrap();
        assert_eq!(draft.source, AnswerSource::BestEvidence);
    }

    #[tokio::test]
    async fn exhausted_chain_yields_nothing() {
        let chain = AnswerChain::standard(Some(Arc::new(Failing)), Duration::from_secs(1));
        assert!(chain.answer("rate?", &RetrievalResult::default()).await.is_none());
        assert!(AnswerChain::new().answer("rate?", &evidence()).await.is_none());
    }
}
