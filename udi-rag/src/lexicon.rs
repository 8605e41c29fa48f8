//! Token tables and the token-overlap measure used for grounding.
//!
//! The guardrail evaluator, the confidence scorer and the lexical retrieval
//! fallback all tokenize the same way: lowercase, split on whitespace, strip
//! every non-alphanumeric character from each token, drop empties. A
//! [`Lexicon`] carries the stop words excluded from overlap counting and the
//! phrases that mark an answer as "the document does not say".

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my",
    "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "theirs", "them", "then", "there", "these", "they", "this", "those", "through",
    "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

const DEFAULT_MISSING_INFO_PHRASES: &[&str] = &[
    "i don't know",
    "i do not know",
    "cannot find",
    "can't find",
    "not in the document",
    "not mentioned",
    "not available",
    "not found",
    "not provided",
    "no information",
];

/// Stop words and "missing information" phrases.
///
/// Both tables are configuration: the defaults are a reasonable English
/// baseline, not tuned constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Lexicon {
    /// Tokens ignored when measuring answer coverage.
    pub stop_words: Vec<String>,
    /// Case-insensitive phrases that mark an answer as admitting the
    /// information is missing.
    pub missing_info_phrases: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|s| s.to_string()).collect(),
            missing_info_phrases: DEFAULT_MISSING_INFO_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Lexicon {
    /// Compile the tables into lookup structures.
    pub fn compile(&self) -> CompiledLexicon {
        CompiledLexicon {
            stop_words: self.stop_words.iter().map(|w| w.to_lowercase()).collect(),
            missing_info_phrases: self
                .missing_info_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.trim().is_empty())
                .collect(),
        }
    }
}

/// A [`Lexicon`] ready for lookups.
#[derive(Debug, Clone, Default)]
pub struct CompiledLexicon {
    stop_words: HashSet<String>,
    missing_info_phrases: Vec<String>,
}

impl CompiledLexicon {
    /// Whether `token` (already normalized) is a stop word.
    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// Content tokens of `text`: normalized tokens minus stop words.
    pub fn content_tokens(&self, text: &str) -> HashSet<String> {
        tokenize(text).filter(|t| !self.is_stop_word(t)).collect()
    }

    /// Fraction of the answer's content tokens that also appear in `context`.
    ///
    /// Returns 0.0 when the answer has no content tokens.
    pub fn overlap_ratio(&self, answer: &str, context: &str) -> f32 {
        let answer_tokens = self.content_tokens(answer);
        if answer_tokens.is_empty() {
            return 0.0;
        }
        let context_tokens: HashSet<String> = tokenize(context).collect();
        let present = answer_tokens.iter().filter(|t| context_tokens.contains(*t)).count();
        present as f32 / answer_tokens.len() as f32
    }

    /// The first configured "missing information" phrase found in `answer`.
    pub fn missing_info_phrase(&self, answer: &str) -> Option<&str> {
        let lowered = answer.to_lowercase();
        self.missing_info_phrases.iter().find(|p| lowered.contains(p.as_str())).map(String::as_str)
    }
}

/// Lowercase, punctuation-stripped tokens of `text`, in order.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|raw| {
            raw.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_inside_tokens() {
        let tokens: Vec<String> = tokenize("Rate: $1,250.00 USD!").collect();
        assert_eq!(tokens, vec!["rate", "125000", "usd"]);
    }

    #[test]
    fn overlap_ignores_stop_words() {
        let lexicon = Lexicon::default().compile();
        let ratio = lexicon.overlap_ratio("The rate is $1,250.00", "Rate: $1,250.00 USD");
        assert!((ratio - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn overlap_of_unrelated_answer_is_zero() {
        let lexicon = Lexicon::default().compile();
        assert_eq!(lexicon.overlap_ratio("Pineapples grow fast", "Rate: $1,250.00 USD"), 0.0);
        assert_eq!(lexicon.overlap_ratio("the of and", "anything"), 0.0);
    }

    #[test]
    fn missing_phrase_match_is_case_insensitive() {
        let lexicon = Lexicon::default().compile();
        assert_eq!(lexicon.missing_info_phrase("Sorry, I DON'T KNOW."), Some("i don't know"));
        assert_eq!(lexicon.missing_info_phrase("The rate is $900"), None);
    }

    #[test]
    fn custom_tables_replace_defaults() {
        let lexicon = Lexicon {
            stop_words: vec!["rate".into()],
            missing_info_phrases: vec!["no idea".into()],
        }
        .compile();
        assert!(lexicon.is_stop_word("rate"));
        assert!(!lexicon.is_stop_word("the"));
        assert!(lexicon.missing_info_phrase("No idea at all").is_some());
        assert!(lexicon.missing_info_phrase("not mentioned").is_none());
    }
}
