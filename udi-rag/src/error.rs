//! Error types for the `udi-rag` crate.

use thiserror::Error;

/// Errors that can occur while indexing documents or answering questions.
///
/// Guardrail refusals are not errors: they are reported through
/// [`GuardrailVerdict`](crate::guardrail::GuardrailVerdict) on a successful
/// response.
#[derive(Debug, Error)]
pub enum RagError {
    /// The document text was empty or whitespace only.
    #[error("document text is empty")]
    EmptyDocument,

    /// A document was indexed with no chunks.
    #[error("document '{document_id}' has no chunks to index")]
    EmptyChunkSet {
        /// The document that was being indexed.
        document_id: String,
    },

    /// No chunks are indexed under the given document ID.
    #[error("document '{document_id}' is not indexed")]
    UnknownDocument {
        /// The requested document.
        document_id: String,
    },

    /// The embedding model failed or did not answer in time.
    #[error("embedding unavailable ({provider}): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The text-generation model failed or did not answer in time.
    #[error("generation unavailable ({provider}): {message}")]
    GenerationUnavailable {
        /// The generator that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Two vectors that must be compared have different lengths.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension already established for the document.
        expected: usize,
        /// The offending dimension.
        actual: usize,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The service was closed and no longer accepts requests.
    #[error("service is closed")]
    ServiceClosed,
}

impl RagError {
    /// Whether the error was caused by caller input (a 4xx-style rejection)
    /// rather than by a failing dependency.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyDocument
                | Self::EmptyChunkSet { .. }
                | Self::UnknownDocument { .. }
                | Self::DimensionMismatch { .. }
        )
    }

    pub(crate) fn unknown(document_id: &str) -> Self {
        Self::UnknownDocument { document_id: document_id.to_string() }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_client_errors() {
        assert!(RagError::EmptyDocument.is_client_error());
        assert!(RagError::unknown("doc").is_client_error());
        assert!(
            !RagError::EmbeddingUnavailable { provider: "x".into(), message: "down".into() }
                .is_client_error()
        );
        assert!(!RagError::ServiceClosed.is_client_error());
    }

    #[test]
    fn messages_name_the_document() {
        let err = RagError::unknown("bol-42");
        assert_eq!(err.to_string(), "document 'bol-42' is not indexed");
    }
}
