//! Error types for the `raggpt-rag` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunk, temperature, or pipeline parameters are invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An argument passed to an operation is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding service failed (transport, quota, malformed response).
    #[error("Embedding service error ({provider}): {message}")]
    EmbeddingService {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The language model service failed.
    #[error("Generation service error ({provider}): {message}")]
    GenerationService {
        /// The language model that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The named collection does not exist in the index or on disk.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// The collection was created with a different embedding model or chunk policy.
    #[error("Collection '{collection}' policy mismatch: {detail}")]
    CollectionPolicyMismatch {
        /// The collection whose recorded policy disagrees.
        collection: String,
        /// What differs.
        detail: String,
    },

    /// A vector's length differs from the collection's established dimensionality.
    #[error("Dimension mismatch in collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The target collection.
        collection: String,
        /// Dimensionality recorded for the collection.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },

    /// Embedding failed partway through an ingestion batch; nothing was persisted.
    #[error("Ingestion aborted at document '{document}': {message}")]
    PartialBatchFailure {
        /// The document whose chunks could not be embedded.
        document: String,
        /// The underlying failure.
        message: String,
    },

    /// The file loader does not handle this kind of document.
    #[error("Unsupported document '{0}'")]
    UnsupportedDocument(String),

    /// Filesystem failure while reading documents or persisting an index.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A persisted index or metadata record could not be (de)serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// A copyable classification of [`RagError`], carried by failed query states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfiguration,
    InvalidArgument,
    EmbeddingService,
    GenerationService,
    CollectionNotFound,
    CollectionPolicyMismatch,
    DimensionMismatch,
    PartialBatchFailure,
    UnsupportedDocument,
    Storage,
}

impl ErrorKind {
    /// External-service failures may be retried with the same input.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::EmbeddingService | Self::GenerationService)
    }
}

impl RagError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::EmbeddingService { .. } => ErrorKind::EmbeddingService,
            Self::GenerationService { .. } => ErrorKind::GenerationService,
            Self::CollectionNotFound(_) => ErrorKind::CollectionNotFound,
            Self::CollectionPolicyMismatch { .. } => ErrorKind::CollectionPolicyMismatch,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            Self::UnsupportedDocument(_) => ErrorKind::UnsupportedDocument,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_service_errors_are_retryable() {
        let embed = RagError::EmbeddingService { provider: "x".into(), message: "quota".into() };
        let missing = RagError::CollectionNotFound("docs".into());
        assert!(embed.kind().is_retryable());
        assert!(!missing.kind().is_retryable());
        assert_eq!(RagError::InvalidArgument("k".into()).kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn io_errors_classify_as_storage() {
        let err: RagError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
