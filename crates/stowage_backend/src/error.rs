//! Error types for backend adapters.

use thiserror::Error;

/// Result type for backend adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur inside a backend adapter.
///
/// The enum is `Clone` because handle lookups may be coalesced into shared
/// futures whose results are handed to several callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The requested document does not exist.
    #[error("document not found: {doc_key}")]
    DocumentNotFound {
        /// The document key that was looked up.
        doc_key: String,
    },

    /// The requested attachment does not exist.
    #[error("attachment not found: {doc_key}/{attach_key}")]
    AttachmentNotFound {
        /// The document key the attachment is scoped to.
        doc_key: String,
        /// The attachment key that was looked up.
        attach_key: String,
    },

    /// The storage technology is absent or refused to initialize.
    ///
    /// During selection this is recovered by advancing the cascade; it is
    /// only surfaced when the backend was forced.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The adapter does not implement the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// A write would exceed the capacity granted to this store.
    #[error("quota exceeded: need {requested} bytes, capacity is {capacity} bytes")]
    QuotaExceeded {
        /// Bytes the write would have occupied in total.
        requested: u64,
        /// The granted capacity in bytes.
        capacity: u64,
    },

    /// An underlying I/O or host API failure, stringified.
    #[error("I/O error: {0}")]
    Io(String),
}

impl BackendError {
    /// Convenience constructor for [`BackendError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Returns true if this error means "the thing you asked for is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DocumentNotFound { .. } | Self::AttachmentNotFound { .. }
        )
    }
}
