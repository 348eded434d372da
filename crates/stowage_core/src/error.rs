//! Error types for the store facade and its pipeline.

use stowage_backend::{BackendError, BackendKind};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the store facade, pipeline, and selector.
///
/// `Clone` because coalesced handle futures fan one result out to several
/// callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A data operation was invoked before backend selection completed.
    ///
    /// Await [`crate::Store::initialized`] before issuing data operations.
    #[error("no backend is bound yet; await initialization first")]
    NotReady,

    /// An operation reached the pipeline's terminal sentinel with no
    /// backend adapter bound.
    #[error("operation `{operation}` reached the pipeline terminal with no backend bound")]
    NotImplemented {
        /// The pipelined operation name.
        operation: &'static str,
    },

    /// A relative pipeline mutation named a handler that is not installed
    /// (only under [`crate::MissingTargetPolicy::Error`]).
    #[error("pipeline handler not found: {name}")]
    HandlerNotFound {
        /// The requested target description.
        name: String,
    },

    /// The forced backend could not be initialized; forcing disables the
    /// fallback cascade.
    #[error("forced backend {kind} unavailable: {reason}")]
    ForcedBackendUnavailable {
        /// The backend kind that was forced.
        kind: BackendKind,
        /// Why its initializer failed.
        reason: String,
    },

    /// Every candidate, including the minimal fallback, failed to
    /// initialize.
    #[error("no storage backend could be initialized")]
    SelectionExhausted,

    /// The selection task itself failed (e.g. it was aborted).
    #[error("selection failed: {0}")]
    Selection(String),

    /// An error from the bound backend adapter, surfaced verbatim.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    /// Returns true if this error means "the thing you asked for is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_not_found())
    }
}
