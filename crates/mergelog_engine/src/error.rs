//! Error types for the engine.

use mergelog_protocol::TransformConflict;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving the commit graph.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The repository cannot resolve a referenced commit id.
    #[error("commit not found: {id}")]
    NotFound {
        /// The unresolved id, formatted for display.
        id: String,
    },

    /// Divergent diffs could not be reconciled.
    #[error(transparent)]
    TransformConflict(#[from] TransformConflict),

    /// The repository or its transport failed.
    #[error("repository error: {message}")]
    Repository {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid operation {operation} in phase {phase}")]
    InvalidPhase {
        /// The attempted operation.
        operation: &'static str,
        /// The phase the manager was in.
        phase: String,
    },

    /// The loaded graph contradicts the commit model: a cycle, or a parent
    /// missing after a load claimed completion. Indicates a defective
    /// repository; never silently repaired.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl EngineError {
    /// Creates a `NotFound` error for the given id.
    pub fn not_found(id: impl std::fmt::Debug) -> Self {
        Self::NotFound {
            id: format!("{id:?}"),
        }
    }

    /// Creates a retryable repository error.
    pub fn repository_retryable(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable repository error.
    pub fn repository_fatal(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the same logical operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Repository { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
