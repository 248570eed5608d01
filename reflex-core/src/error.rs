//! Error types for REFLEX operations.
//!
//! Errors are `Clone` on purpose: a failed evaluation is cached as the
//! node's terminal state and handed to every single-flight waiter, so the
//! same error value travels to multiple callers.

use thiserror::Error;

/// Authentication and authorization errors. Fail-closed: these occur
/// before any mutation or invalidation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Session {session} did not resolve to a user")]
    Unauthenticated { session: String },

    #[error("User {user} is not authorized for {action}")]
    Unauthorized { user: String, action: String },
}

/// Dispatcher configuration errors, fatal to the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No handler registered for command {descriptor}")]
    NoHandlerFound { descriptor: String },

    #[error("{count} handlers registered for command {descriptor}, expected exactly one")]
    AmbiguousHandler { descriptor: String, count: usize },
}

/// Evaluation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    /// The evaluator returned an error. The node holds this error instead
    /// of a value until the next invalidation.
    #[error("Evaluation of {key} failed: {reason}")]
    Failed { key: String, reason: String },

    /// The caller cancelled the evaluation. Does not poison the node.
    #[error("Evaluation of {key} was cancelled")]
    Cancelled { key: String },

    /// A cached value was read back as a different type than it was
    /// computed with. Indicates two call sites disagree about a key.
    #[error("Cached value for {key} has a different type than requested")]
    ValueTypeMismatch { key: String },
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    #[error("Invalid pagination cursor: {cursor}")]
    BadCursor { cursor: String },

    #[error("Failed to (de)serialize value for key {key}: {reason}")]
    Serde { key: String, reason: String },
}

/// Top-level error type aggregating all REFLEX error domains.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReflexError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReflexError {
    /// Whether this error means the caller was not authenticated or not
    /// authorized (fail-closed path).
    pub fn is_auth(&self) -> bool {
        matches!(self, ReflexError::Auth(_))
    }

    /// Whether this error is a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReflexError::Eval(EvalError::Cancelled { .. }))
    }
}

/// Result type alias for REFLEX operations.
pub type ReflexResult<T> = Result<T, ReflexError>;
