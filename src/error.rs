use thiserror::Error;

/// Failure taxonomy for the messaging core.
///
/// Errors are caught at the session boundary and turned into state the UI
/// can render (retry affordances, dismissible alerts); they are never
/// allowed to propagate as panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Rejected locally before any backend call (e.g. empty message content).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A store read or write failed. Retryable; any optimistic state is
    /// rolled back by the caller.
    #[error("store error: {0}")]
    Store(String),

    /// A realtime subscription failed or dropped. The subscription retries
    /// with backoff and the session reloads to close any gap.
    #[error("channel error: {0}")]
    Channel(String),

    /// No signed-in user. Sends must not be attempted; not retryable.
    #[error("not authenticated")]
    NotAuthenticated,
}
