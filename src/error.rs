//! Error types for the matchmaking service
//!
//! Only infrastructure failures are errors. Routine outcomes such as a
//! duplicate join request, a missing partner or an unreachable client are
//! reported as ordinary return values by the operations themselves.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Backing store unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Invalid client message: {reason}")]
    InvalidClientMessage { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Shorthand for a backend failure with the given context
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }
}

/// Returns true if the error chain carries a backing store failure
pub fn is_backend_unavailable(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<MatchmakingError>(),
        Some(MatchmakingError::BackendUnavailable { .. })
    )
}
