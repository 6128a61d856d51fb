//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid call phase transition: {0}")]
    InvalidTransition(#[from] crate::phase::InvalidTransition),

    #[error("another call is already in progress")]
    CallInProgress,

    #[error("media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid signaling payload: {0}")]
    InvalidPayload(&'static str),
}

/// Errors surfaced by the media engine collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create {kind}: {message}")]
    CreateFailed {
        kind: &'static str,
        message: String,
    },

    #[error("failed to apply {kind}: {message}")]
    ApplyFailed {
        kind: &'static str,
        message: String,
    },

    #[error("audio capture permission denied")]
    PermissionDenied,

    #[error("engine closed")]
    Closed,
}
