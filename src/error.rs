use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`GenerativeEngine`](crate::GenerativeEngine).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("generation failed: {0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure reported by an [`EmbeddingEngine`](crate::EmbeddingEngine).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("embedding failed: {0}")]
pub struct EmbeddingError(pub String);

impl EmbeddingError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors surfaced by the inference session and its registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Model weights are absent at the configured location.
    #[error("model not found at path: {}", path.display())]
    ModelNotFound { path: PathBuf },
    /// Another request currently owns the engine.
    #[error("session is busy with another request")]
    Busy,
    /// The engine could not be constructed.
    #[error("failed to load model: {0}")]
    Load(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    /// The engine stopped before producing a final chunk.
    #[error("stream ended before the final chunk")]
    Truncated,
    #[error("generation was cancelled")]
    Cancelled,
}

/// Errors surfaced by [`SemanticIntentMatcher`](crate::SemanticIntentMatcher).
///
/// These are distinct from a [`MatchOutcome::NoMatch`](crate::MatchOutcome),
/// which is a legitimate result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
}
