use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrackError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no points registered, call register first")]
    NotInitialized,
    #[error("not enough frames buffered yet ({buffered} of {required}), keep submitting frames")]
    InsufficientContext { buffered: usize, required: usize },
    #[error("tracking model failed: {0}")]
    ModelInvocation(#[from] ModelError),
}

impl TrackError {
    /// Whether resubmitting (the next frame) is expected to succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackError::InsufficientContext { .. })
    }
}
