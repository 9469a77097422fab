//! Failures contained within a single polling iteration.

use thiserror::Error;

use crate::publisher::PublishError;
use crate::source::FetchError;

/// Everything that can go wrong in one fetch → publish → flush pass.
///
/// None of these stop the loop; they are logged and the next iteration runs on schedule.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl IterationError {
    /// Build an `Unexpected` error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        IterationError::Unexpected(format!("panic: {}", message))
    }
}
