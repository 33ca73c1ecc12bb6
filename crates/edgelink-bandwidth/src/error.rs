//! Bandwidth engine error types

use thiserror::Error;

/// Errors raised while accepting or running a bandwidth test task.
///
/// Validation and decode failures drop the task; transport failures are
/// contained at stream granularity and surface through
/// [`StreamResult::error`](crate::StreamResult) instead.
#[derive(Debug, Error)]
pub enum BandwidthError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },

    #[error("bandwidth test task expired")]
    Expired,

    #[error("malformed bandwidth task: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to build upload client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("bandwidth test aborted: task deadline exceeded")]
    Deadline,
}

impl BandwidthError {
    pub(crate) fn validation(field: &'static str, message: &'static str) -> Self {
        Self::Validation { field, message }
    }
}
