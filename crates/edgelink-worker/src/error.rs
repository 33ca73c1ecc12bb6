//! Worker lifecycle error types

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by the worker manager.
///
/// The state-machine misuse variants are terminal answers to the caller,
/// never retried automatically. A transport failure during start aborts
/// the whole start and leaves the manager stopped.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("proxy worker is already running")]
    AlreadyRunning,

    #[error("proxy worker is not running")]
    NotRunning,

    #[error("no configuration available for restart")]
    NoConfig,

    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        field: &'static str,
        message: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WorkerError {
    pub(crate) fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::InvalidConfig { field, message }
    }
}
