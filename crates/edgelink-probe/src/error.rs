//! Probe engine error types

use thiserror::Error;

/// Errors raised by a probe attempt.
///
/// `Timeout` is recoverable: the caller may retry against the same or a
/// fallback checker. The rest fail the attempt they occurred in.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to receive ack after 3 rounds of probing")]
    Timeout,

    #[error("probe socket unavailable: another instance owns the local port")]
    SocketUnavailable,

    #[error("failed to resolve checker address {0}")]
    UnresolvedAddress(String),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode probe payload: {0}")]
    Encode(#[from] serde_json::Error),
}
