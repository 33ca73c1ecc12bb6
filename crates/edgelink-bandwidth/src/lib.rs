//! Bandwidth measurement engine
//!
//! Proves outbound throughput to a remote checker by streaming
//! deterministic, HMAC-tagged chunks over concurrent HTTPS uploads. The
//! checker regenerates the same chunks from the shared challenge seed, so
//! nothing needs to be stored on either side to validate the transfer.

pub mod error;
pub mod service;
pub mod uploader;

pub use error::BandwidthError;
pub use service::BandwidthService;
pub use uploader::{StreamResult, TestResult, Uploader};

use async_trait::async_trait;
use thiserror::Error;

/// Failure deriving the upload bearer token
#[derive(Debug, Error)]
#[error("failed to derive bearer token: {0}")]
pub struct TokenError(pub String);

/// Source of the bearer token presented on upload requests.
///
/// The token is derived from the node's serial number by the backend auth
/// subsystem; only the seam is visible here.
#[async_trait]
pub trait BearerTokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, TokenError>;
}
