//! Tunnel-transport library boundary
//!
//! The library that actually multiplexes and relays bytes is opaque to the
//! manager: it takes a realized topology and hands back services to serve
//! and close.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::topology::Topology;

/// Failure inside the tunnel-transport library
#[derive(Debug, Clone, Error)]
#[error("tunnel transport error: {0}")]
pub struct TransportError(pub String);

/// One running tunnel endpoint (listener plus handler)
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Serve until closed or failed; runs as a background task
    async fn serve(&self) -> Result<(), TransportError>;

    /// Release the endpoint's resources; idempotent
    async fn close(&self) -> Result<(), TransportError>;
}

/// Realizes a declared topology into runnable services
pub trait TunnelTransport: Send + Sync {
    fn build(&self, topology: &Topology) -> Result<Vec<Arc<dyn TunnelService>>, TransportError>;
}
