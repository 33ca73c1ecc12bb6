//! Proxy-worker lifecycle management
//!
//! Builds a declarative reverse-tunnel topology from configuration,
//! realizes it through the opaque tunnel-transport library, and supervises
//! the resulting services. One manager instance exists process-wide,
//! constructed and injected by the composition root.

pub mod config;
pub mod control;
pub mod error;
pub mod manager;
pub mod topology;
pub mod transport;

pub use config::{NatMode, WorkerConfig, WorkerStatus};
pub use control::ControlSurface;
pub use error::WorkerError;
pub use manager::WorkerManager;
pub use topology::{
    build_topology, ChainSpec, HandlerKind, HandlerSpec, HopSpec, ListenerKind, ListenerSpec,
    NodeSpec, ServiceSpec, Topology,
};
pub use transport::{TransportError, TunnelService, TunnelTransport};
