//! UDP NAT-probe engine
//!
//! Two sub-protocols share one bound UDP socket: a challenge/ACK exchange
//! that validates end-to-end reachability through a chain of checker nodes,
//! and STUN-based classification of the local NAT's mapping and filtering
//! behavior.

pub mod error;
pub mod nat;
pub mod udp;

pub use error::ProbeError;
pub use nat::{
    Behavior, ExternalIpSource, IpVersion, NatBehavior, NatClassifier, NatType, StunBehaviorTest,
    StunError, StunMethod, DEFAULT_STUN_SERVERS,
};
pub use udp::{UdpProbe, DEFAULT_PROBE_PORT};
