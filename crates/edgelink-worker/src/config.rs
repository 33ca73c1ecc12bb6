//! Worker configuration and status snapshots

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::WorkerError;

/// Addressing mode of the node's public side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NatMode {
    /// Dynamic IP: only reachable through the reverse tunnel
    #[default]
    Dynamic,
    /// Static IP: additionally listens on a fixed public port
    Static,
}

// On the wire the mode is the integer the backend sends: 0 dynamic, 1 static
impl Serialize for NatMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match self {
            NatMode::Dynamic => 0,
            NatMode::Static => 1,
        })
    }
}

impl<'de> Deserialize<'de> for NatMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(NatMode::Dynamic),
            1 => Ok(NatMode::Static),
            other => Err(D::Error::custom(format!("invalid nat_type: {other}"))),
        }
    }
}

/// Configuration for one tunnel session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub sn: String,
    pub token: String,
    pub tunnel_id: String,
    pub proxy_server_ip: String,
    pub proxy_server_port: u16,
    pub local_port: u16,
    pub nat_type: NatMode,
    pub fixed_port: u16,
    /// Use plain ws instead of wss towards the relay
    pub disable_tls: bool,
    /// Verify the relay certificate; skipped by default
    pub tls_secure: bool,
    /// TLS server name for certificate verification; the relay IP is used
    /// when empty
    pub server_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sn: String::new(),
            token: String::new(),
            tunnel_id: String::new(),
            proxy_server_ip: String::new(),
            proxy_server_port: 0,
            local_port: 0,
            nat_type: NatMode::Dynamic,
            fixed_port: 0,
            disable_tls: false,
            tls_secure: false,
            server_name: String::new(),
        }
    }
}

impl WorkerConfig {
    /// Reject configurations that cannot form a valid topology
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.sn.is_empty() {
            return Err(WorkerError::invalid("sn", "sn is required"));
        }
        if self.token.is_empty() {
            return Err(WorkerError::invalid("token", "token is required"));
        }
        if self.tunnel_id.is_empty() {
            return Err(WorkerError::invalid("tunnel_id", "tunnel_id is required"));
        }
        if self.proxy_server_ip.is_empty() {
            return Err(WorkerError::invalid(
                "proxy_server_ip",
                "proxy_server_ip is required",
            ));
        }
        if self.proxy_server_port == 0 {
            return Err(WorkerError::invalid(
                "proxy_server_port",
                "proxy_server_port must be positive",
            ));
        }
        if self.local_port == 0 {
            return Err(WorkerError::invalid(
                "local_port",
                "local_port must be positive",
            ));
        }
        if self.nat_type == NatMode::Static && self.fixed_port == 0 {
            return Err(WorkerError::invalid(
                "fixed_port",
                "fixed_port is required for static IP",
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the worker, safe to take while services run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStatus {
    pub is_running: bool,
    pub pid: u32,
    pub local_port: u16,
    pub fixed_port: u16,
    pub tunnel_id: String,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
