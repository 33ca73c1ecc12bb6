//! UDP wire records for the NAT probe protocol
//!
//! One JSON-encoded record per datagram; the datagram boundary is the
//! message boundary, there is no length prefix.

use serde::{Deserialize, Serialize};

/// Challenge packet sent to a checker node.
///
/// Each round sends the same logical payload three times (`seq` 1..=3) to
/// counter UDP loss; `round` runs 1..=3 before the attempt is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbePayload {
    pub task_id: String,
    pub sub_task_id: String,
    pub node_id: String,
    pub round: u32,
    pub seq: u32,
    /// Send time in unix milliseconds
    pub timestamp: i64,
    pub token: String,
    pub stage: u32,
}

/// Acknowledgement returned by a checker node.
///
/// `checker_ip`/`checker_port` may redirect the next stage to a different
/// endpoint; that is how a multi-hop probe chain advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeAck {
    pub task_id: String,
    pub sub_task_id: String,
    pub node_id: String,
    pub round: u32,
    pub seq: u32,
    /// Checker-side timestamp; the wire name differs from the outbound
    /// payload's `timestamp` field
    pub time_stamp: i64,
    pub stage: u32,
    pub checker_ip: String,
    pub checker_port: u16,
}

impl Default for ProbeAck {
    fn default() -> Self {
        Self {
            task_id: String::new(),
            sub_task_id: String::new(),
            node_id: String::new(),
            round: 0,
            seq: 0,
            time_stamp: 0,
            stage: 0,
            checker_ip: String::new(),
            checker_port: 0,
        }
    }
}

impl ProbeAck {
    /// Address of the next hop advertised by this ack
    pub fn next_hop(&self) -> String {
        format!("{}:{}", self.checker_ip, self.checker_port)
    }
}
