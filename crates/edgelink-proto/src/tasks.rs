//! Control-channel task messages
//!
//! Tasks arrive as JSON text identified by a `type` field. Decoding is
//! two-phase: peek the type, then decode the full variant. Messages without
//! a recognized type are treated as NAT-probe tasks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{HMAC_SIZE, SEQ_SIZE};

/// Task message type for bandwidth tests
pub const TASK_TYPE_BANDWIDTH_TEST: &str = "bandwidth_test";

/// Error decoding a task message
#[derive(Debug, Error)]
pub enum TaskDecodeError {
    #[error("malformed task JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One probe attempt against one checker endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeTask {
    #[serde(rename = "type")]
    pub task_type: String,
    pub task_id: String,
    pub sub_task_id: String,
    pub checker_ip: String,
    pub checker_port: u32,
}

impl Default for ProbeTask {
    fn default() -> Self {
        Self {
            task_type: String::new(),
            task_id: String::new(),
            sub_task_id: String::new(),
            checker_ip: String::new(),
            checker_port: 0,
        }
    }
}

impl ProbeTask {
    /// Address of the first checker in the probe chain
    pub fn checker_addr(&self) -> String {
        format!("{}:{}", self.checker_ip, self.checker_port)
    }
}

/// Bandwidth test task from the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthTask {
    #[serde(rename = "type")]
    pub task_type: String,
    pub test_id: String,
    pub checker_host: String,
    pub checker_port: u16,
    pub challenge: Challenge,
}

impl Default for BandwidthTask {
    fn default() -> Self {
        Self {
            task_type: String::new(),
            test_id: String::new(),
            checker_host: String::new(),
            checker_port: 0,
            challenge: Challenge::default(),
        }
    }
}

/// Parameters for one bandwidth test run.
///
/// Immutable once received; `expires_at` is checked on entry and not
/// re-checked while the run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Challenge {
    /// Hex-encoded payload seed shared with the checker
    pub seed: String,
    /// Hex-encoded HMAC key shared with the checker
    pub hmac_key: String,
    pub nonce: String,
    /// Unix seconds; zero means no expiry
    pub expires_at: i64,
    pub duration_ms: u64,
    /// Payload bytes per chunk, excluding seq prefix and HMAC trailer
    pub chunk_size: usize,
    pub per_stream_total_chunks: u32,
    pub concurrency: u32,
}

impl Challenge {
    /// On-wire size of one chunk record: seq prefix, payload, HMAC trailer
    pub fn chunk_total_size(&self) -> usize {
        SEQ_SIZE + self.chunk_size + HMAC_SIZE
    }
}

/// A task routed by its `type` field
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTask {
    BandwidthTest(BandwidthTask),
    NatProbe(ProbeTask),
}

impl AgentTask {
    /// Decode a task message in two phases: peek the `type` field, then
    /// decode the matching variant. Anything without a recognized type is
    /// handled as a NAT-probe task.
    pub fn from_json(message: &str) -> Result<Self, TaskDecodeError> {
        #[derive(Deserialize)]
        struct TypeTag {
            #[serde(rename = "type", default)]
            task_type: Option<String>,
        }

        let tag: TypeTag = serde_json::from_str(message)?;
        match tag.task_type.as_deref() {
            Some(TASK_TYPE_BANDWIDTH_TEST) => {
                Ok(AgentTask::BandwidthTest(serde_json::from_str(message)?))
            }
            _ => Ok(AgentTask::NatProbe(serde_json::from_str(message)?)),
        }
    }
}
