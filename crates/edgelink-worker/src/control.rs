//! Administrative surface for the embedding shell
//!
//! Every call answers with a JSON envelope: `{success, message, status?}`
//! on success, `{error}` on failure, so the caller always gets a terminal
//! outcome it can render without knowing the error taxonomy.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::{WorkerConfig, WorkerStatus};
use crate::manager::WorkerManager;

#[derive(Serialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<WorkerStatus>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode control envelope");
        r#"{"error":"internal encoding failure"}"#.to_string()
    })
}

fn ok(message: impl Into<String>) -> String {
    encode(&Envelope {
        success: true,
        message: Some(message.into()),
        status: None,
    })
}

fn fail(error: impl ToString) -> String {
    encode(&ErrorEnvelope {
        error: error.to_string(),
    })
}

/// JSON command surface over the worker manager
pub struct ControlSurface {
    manager: Arc<WorkerManager>,
}

impl ControlSurface {
    pub fn new(manager: Arc<WorkerManager>) -> Self {
        Self { manager }
    }

    /// Start a session from a config JSON document
    pub async fn start(&self, config_json: &str) -> String {
        let config: WorkerConfig = match serde_json::from_str(config_json) {
            Ok(config) => config,
            Err(err) => return fail(format!("invalid config: {err}")),
        };

        match self.manager.start(config).await {
            Ok(()) => ok("proxy worker started"),
            Err(err) => fail(err),
        }
    }

    pub async fn stop(&self) -> String {
        match self.manager.stop().await {
            Ok(()) => ok("proxy worker stopped"),
            Err(err) => fail(err),
        }
    }

    pub async fn restart(&self) -> String {
        match self.manager.restart().await {
            Ok(()) => ok("proxy worker restarted"),
            Err(err) => fail(err),
        }
    }

    pub async fn status(&self) -> String {
        let status = self.manager.status().await;
        encode(&Envelope {
            success: true,
            message: None,
            status: Some(status),
        })
    }

    pub async fn is_running(&self) -> String {
        let running = self.manager.is_running().await;
        ok(if running { "running" } else { "stopped" })
    }
}
