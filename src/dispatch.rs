//! Task routing
//!
//! Tasks arrive as JSON text over the persistent control channel and are
//! routed by their `type` field: bandwidth tests run in the background,
//! everything else is handled as a NAT-probe task and driven through the
//! full probe chain inline.

use std::sync::Arc;

use edgelink_bandwidth::BandwidthService;
use edgelink_probe::UdpProbe;
use edgelink_proto::AgentTask;
use tracing::{info, warn};

pub struct Dispatcher {
    probe: Arc<UdpProbe>,
    bandwidth: Arc<BandwidthService>,
    probe_token: String,
}

impl Dispatcher {
    pub fn new(probe: Arc<UdpProbe>, bandwidth: Arc<BandwidthService>, probe_token: String) -> Self {
        Self {
            probe,
            bandwidth,
            probe_token,
        }
    }

    /// Route one task message to its engine
    pub async fn dispatch(&self, message: &str) {
        let task = match AgentTask::from_json(message) {
            Ok(task) => task,
            Err(err) => {
                warn!(error = %err, "dropping undecodable task message");
                return;
            }
        };

        match task {
            AgentTask::BandwidthTest(task) => {
                info!(test_id = %task.test_id, "received bandwidth test task");
                let bandwidth = Arc::clone(&self.bandwidth);
                let message = message.to_string();
                tokio::spawn(async move {
                    bandwidth.handle_task(&message).await;
                });
            }
            AgentTask::NatProbe(task) => {
                info!(
                    task_id = %task.task_id,
                    checker = %task.checker_addr(),
                    "received nat probe task"
                );
                match self.probe.run_chain(&task, &self.probe_token).await {
                    Ok(ack) => info!(
                        task_id = %task.task_id,
                        final_stage = ack.stage,
                        "probe chain completed"
                    ),
                    Err(err) => warn!(
                        task_id = %task.task_id,
                        error = %err,
                        "probe chain failed"
                    ),
                }
            }
        }
    }
}
