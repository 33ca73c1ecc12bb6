//! Tunnel session supervision

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{WorkerConfig, WorkerStatus};
use crate::topology::build_topology;
use crate::transport::{TransportError, TunnelService, TunnelTransport};
use crate::WorkerError;

/// Wait for the OS to release bound ports after a stop
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Pause between stop and start during a restart
const RESTART_DELAY: Duration = Duration::from_secs(1);

struct SessionState {
    config: Option<WorkerConfig>,
    services: Vec<Arc<dyn TunnelService>>,
    serve_tasks: Vec<JoinHandle<()>>,
    error_slot: Option<mpsc::Receiver<TransportError>>,
    is_running: bool,
    start_time: i64,
}

/// Supervises one tunnel session at a time.
///
/// Exactly one instance exists process-wide; the composition root
/// constructs it and hands out clones of the `Arc`.
pub struct WorkerManager {
    transport: Arc<dyn TunnelTransport>,
    state: Mutex<SessionState>,
}

impl WorkerManager {
    pub fn new(transport: Arc<dyn TunnelTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState {
                config: None,
                services: Vec::new(),
                serve_tasks: Vec::new(),
                error_slot: None,
                is_running: false,
                start_time: 0,
            }),
        }
    }

    /// Start a tunnel session.
    ///
    /// Rejected while one is running. Validation or transport failure
    /// leaves nothing started and the manager stopped.
    pub async fn start(&self, config: WorkerConfig) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;

        if state.is_running {
            return Err(WorkerError::AlreadyRunning);
        }

        config.validate()?;

        let topology = build_topology(&config);
        let services = self.transport.build(&topology)?;

        // Size-1 error slot: a service error is a best-effort signal; when
        // the previous one is still unconsumed, the new one is dropped
        // rather than blocking the service task.
        let (error_tx, error_rx) = mpsc::channel::<TransportError>(1);

        for (index, service) in services.iter().enumerate() {
            let service = Arc::clone(service);
            let error_tx = error_tx.clone();
            state.serve_tasks.push(tokio::spawn(async move {
                if let Err(err) = service.serve().await {
                    error!(service = index, error = %err, "tunnel service error");
                    let _ = error_tx.try_send(err);
                }
            }));
        }

        info!(
            services = services.len(),
            tunnel_id = %config.tunnel_id,
            "proxy worker started"
        );

        state.services = services;
        state.error_slot = Some(error_rx);
        state.config = Some(config);
        state.is_running = true;
        state.start_time = unix_now();

        Ok(())
    }

    /// Stop the running session.
    ///
    /// Closing is best-effort per service; a close failure is logged and
    /// the rest are still closed. Waits a settle delay so the OS releases
    /// the bound ports before the next start.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;

        if !state.is_running {
            return Err(WorkerError::NotRunning);
        }

        info!("stopping proxy worker services");

        for (index, service) in state.services.iter().enumerate() {
            if let Err(err) = service.close().await {
                warn!(service = index, error = %err, "failed to close tunnel service");
            }
        }
        state.services.clear();

        // Tear down the session's supervision scope; start creates a
        // fresh one
        for task in state.serve_tasks.drain(..) {
            task.abort();
        }
        state.error_slot = None;

        tokio::time::sleep(SETTLE_DELAY).await;

        state.is_running = false;
        state.config = None;
        state.start_time = 0;

        info!("proxy worker stopped");
        Ok(())
    }

    /// Stop (best-effort) and start again with the remembered config
    pub async fn restart(&self) -> Result<(), WorkerError> {
        let config = {
            let state = self.state.lock().await;
            state.config.clone()
        };
        let Some(config) = config else {
            return Err(WorkerError::NoConfig);
        };

        if let Err(err) = self.stop().await {
            warn!(error = %err, "failed to stop worker during restart");
        }

        tokio::time::sleep(RESTART_DELAY).await;

        self.start(config).await
    }

    /// Snapshot of the current session; never touches the network
    pub async fn status(&self) -> WorkerStatus {
        let mut state = self.state.lock().await;

        let error = state
            .error_slot
            .as_mut()
            .and_then(|slot| slot.try_recv().ok())
            .map(|err| err.to_string());

        let mut status = WorkerStatus {
            is_running: state.is_running,
            pid: std::process::id(),
            start_time: state.start_time,
            error,
            ..WorkerStatus::default()
        };

        if let Some(config) = &state.config {
            status.local_port = config.local_port;
            status.fixed_port = config.fixed_port;
            status.tunnel_id = config.tunnel_id.clone();
        }

        status
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
