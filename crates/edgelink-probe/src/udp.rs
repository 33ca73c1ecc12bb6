//! Challenge/ACK probe over a shared UDP socket

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use edgelink_proto::{ProbeAck, ProbePayload, ProbeTask};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ProbeError;

/// Fixed local port shared by all probe attempts
pub const DEFAULT_PROBE_PORT: u16 = 53000;

/// Deadline for one whole probe attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(6);

/// Wait after each round of sends before the next round starts
const ROUND_WAIT: Duration = Duration::from_millis(50);

/// Per-read deadline on the ack reader, so it observes shutdown promptly
const READ_DEADLINE: Duration = Duration::from_millis(200);

const ROUNDS: u32 = 3;
const PACKETS_PER_ROUND: u32 = 3;

/// Redirect hops after the initial stage in a full probe sequence
const CHAIN_STAGES: u32 = 3;

/// UDP NAT-probe engine.
///
/// The socket is bound once and shared by every attempt. Ack matching is
/// structural: each attempt's reader accepts the first datagram that
/// decodes as an ack, so concurrent attempts on the same socket can
/// receive each other's acks.
pub struct UdpProbe {
    socket: Option<Arc<UdpSocket>>,
    node_id: String,
}

impl UdpProbe {
    /// Bind the shared probe socket.
    ///
    /// A port conflict is tolerated rather than fatal: another agent
    /// instance already owns the socket, and attempts on this instance
    /// report [`ProbeError::SocketUnavailable`].
    pub async fn bind(local_port: u16, node_id: String) -> Result<Self, ProbeError> {
        match UdpSocket::bind(("0.0.0.0", local_port)).await {
            Ok(socket) => {
                debug!(port = local_port, "probe socket bound");
                Ok(Self {
                    socket: Some(Arc::new(socket)),
                    node_id,
                })
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                warn!(
                    port = local_port,
                    "probe port already in use, assuming another instance owns it"
                );
                Ok(Self {
                    socket: None,
                    node_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Local address of the shared socket, when this instance owns it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Run one probe attempt against `address`.
    ///
    /// Sends three identical packets per round (fresh timestamps) to
    /// counter UDP loss, waits briefly after each round, and gives up
    /// after three rounds. Exactly one outcome is produced: the first
    /// structurally valid ack, or [`ProbeError::Timeout`].
    pub async fn send_probe(
        &self,
        address: &str,
        task_id: &str,
        stage: u32,
        sub_task_id: &str,
        token: &str,
    ) -> Result<ProbeAck, ProbeError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(ProbeError::SocketUnavailable)?
            .clone();

        let checker_addr = tokio::net::lookup_host(address)
            .await
            .map_err(|_| ProbeError::UnresolvedAddress(address.to_string()))?
            .next()
            .ok_or_else(|| ProbeError::UnresolvedAddress(address.to_string()))?;

        let (ack_tx, mut ack_rx) = mpsc::channel::<ProbeAck>(1);
        let reader = tokio::spawn(read_first_ack(Arc::clone(&socket), ack_tx));

        let outcome = tokio::time::timeout(ATTEMPT_TIMEOUT, async {
            for round in 1..=ROUNDS {
                debug!(round, %checker_addr, "sending probe packets");

                for seq in 1..=PACKETS_PER_ROUND {
                    let payload = ProbePayload {
                        task_id: task_id.to_string(),
                        sub_task_id: sub_task_id.to_string(),
                        node_id: self.node_id.clone(),
                        round,
                        seq,
                        timestamp: unix_millis(),
                        token: token.to_string(),
                        stage,
                    };
                    let datagram = serde_json::to_vec(&payload)?;
                    socket.send_to(&datagram, checker_addr).await?;
                }

                match tokio::time::timeout(ROUND_WAIT, ack_rx.recv()).await {
                    Ok(Some(ack)) => {
                        info!(round, stage = ack.stage, "received probe ack");
                        return Ok(ack);
                    }
                    // Reader gone; no ack can arrive anymore
                    Ok(None) => break,
                    Err(_) => debug!(round, "no ack yet"),
                }
            }
            Err(ProbeError::Timeout)
        })
        .await
        .unwrap_or(Err(ProbeError::Timeout));

        // Tear the reader down however the attempt concluded
        reader.abort();
        outcome
    }

    /// Drive a full probe sequence: the initial stage against the task's
    /// checker, then three redirects to whatever endpoint each ack
    /// advertises. Any stage failure ends the sequence.
    pub async fn run_chain(&self, task: &ProbeTask, token: &str) -> Result<ProbeAck, ProbeError> {
        let mut ack = self
            .send_probe(
                &task.checker_addr(),
                &task.task_id,
                0,
                &task.sub_task_id,
                token,
            )
            .await?;

        for hop in 1..=CHAIN_STAGES {
            debug!(hop, next = %ack.next_hop(), stage = ack.stage, "probe chain advancing");
            ack = self
                .send_probe(
                    &ack.next_hop(),
                    &ack.task_id,
                    ack.stage,
                    &ack.sub_task_id,
                    token,
                )
                .await?;
        }

        Ok(ack)
    }
}

/// Read datagrams until one decodes as an ack, then deliver it and stop.
///
/// Undecodable datagrams are discarded. The short per-read deadline keeps
/// the loop responsive to abort. No correlation against the outbound
/// round/seq/task is performed before the ack is trusted.
// TODO: correlate acks with the outbound task_id and round before trusting
// the redirect; a structurally valid datagram from anywhere is accepted.
async fn read_first_ack(socket: Arc<UdpSocket>, ack_tx: mpsc::Sender<ProbeAck>) {
    let mut buffer = [0u8; 2048];

    loop {
        let received = match tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buffer)).await
        {
            Ok(Ok((len, from))) => Some((len, from)),
            Ok(Err(err)) => {
                warn!(error = %err, "probe socket read failed");
                return;
            }
            Err(_) => None,
        };

        let Some((len, from)) = received else {
            continue;
        };

        match serde_json::from_slice::<ProbeAck>(&buffer[..len]) {
            Ok(ack) => {
                debug!(%from, stage = ack.stage, "decoded probe ack");
                let _ = ack_tx.send(ack).await;
                return;
            }
            Err(_) => continue,
        }
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
