//! Concurrent authenticated upload streams
//!
//! Each stream generates its chunk sequence on the fly and feeds it through
//! a bounded pipe into a streaming POST body, so memory stays at a small
//! multiple of the chunk size no matter how many chunks the challenge asks
//! for.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use edgelink_codec::ChunkGenerator;
use edgelink_proto::BandwidthTask;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{BandwidthError, BearerTokenProvider};

/// Streams started when the challenge leaves concurrency unset
pub const DEFAULT_CONCURRENCY: u32 = 4;

/// Chunks buffered between the generator and the HTTP writer. The producer
/// blocks once this fills, which is what bounds per-stream memory.
const CHUNK_PIPE_DEPTH: usize = 4;

/// Outcome of a single upload stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamResult {
    pub stream_id: u32,
    pub chunks_sent: u32,
    pub bytes_sent: u64,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

impl StreamResult {
    fn failed(stream_id: u32, error: String) -> Self {
        Self {
            stream_id,
            chunks_sent: 0,
            bytes_sent: 0,
            duration: Duration::ZERO,
            success: false,
            error: Some(error),
        }
    }
}

/// Aggregated outcome of one bandwidth test
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test_id: String,
    pub total_bytes: u64,
    pub total_chunks: u64,
    pub duration: Duration,
    pub stream_results: Vec<StreamResult>,
    pub success: bool,
}

impl TestResult {
    /// Overall throughput in Mbps; zero when the run had no duration
    pub fn throughput_mbps(&self) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        (self.total_bytes as f64) * 8.0 / seconds / 1_000_000.0
    }
}

/// Runs the concurrent upload streams for one validated task
pub struct Uploader {
    task: BandwidthTask,
    client: reqwest::Client,
    tokens: Arc<dyn BearerTokenProvider>,
}

impl Uploader {
    pub fn new(
        task: BandwidthTask,
        tokens: Arc<dyn BearerTokenProvider>,
    ) -> Result<Self, BandwidthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(task.challenge.duration_ms + 5_000))
            .build()?;

        Ok(Self {
            task,
            client,
            tokens,
        })
    }

    /// Run every stream to completion and aggregate the results.
    ///
    /// Stream failures (non-200, transport error, deadline, panic) are
    /// contained: siblings keep uploading and the failure is reflected in
    /// that stream's result only.
    pub async fn run(&self) -> Result<TestResult, BandwidthError> {
        let challenge = &self.task.challenge;
        if challenge.expires_at > 0 && unix_now() > challenge.expires_at {
            return Err(BandwidthError::Expired);
        }

        let started = Instant::now();
        let concurrency = if challenge.concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            challenge.concurrency
        };
        let stream_deadline = Duration::from_millis(challenge.duration_ms);

        let mut handles = Vec::with_capacity(concurrency as usize);
        for stream_id in 0..concurrency {
            let stream = UploadStream {
                task: self.task.clone(),
                client: self.client.clone(),
                tokens: Arc::clone(&self.tokens),
                stream_id,
            };
            handles.push((stream_id, tokio::spawn(stream.run(stream_deadline))));
        }

        let mut result = TestResult {
            test_id: self.task.test_id.clone(),
            total_bytes: 0,
            total_chunks: 0,
            duration: Duration::ZERO,
            stream_results: Vec::with_capacity(concurrency as usize),
            success: true,
        };

        for (stream_id, handle) in handles {
            let stream_result = match handle.await {
                Ok(stream_result) => stream_result,
                // A panicking stream must not take the process down
                Err(join_error) => {
                    warn!(stream_id, error = %join_error, "upload stream task failed");
                    StreamResult::failed(stream_id, format!("stream task failed: {join_error}"))
                }
            };

            result.total_bytes += stream_result.bytes_sent;
            result.total_chunks += u64::from(stream_result.chunks_sent);
            if !stream_result.success {
                result.success = false;
            }
            result.stream_results.push(stream_result);
        }

        result.duration = started.elapsed();

        info!(
            test_id = %result.test_id,
            total_bytes = result.total_bytes,
            total_chunks = result.total_chunks,
            duration_ms = result.duration.as_millis() as u64,
            success = result.success,
            "bandwidth test completed"
        );

        Ok(result)
    }
}

struct UploadStream {
    task: BandwidthTask,
    client: reqwest::Client,
    tokens: Arc<dyn BearerTokenProvider>,
    stream_id: u32,
}

impl UploadStream {
    async fn run(self, deadline: Duration) -> StreamResult {
        let started = Instant::now();
        let stream_id = self.stream_id;
        let challenge = &self.task.challenge;

        let generator = match ChunkGenerator::new(
            &challenge.seed,
            &challenge.hmac_key,
            challenge.chunk_size,
            stream_id,
        ) {
            Ok(generator) => generator,
            Err(err) => {
                return StreamResult::failed(stream_id, format!("chunk generator: {err}"))
            }
        };

        let token = match self.tokens.bearer_token().await {
            Ok(token) => token,
            Err(err) => return StreamResult::failed(stream_id, err.to_string()),
        };

        let url = format!(
            "https://{}:{}/speed/upload?test_id={}&nonce={}&stream_id={}",
            self.task.checker_host,
            self.task.checker_port,
            self.task.test_id,
            challenge.nonce,
            stream_id
        );

        // Bounded pipe: the producer stalls on `send` until the HTTP layer
        // has drained earlier chunks.
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(CHUNK_PIPE_DEPTH);
        let total_chunks = challenge.per_stream_total_chunks;
        let producer = tokio::spawn(async move {
            let mut chunks_sent: u32 = 0;
            let mut bytes_sent: u64 = 0;
            for seq in 0..total_chunks {
                let chunk = generator.generate(seq);
                let len = chunk.len() as u64;
                // The receiver disappears when the request finishes or is
                // cancelled; either way this is the stop signal.
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
                chunks_sent += 1;
                bytes_sent += len;
            }
            (chunks_sent, bytes_sent)
        });

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .bearer_auth(token)
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
            .send();

        let outcome = match tokio::time::timeout(deadline, request).await {
            Err(_) => Err("stream deadline exceeded".to_string()),
            Ok(Err(err)) => Err(format!("request failed: {err}")),
            Ok(Ok(response)) => {
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(format!("server returned status {status}: {body}"))
                }
            }
        };

        // Dropping the request body on failure closed the pipe, so the
        // producer terminates at its next chunk boundary.
        let (chunks_sent, bytes_sent) = producer.await.unwrap_or((0, 0));
        let duration = started.elapsed();

        match outcome {
            Ok(()) => {
                debug!(
                    stream_id,
                    chunks = chunks_sent,
                    bytes = bytes_sent,
                    duration_ms = duration.as_millis() as u64,
                    "upload stream completed"
                );
                StreamResult {
                    stream_id,
                    chunks_sent,
                    bytes_sent,
                    duration,
                    success: true,
                    error: None,
                }
            }
            Err(error) => StreamResult {
                stream_id,
                chunks_sent,
                bytes_sent,
                duration,
                success: false,
                error: Some(error),
            },
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
