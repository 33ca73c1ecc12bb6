//! Bandwidth task intake
//!
//! Accepts raw task JSON from the control channel, validates it, and runs
//! at most one test at a time. A task arriving while a run is in flight is
//! skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use edgelink_proto::BandwidthTask;
use tracing::{info, warn};

use crate::uploader::unix_now;
use crate::{BandwidthError, BearerTokenProvider, TestResult, Uploader};

/// Grace added on top of the challenge duration for the whole task
const TASK_GRACE: Duration = Duration::from_secs(10);

/// Accepts and executes bandwidth test tasks, one at a time
pub struct BandwidthService {
    running: AtomicBool,
    tokens: Arc<dyn BearerTokenProvider>,
}

impl BandwidthService {
    pub fn new(tokens: Arc<dyn BearerTokenProvider>) -> Self {
        Self {
            running: AtomicBool::new(false),
            tokens,
        }
    }

    /// Process one bandwidth test task message.
    ///
    /// Never returns an error: a concurrent run means the task is skipped,
    /// and parse/validation/run failures are logged and drop the task.
    pub async fn handle_task(&self, message: &str) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("bandwidth test already running, skipping new task");
            return;
        }

        let outcome = self.run_task(message).await;
        self.running.store(false, Ordering::Release);

        match outcome {
            Ok(result) => {
                info!(
                    test_id = %result.test_id,
                    throughput_mbps = format!("{:.2}", result.throughput_mbps()),
                    total_bytes = result.total_bytes,
                    success = result.success,
                    "bandwidth test result"
                );
            }
            Err(err) => warn!(error = %err, "bandwidth test failed"),
        }
    }

    /// Whether a test is currently in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn run_task(&self, message: &str) -> Result<TestResult, BandwidthError> {
        let task: BandwidthTask = serde_json::from_str(message)?;
        validate_task(&task)?;

        info!(
            test_id = %task.test_id,
            checker = format!("{}:{}", task.checker_host, task.checker_port),
            concurrency = task.challenge.concurrency,
            chunks_per_stream = task.challenge.per_stream_total_chunks,
            "starting bandwidth test"
        );

        let task_deadline =
            Duration::from_millis(task.challenge.duration_ms) + TASK_GRACE;
        let uploader = Uploader::new(task, Arc::clone(&self.tokens))?;

        match tokio::time::timeout(task_deadline, uploader.run()).await {
            Ok(result) => result,
            Err(_) => Err(BandwidthError::Deadline),
        }
    }
}

fn validate_task(task: &BandwidthTask) -> Result<(), BandwidthError> {
    if task.test_id.is_empty() {
        return Err(BandwidthError::validation("test_id", "test_id is required"));
    }
    if task.checker_host.is_empty() {
        return Err(BandwidthError::validation(
            "checker_host",
            "checker_host is required",
        ));
    }
    if task.checker_port == 0 {
        return Err(BandwidthError::validation(
            "checker_port",
            "checker_port must be positive",
        ));
    }
    if task.challenge.seed.is_empty() {
        return Err(BandwidthError::validation(
            "challenge.seed",
            "seed is required",
        ));
    }
    if task.challenge.hmac_key.is_empty() {
        return Err(BandwidthError::validation(
            "challenge.hmac_key",
            "hmac_key is required",
        ));
    }
    if task.challenge.nonce.is_empty() {
        return Err(BandwidthError::validation(
            "challenge.nonce",
            "nonce is required",
        ));
    }
    if task.challenge.chunk_size == 0 {
        return Err(BandwidthError::validation(
            "challenge.chunk_size",
            "chunk_size must be positive",
        ));
    }
    if task.challenge.per_stream_total_chunks == 0 {
        return Err(BandwidthError::validation(
            "challenge.per_stream_total_chunks",
            "per_stream_total_chunks must be positive",
        ));
    }
    if task.challenge.expires_at > 0 && unix_now() > task.challenge.expires_at {
        return Err(BandwidthError::validation(
            "challenge.expires_at",
            "task has expired",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenError;
    use async_trait::async_trait;
    use edgelink_proto::Challenge;

    struct StaticTokens;

    #[async_trait]
    impl BearerTokenProvider for StaticTokens {
        async fn bearer_token(&self) -> Result<String, TokenError> {
            Ok("test-token".to_string())
        }
    }

    fn service() -> BandwidthService {
        BandwidthService::new(Arc::new(StaticTokens))
    }

    fn valid_task() -> BandwidthTask {
        BandwidthTask {
            task_type: "bandwidth_test".to_string(),
            test_id: "bw-1".to_string(),
            checker_host: "checker.example.com".to_string(),
            checker_port: 8443,
            challenge: Challenge {
                seed: "00112233".to_string(),
                hmac_key: "44556677".to_string(),
                nonce: "n-1".to_string(),
                expires_at: 0,
                duration_ms: 5_000,
                chunk_size: 1024,
                per_stream_total_chunks: 8,
                concurrency: 2,
            },
        }
    }

    fn field_of(err: BandwidthError) -> &'static str {
        match err {
            BandwidthError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn validation_names_the_offending_field() {
        let mut task = valid_task();
        task.test_id.clear();
        assert_eq!(field_of(validate_task(&task).unwrap_err()), "test_id");

        let mut task = valid_task();
        task.checker_host.clear();
        assert_eq!(field_of(validate_task(&task).unwrap_err()), "checker_host");

        let mut task = valid_task();
        task.checker_port = 0;
        assert_eq!(field_of(validate_task(&task).unwrap_err()), "checker_port");

        let mut task = valid_task();
        task.challenge.seed.clear();
        assert_eq!(field_of(validate_task(&task).unwrap_err()), "challenge.seed");

        let mut task = valid_task();
        task.challenge.hmac_key.clear();
        assert_eq!(
            field_of(validate_task(&task).unwrap_err()),
            "challenge.hmac_key"
        );

        let mut task = valid_task();
        task.challenge.nonce.clear();
        assert_eq!(
            field_of(validate_task(&task).unwrap_err()),
            "challenge.nonce"
        );

        let mut task = valid_task();
        task.challenge.chunk_size = 0;
        assert_eq!(
            field_of(validate_task(&task).unwrap_err()),
            "challenge.chunk_size"
        );

        let mut task = valid_task();
        task.challenge.per_stream_total_chunks = 0;
        assert_eq!(
            field_of(validate_task(&task).unwrap_err()),
            "challenge.per_stream_total_chunks"
        );
    }

    #[test]
    fn past_expiry_fails_on_expires_at() {
        let mut task = valid_task();
        task.challenge.expires_at = unix_now() - 60;
        assert_eq!(
            field_of(validate_task(&task).unwrap_err()),
            "challenge.expires_at"
        );
    }

    #[test]
    fn future_expiry_is_accepted() {
        let mut task = valid_task();
        task.challenge.expires_at = unix_now() + 3600;
        assert!(validate_task(&task).is_ok());
    }

    #[tokio::test]
    async fn malformed_task_is_dropped_and_gate_released() {
        let service = service();
        service.handle_task("{ not json").await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn task_while_running_is_skipped_without_touching_the_gate() {
        let service = service();

        // Simulate an in-flight run
        service.running.store(true, Ordering::Release);

        let task = serde_json::to_string(&valid_task()).unwrap();
        service.handle_task(&task).await;

        // The skipped task must not clear the in-flight run's gate
        assert!(service.is_running());
        service.running.store(false, Ordering::Release);
    }

    #[tokio::test]
    async fn unreachable_checker_fails_streams_without_aborting_siblings() {
        let mut task = valid_task();
        // Nothing listens here; every stream fails at stream granularity
        task.checker_host = "127.0.0.1".to_string();
        task.checker_port = 1;
        task.challenge.duration_ms = 3_000;
        task.challenge.concurrency = 3;

        let uploader = Uploader::new(task, Arc::new(StaticTokens)).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), uploader.run())
            .await
            .expect("run must terminate")
            .expect("run reports per-stream failures, not an error");

        assert!(!result.success);
        assert_eq!(result.stream_results.len(), 3);
        for stream in &result.stream_results {
            assert!(!stream.success);
            assert!(stream.error.is_some());
        }
    }
}
