//! Driver retry policy
//!
//! The orchestrator core never retries. Drivers (CLI, daemon) wrap each
//! orchestrator call in a [`RetryPolicy`]: contention errors are retried
//! from a fresh read with exponential backoff, a bounded number of times.
//! Failed step actions are retried only when configured.

use crate::config::RetryConfig;
use crate::error::{EngineError, ErrorKind, Result};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    retry_step_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retry_step_failures: config.retry_step_failures,
        }
    }

    /// A policy that tries exactly once
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, err: &EngineError) -> bool {
        let kind = err.kind();
        kind.is_contention()
            || (self.retry_step_failures
                && matches!(kind, ErrorKind::StepExecution | ErrorKind::StepTimeout))
    }

    /// Exponential backoff doubling from the base delay, one delay per retry
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Each attempt must re-read whatever it needs.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .when(|err: &EngineError| self.should_retry(err))
            .notify(|err: &EngineError, delay: Duration| {
                tracing::info!(
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after recoverable error"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;
    use gantry_types::{ReceiptId, RunId, StepErrorKind, StepName};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> EngineError {
        EngineError::VersionConflict {
            run_id: RunId::new("a-1"),
            expected: 1,
            actual: 2,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
            retry_step_failures: false,
        });
        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[3], Duration::from_millis(350));

        assert_eq!(RetryPolicy::none().backoff().build().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_contention_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run(|| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::default()
            .run(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;
        assert!(matches!(result, Err(EngineError::VersionConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            retry_step_failures: false,
        });
        let started = tokio::time::Instant::now();
        let result: Result<()> = policy.run(|| async { Err(conflict()) }).await;
        assert!(result.is_err());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn step_failures_not_retried_by_default() {
        fn failure() -> EngineError {
            EngineError::StepExecution {
                step: StepName::Voice,
                kind: StepErrorKind::ActionFailed,
                message: "tts quota".into(),
                receipt_id: ReceiptId::generate(),
            }
        }
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::default()
            .run(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(failure())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let eager = RetryPolicy::from_config(&RetryConfig {
            retry_step_failures: true,
            ..Default::default()
        });
        assert!(eager.should_retry(&failure()));
    }
}
