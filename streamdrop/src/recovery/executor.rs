//! Carries out recovery strategies with bounded retry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use super::strategy::RecoveryStrategy;
use crate::config::ProcessTimings;
use crate::domain::{QualityTier, RetryPolicy};
use crate::process::ProcessRole;
use crate::{Error, Result};

/// Operations a pipeline exposes to the executor.
#[async_trait]
pub trait RecoveryTarget: Send {
    fn pipeline_id(&self) -> &str;

    /// Terminate one process (`grace` before a forced kill), wait `pause`,
    /// then launch it again. Siblings are left alone.
    async fn restart_process(
        &mut self,
        role: ProcessRole,
        grace: Duration,
        pause: Duration,
    ) -> Result<()>;

    /// Tear everything down, wait `settle`, run the start sequence again.
    async fn full_restart(&mut self, settle: Duration) -> Result<()>;

    /// Step the configured quality down one tier and persist it.
    /// Fails with [`Error::QualityFloor`] at the lowest tier.
    async fn lower_quality(&mut self) -> Result<QualityTier>;
}

/// Result of one recovery pass.
#[derive(Debug)]
pub struct ExecutionReport {
    pub strategy: RecoveryStrategy,
    pub success: bool,
    /// Retries used after the first try.
    pub retries: u32,
    pub duration: Duration,
    /// Last error when the pass failed.
    pub error: Option<Error>,
}

/// Runs a strategy against a [`RecoveryTarget`].
///
/// Retryable failures are retried with exponential backoff up to the policy
/// limit; anything else ends the pass at once.
#[derive(Debug, Clone)]
pub struct RecoveryExecutor {
    retry: RetryPolicy,
    timings: ProcessTimings,
}

impl RecoveryExecutor {
    pub fn new(retry: RetryPolicy, timings: ProcessTimings) -> Self {
        Self { retry, timings }
    }

    pub async fn execute<T>(&self, target: &mut T, strategy: RecoveryStrategy) -> ExecutionReport
    where
        T: RecoveryTarget + ?Sized,
    {
        let started = Instant::now();
        let mut retries = 0;

        // Lowering the tier happens once; only the restart behind it is retried.
        if strategy == RecoveryStrategy::ReduceQuality {
            match target.lower_quality().await {
                Ok(tier) => {
                    info!(pipeline_id = %target.pipeline_id(), quality = %tier, "Quality reduced");
                }
                Err(e) => {
                    return ExecutionReport {
                        strategy,
                        success: false,
                        retries,
                        duration: started.elapsed(),
                        error: Some(e),
                    };
                }
            }
        }

        let error = loop {
            match self.run_once(target, strategy).await {
                Ok(()) => break None,
                Err(e) if e.is_retryable() && self.retry.should_retry(retries) => {
                    let delay = self.retry.delay_for_retry(retries);
                    retries += 1;
                    warn!(
                        pipeline_id = %target.pipeline_id(),
                        %strategy,
                        retry = retries,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Recovery step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Some(e),
            }
        };

        ExecutionReport {
            strategy,
            success: error.is_none(),
            retries,
            duration: started.elapsed(),
            error,
        }
    }

    async fn run_once<T>(&self, target: &mut T, strategy: RecoveryStrategy) -> Result<()>
    where
        T: RecoveryTarget + ?Sized,
    {
        let t = &self.timings;
        match strategy {
            RecoveryStrategy::RestartEncoder => {
                target
                    .restart_process(ProcessRole::Encoder, t.terminate_grace, t.settle)
                    .await
            }
            RecoveryStrategy::RestartRenderer => {
                target
                    .restart_process(ProcessRole::Renderer, t.terminate_grace, t.settle)
                    .await
            }
            RecoveryStrategy::Reconnect => {
                target
                    .restart_process(ProcessRole::Encoder, t.reconnect_grace, t.reconnect_cooldown)
                    .await
            }
            RecoveryStrategy::RestartDisplay
            | RecoveryStrategy::ReduceQuality
            | RecoveryStrategy::FullRestart => target.full_restart(t.full_restart_settle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeTarget {
        quality: Option<QualityTier>,
        failures_left: u32,
        fatal: bool,
        calls: Vec<String>,
    }

    #[async_trait]
    impl RecoveryTarget for FakeTarget {
        fn pipeline_id(&self) -> &str {
            "fake"
        }

        async fn restart_process(
            &mut self,
            role: ProcessRole,
            grace: Duration,
            pause: Duration,
        ) -> Result<()> {
            self.calls.push(format!("restart:{role}:{}:{}", grace.as_millis(), pause.as_millis()));
            self.outcome()
        }

        async fn full_restart(&mut self, _settle: Duration) -> Result<()> {
            self.calls.push("full".into());
            self.outcome()
        }

        async fn lower_quality(&mut self) -> Result<QualityTier> {
            let current = self.quality.unwrap_or_default();
            let next = current.downgrade().ok_or(Error::QualityFloor)?;
            self.quality = Some(next);
            self.calls.push(format!("lower:{next}"));
            Ok(next)
        }
    }

    impl FakeTarget {
        fn outcome(&mut self) -> Result<()> {
            if self.fatal {
                return Err(Error::config("broken"));
            }
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(Error::launch(ProcessRole::Encoder, "exited"));
            }
            Ok(())
        }
    }

    fn timings() -> ProcessTimings {
        ProcessTimings {
            terminate_grace: Duration::from_millis(5),
            reconnect_grace: Duration::from_millis(10),
            settle: Duration::from_millis(1),
            full_restart_settle: Duration::from_millis(1),
            reconnect_cooldown: Duration::from_millis(7),
            ..ProcessTimings::uniform(Duration::from_millis(1))
        }
    }

    fn executor(max_retries: u32) -> RecoveryExecutor {
        RecoveryExecutor::new(RetryPolicy::fixed(max_retries, Duration::from_millis(1)), timings())
    }

    #[tokio::test]
    async fn test_restart_encoder_first_try() {
        let mut target = FakeTarget::default();
        let report = executor(3).execute(&mut target, RecoveryStrategy::RestartEncoder).await;
        assert!(report.success);
        assert_eq!(report.retries, 0);
        assert_eq!(target.calls, vec!["restart:encoder:5:1"]);
    }

    #[tokio::test]
    async fn test_reconnect_uses_longer_grace() {
        let mut target = FakeTarget::default();
        executor(0).execute(&mut target, RecoveryStrategy::Reconnect).await;
        assert_eq!(target.calls, vec!["restart:encoder:10:7"]);
    }

    #[tokio::test]
    async fn test_restart_display_is_full_restart() {
        let mut target = FakeTarget::default();
        executor(0).execute(&mut target, RecoveryStrategy::RestartDisplay).await;
        assert_eq!(target.calls, vec!["full"]);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut target = FakeTarget {
            failures_left: 2,
            ..Default::default()
        };
        let report = executor(3).execute(&mut target, RecoveryStrategy::RestartRenderer).await;
        assert!(report.success);
        assert_eq!(report.retries, 2);
        assert_eq!(target.calls.len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mut target = FakeTarget {
            failures_left: 10,
            ..Default::default()
        };
        let report = executor(3).execute(&mut target, RecoveryStrategy::FullRestart).await;
        assert!(!report.success);
        assert_eq!(report.retries, 3);
        assert_eq!(target.calls.len(), 4);
        assert!(matches!(report.error, Some(Error::Launch { .. })));
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let mut target = FakeTarget {
            fatal: true,
            ..Default::default()
        };
        let report = executor(3).execute(&mut target, RecoveryStrategy::FullRestart).await;
        assert!(!report.success);
        assert_eq!(report.retries, 0);
        assert_eq!(target.calls.len(), 1);
    }

    #[tokio::test]
    async fn test_reduce_quality_walks_ladder_then_fails() {
        let mut target = FakeTarget {
            quality: Some(QualityTier::Ultra),
            ..Default::default()
        };
        let executor = executor(3);
        for _ in 0..3 {
            let report = executor.execute(&mut target, RecoveryStrategy::ReduceQuality).await;
            assert!(report.success);
        }
        assert_eq!(target.quality, Some(QualityTier::Low));

        let before = target.calls.len();
        let report = executor.execute(&mut target, RecoveryStrategy::ReduceQuality).await;
        assert!(!report.success);
        assert_eq!(report.retries, 0);
        assert!(matches!(report.error, Some(Error::QualityFloor)));
        assert_eq!(target.calls.len(), before);
        assert_eq!(
            &target.calls[..2],
            &["lower:high".to_string(), "full".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reduce_quality_lowers_once_across_retries() {
        let mut target = FakeTarget {
            quality: Some(QualityTier::High),
            failures_left: 1,
            ..Default::default()
        };
        let report = executor(3).execute(&mut target, RecoveryStrategy::ReduceQuality).await;
        assert!(report.success);
        assert_eq!(report.retries, 1);
        assert_eq!(target.quality, Some(QualityTier::Medium));
        assert_eq!(target.calls, vec!["lower:medium", "full", "full"]);
    }
}
