//! Background loop that keeps registered pipelines alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SupervisorRegistry;
use crate::config::SupervisorConfig;

/// Periodic liveness and metrics passes over a [`SupervisorRegistry`].
#[derive(Debug, Clone)]
pub struct SupervisorMonitor {
    registry: Arc<SupervisorRegistry>,
    check_interval: Duration,
    metrics_interval: Duration,
    cancel: CancellationToken,
}

impl SupervisorMonitor {
    pub fn new(
        registry: Arc<SupervisorRegistry>,
        check_interval: Duration,
        metrics_interval: Duration,
    ) -> Self {
        Self {
            registry,
            check_interval,
            metrics_interval,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(registry: Arc<SupervisorRegistry>, config: &SupervisorConfig) -> Self {
        Self::new(registry, config.check_interval, config.metrics_interval)
    }

    /// Cancelling this token ends the loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One liveness pass followed by one metrics pass.
    pub async fn tick(&self) {
        self.registry.check_all().await;
        self.registry.observe_all().await;
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!(
            check_interval_secs = self.check_interval.as_secs_f64(),
            metrics_interval_secs = self.metrics_interval.as_secs_f64(),
            "Supervisor monitor started"
        );

        let mut check = tokio::time::interval(self.check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut metrics = tokio::time::interval(self.metrics_interval);
        metrics.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Supervisor monitor stopping");
                    break;
                }
                _ = check.tick() => {
                    debug!("Running liveness pass");
                    self.registry.check_all().await;
                }
                _ = metrics.tick() => {
                    debug!("Running metrics pass");
                    self.registry.observe_all().await;
                }
            }
        }
    }
}
