//! Services shared by every pipeline instance of a registry.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::events::{SupervisorEvent, SupervisorEventBroadcaster};
use crate::config::SupervisorConfig;
use crate::domain::{PipelineState, RetryPolicy};
use crate::metrics::Alert;
use crate::platforms::PlatformCatalog;
use crate::process::{Backends, PipelineLauncher, UsageSampler, UsageSource};
use crate::recovery::{RecoveryAttempt, RecoveryExecutor};
use crate::store::{PipelineEvent, PipelineRepository, TelemetryRepository};

/// Launcher, stores and tunables handed to each [`PipelineInstance`].
///
/// Telemetry writes made through the helpers here never fail the caller;
/// problems are logged and dropped.
///
/// [`PipelineInstance`]: super::PipelineInstance
pub struct SupervisorContext {
    pub launcher: PipelineLauncher,
    pub pipelines: Arc<dyn PipelineRepository>,
    pub telemetry: Arc<dyn TelemetryRepository>,
    pub sampler: Arc<dyn UsageSource>,
    pub events: SupervisorEventBroadcaster,
    pub retry: RetryPolicy,
    pub preemptive_cooldown: Duration,
    pub metrics_window: usize,
}

impl SupervisorContext {
    pub fn new(
        launcher: PipelineLauncher,
        pipelines: Arc<dyn PipelineRepository>,
        telemetry: Arc<dyn TelemetryRepository>,
    ) -> Self {
        let defaults = SupervisorConfig::default();
        Self {
            launcher,
            pipelines,
            telemetry,
            sampler: Arc::new(UsageSampler::new()),
            events: SupervisorEventBroadcaster::new(),
            retry: defaults.retry,
            preemptive_cooldown: defaults.preemptive_cooldown,
            metrics_window: defaults.metrics_window,
        }
    }

    /// Production wiring: real backends at the configured binary paths.
    pub fn from_config(
        config: &SupervisorConfig,
        catalog: Arc<PlatformCatalog>,
        pipelines: Arc<dyn PipelineRepository>,
        telemetry: Arc<dyn TelemetryRepository>,
    ) -> Self {
        let launcher = PipelineLauncher::new(
            Backends::from_binaries(&config.binaries),
            catalog,
            config.capture_mode,
            config.timings,
            config.display_base,
        );
        Self::new(launcher, pipelines, telemetry)
            .with_retry(config.retry.clone())
            .with_preemptive_cooldown(config.preemptive_cooldown)
            .with_metrics_window(config.metrics_window)
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn UsageSource>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_preemptive_cooldown(mut self, cooldown: Duration) -> Self {
        self.preemptive_cooldown = cooldown;
        self
    }

    pub fn with_metrics_window(mut self, samples: usize) -> Self {
        self.metrics_window = samples;
        self
    }

    pub fn executor(&self) -> RecoveryExecutor {
        RecoveryExecutor::new(self.retry.clone(), *self.launcher.timings())
    }

    pub fn publish(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.publish(event);
    }

    pub(crate) async fn raise_alert(&self, alert: Alert) {
        if let Err(e) = self.telemetry.create_alert(&alert).await {
            warn!(
                pipeline_id = %alert.pipeline_id,
                alert_type = %alert.alert_type,
                error = %e,
                "Failed to store alert"
            );
        }
        self.publish(SupervisorEvent::AlertRaised { alert });
    }

    pub(crate) async fn log_event(&self, event: PipelineEvent) {
        if let Err(e) = self.telemetry.log_event(&event).await {
            warn!(
                pipeline_id = %event.pipeline_id,
                kind = %event.kind,
                error = %e,
                "Failed to log pipeline event"
            );
        }
    }

    pub(crate) async fn record_attempt(&self, attempt: &RecoveryAttempt) {
        if let Err(e) = self.telemetry.record_recovery_attempt(attempt).await {
            warn!(
                pipeline_id = %attempt.pipeline_id,
                attempt_id = %attempt.id,
                error = %e,
                "Failed to record recovery attempt"
            );
        }
    }

    pub(crate) async fn persist_status(&self, pipeline_id: &str, state: PipelineState) {
        if let Err(e) = self.pipelines.update_status(pipeline_id, state).await {
            warn!(%pipeline_id, %state, error = %e, "Failed to persist pipeline status");
        }
    }

    pub(crate) async fn persist_uptime(&self, pipeline_id: &str, secs: u64) {
        if let Err(e) = self.pipelines.add_uptime(pipeline_id, secs).await {
            warn!(%pipeline_id, secs, error = %e, "Failed to persist uptime");
        }
    }
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("launcher", &self.launcher)
            .field("retry", &self.retry)
            .field("preemptive_cooldown", &self.preemptive_cooldown)
            .field("metrics_window", &self.metrics_window)
            .finish_non_exhaustive()
    }
}
