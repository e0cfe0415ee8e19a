//! One supervised pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::context::SupervisorContext;
use super::events::SupervisorEvent;
use super::status::{RecoveryGuard, StatusCell};
use crate::config::CaptureMode;
use crate::domain::{PipelineConfig, PipelineConfigPatch, PipelineState, QualityTier};
use crate::metrics::{
    Alert, AlertSeverity, HealthReport, HealthScorer, MetricSample, MetricsWindow,
    performance_alerts,
};
use crate::process::{ChildProcessSet, LaunchPlan, LaunchedPipeline, ProcessRole};
use crate::recovery::{
    FailureClassifier, FailureTag, RecoveryAttempt, RecoveryHistory, RecoveryPlanner,
    RecoveryTarget, Symptoms, join_tags,
};
use crate::store::{PipelineEvent, PipelineEventKind};
use crate::{Error, Result};

struct ActiveRun {
    processes: ChildProcessSet,
    plan: LaunchPlan,
}

/// State machine of one pipeline: its processes, metrics, health and
/// recovery bookkeeping.
///
/// Not internally synchronized; the registry keeps each instance behind its
/// own mutex. The [`StatusCell`] mirrors what readers need without that lock.
pub struct PipelineInstance {
    config: PipelineConfig,
    ctx: Arc<SupervisorContext>,
    status: Arc<StatusCell>,
    state: PipelineState,
    run: Option<ActiveRun>,
    /// Start of the current live period. Survives full restarts.
    live_since: Option<Instant>,
    total_uptime_secs: u64,
    metrics: MetricsWindow,
    health: Option<HealthReport>,
    failure_count: u32,
    active_attempt: Option<RecoveryAttempt>,
    history: RecoveryHistory,
    last_preemptive: Option<Instant>,
}

impl PipelineInstance {
    pub fn new(config: PipelineConfig, ctx: Arc<SupervisorContext>) -> Self {
        let status = StatusCell::new(&config.id, &config.name, config.quality);
        let metrics = MetricsWindow::new(ctx.metrics_window);
        Self {
            config,
            ctx,
            status,
            state: PipelineState::Stopped,
            run: None,
            live_since: None,
            total_uptime_secs: 0,
            metrics,
            health: None,
            failure_count: 0,
            active_attempt: None,
            history: RecoveryHistory::default(),
            last_preemptive: None,
        }
    }

    /// Seed the cumulative uptime with what the store already knows.
    pub fn with_total_uptime(mut self, secs: u64) -> Self {
        self.total_uptime_secs = secs;
        self.status.set_total_uptime(secs);
        self
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn status_cell(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn health(&self) -> Option<&HealthReport> {
        self.health.as_ref()
    }

    pub fn metrics(&self) -> &MetricsWindow {
        &self.metrics
    }

    pub fn history(&self) -> &RecoveryHistory {
        &self.history
    }

    pub fn active_attempt(&self) -> Option<&RecoveryAttempt> {
        self.active_attempt.as_ref()
    }

    /// Length of the current live period.
    pub fn uptime(&self) -> Duration {
        self.live_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn pid(&self, role: ProcessRole) -> Option<u32> {
        self.run.as_ref().and_then(|run| run.processes.pid(role))
    }

    /// Swap in a new configuration. Only allowed while no run is active.
    pub fn replace_config(&mut self, config: PipelineConfig) -> Result<()> {
        if self.state.is_active() {
            return Err(Error::validation(format!(
                "cannot change the configuration of pipeline {} while it is {}",
                self.config.id, self.state
            )));
        }
        self.status.set_name(&config.name);
        self.status.set_quality(config.quality);
        self.config = config;
        Ok(())
    }

    fn set_state(&mut self, next: PipelineState) -> Result<()> {
        let old_state = self.state;
        self.state = old_state.transition_to(next)?;
        self.status.set_state(next);
        if old_state != next {
            debug!(pipeline_id = %self.config.id, %old_state, new_state = %next, "State changed");
            self.ctx.publish(SupervisorEvent::StateChanged {
                pipeline_id: self.config.id.clone(),
                old_state,
                new_state: next,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Launch the display, renderer and encoder and go live.
    ///
    /// On failure everything already spawned is torn down and the pipeline
    /// is back to `stopped`.
    pub async fn start(&mut self) -> Result<String> {
        self.set_state(PipelineState::Starting)?;
        info!(pipeline_id = %self.config.id, name = %self.config.name, "Starting pipeline");

        match self.ctx.launcher.launch(&self.config).await {
            Ok(launched) => {
                let outputs = launched.plan.outputs.len();
                let resolution = launched.plan.preset.resolution();
                self.metrics.clear();
                self.health = None;
                self.status.set_health(None);
                self.live_since = Some(Instant::now());
                self.status.set_live_since(self.live_since);
                self.install(launched);
                self.set_state(PipelineState::Live)?;

                self.ctx.persist_status(&self.config.id, PipelineState::Live).await;
                self.ctx
                    .log_event(PipelineEvent::new(
                        &self.config.id,
                        PipelineEventKind::PipelineStarted,
                        json!({
                            "quality": self.config.quality,
                            "resolution": resolution,
                            "outputs": outputs,
                        }),
                    ))
                    .await;
                info!(pipeline_id = %self.config.id, outputs, "Pipeline started");
                Ok("Pipeline started successfully".to_string())
            }
            Err(e) => {
                error!(pipeline_id = %self.config.id, error = %e, "Failed to start pipeline");
                self.set_state(PipelineState::Stopped)?;
                self.ctx.persist_status(&self.config.id, PipelineState::Stopped).await;
                Err(e)
            }
        }
    }

    /// Release every process and go to `stopped`. Safe to call repeatedly.
    pub async fn stop(&mut self) -> Result<String> {
        if self.state == PipelineState::Stopped && self.run.is_none() {
            return Ok("Pipeline already stopped".to_string());
        }
        let old_state = self.state;
        let uptime_secs = self.end_run().await;
        self.set_state(PipelineState::Stopped)?;

        self.ctx.persist_status(&self.config.id, PipelineState::Stopped).await;
        self.ctx
            .log_event(PipelineEvent::new(
                &self.config.id,
                PipelineEventKind::PipelineStopped,
                json!({ "uptime_secs": uptime_secs, "previous_state": old_state }),
            ))
            .await;
        info!(pipeline_id = %self.config.id, uptime_secs, "Pipeline stopped");
        Ok("Pipeline stopped successfully".to_string())
    }

    fn install(&mut self, launched: LaunchedPipeline) {
        let LaunchedPipeline { processes, plan } = launched;
        self.run = Some(ActiveRun { processes, plan });
        if self.live_since.is_none() {
            self.live_since = Some(Instant::now());
            self.status.set_live_since(self.live_since);
        }
        self.refresh_processes();
    }

    /// Stop the processes of the current run, if any.
    async fn release(&mut self) {
        if let Some(mut run) = self.run.take() {
            run.processes
                .stop_all(self.ctx.launcher.timings().terminate_grace)
                .await;
        }
        self.status.set_processes(Vec::new());
    }

    /// Release the run and account its uptime. Returns the uptime in seconds.
    async fn end_run(&mut self) -> u64 {
        self.release().await;
        let Some(since) = self.live_since.take() else {
            return 0;
        };
        self.status.set_live_since(None);

        let secs = since.elapsed().as_secs();
        self.total_uptime_secs = self.total_uptime_secs.saturating_add(secs);
        self.status.set_total_uptime(self.total_uptime_secs);
        if secs > 0 {
            self.ctx.persist_uptime(&self.config.id, secs).await;
        }
        secs
    }

    fn refresh_processes(&mut self) {
        let statuses = self
            .run
            .as_mut()
            .map(|run| run.processes.statuses())
            .unwrap_or_default();
        self.status.set_processes(statuses);
    }

    fn expected_roles(&self) -> Vec<ProcessRole> {
        let headless = match &self.run {
            Some(run) => run.plan.display.is_none(),
            None => self.ctx.launcher.capture_mode() == CaptureMode::Headless,
        };
        ProcessRole::ALL
            .into_iter()
            .filter(|role| !(headless && *role == ProcessRole::Display))
            .collect()
    }

    /// Roles whose process exited or is not running at all, in role order.
    pub fn dead_processes(&mut self) -> Vec<ProcessRole> {
        let expected = self.expected_roles();
        let Some(run) = self.run.as_mut() else {
            return expected;
        };
        let dead: Vec<ProcessRole> = expected
            .into_iter()
            .filter(|role| !run.processes.is_alive(*role))
            .collect();
        self.refresh_processes();
        dead
    }

    /// Sample fps, bitrate, drops, CPU and memory. `None` unless live.
    pub fn collect_metrics(&mut self) -> Option<MetricSample> {
        if self.state != PipelineState::Live {
            return None;
        }
        let run = self.run.as_ref()?;
        let usage = self.ctx.sampler.sample(&run.processes.pids());
        let sample = MetricSample::observe(
            &run.plan.preset,
            run.processes.encoder_stats().latest(),
            usage,
            run.plan.outputs.len(),
            self.uptime(),
        );
        self.metrics.push(sample.clone());
        Some(sample)
    }

    /// Score the latest sample. `None` unless live with at least one sample.
    pub fn compute_health(&mut self) -> Option<HealthReport> {
        if self.state != PipelineState::Live {
            return None;
        }
        let report = HealthScorer.score(self.metrics.latest()?, self.failure_count);
        self.health = Some(report.clone());
        self.status.set_health(Some(report.health));
        Some(report)
    }

    /// Classify the current symptoms. Takes a fresh metric sample first.
    pub fn detect_failure_type(&mut self) -> Vec<FailureTag> {
        self.collect_metrics();
        self.classify()
    }

    fn classify(&mut self) -> Vec<FailureTag> {
        let dead = self.dead_processes();
        FailureClassifier.classify(&Symptoms {
            dead: &dead,
            sample: self.metrics.latest(),
            health: self.health.as_ref().map(|h| h.health),
        })
    }

    /// Run one recovery pass for `tags`.
    ///
    /// Rejected with [`Error::RecoveryRejected`] while another pass runs and
    /// with [`Error::Validation`] unless the pipeline is live. When the pass
    /// fails and processes are down the pipeline moves to `error`.
    pub async fn attempt_recovery(&mut self, tags: Vec<FailureTag>) -> Result<String> {
        let guard = self
            .status
            .try_begin_recovery()
            .ok_or_else(|| Error::RecoveryRejected(self.config.id.clone()))?;
        self.recover_or_fail(guard, tags, false).await
    }

    /// Manual recovery with a flag the caller already claimed.
    pub(crate) async fn manual_recover(&mut self, guard: RecoveryGuard) -> Result<String> {
        self.recover_or_fail(guard, vec![FailureTag::ManualRecovery], false)
            .await
    }

    /// Only live pipelines are recovered; anything else would bring
    /// processes up behind the state machine.
    async fn recover_or_fail(
        &mut self,
        guard: RecoveryGuard,
        tags: Vec<FailureTag>,
        preemptive: bool,
    ) -> Result<String> {
        if self.state != PipelineState::Live {
            return Err(Error::validation(format!(
                "pipeline {} is {}, only live pipelines can be recovered",
                self.config.id, self.state
            )));
        }
        let result = self.run_recovery(&guard, tags, preemptive).await;
        if result.is_err() && self.state == PipelineState::Live {
            let dead = self.dead_processes();
            if !dead.is_empty() {
                self.fail(&dead).await;
            }
        }
        drop(guard);
        result
    }

    async fn run_recovery(
        &mut self,
        guard: &RecoveryGuard,
        tags: Vec<FailureTag>,
        preemptive: bool,
    ) -> Result<String> {
        debug_assert_eq!(guard.pipeline_id(), self.config.id);

        let tags = if tags.is_empty() {
            vec![FailureTag::UnknownFailure]
        } else {
            tags
        };
        let primary = RecoveryPlanner::primary(&tags);
        let strategy = RecoveryPlanner.plan(&tags, &self.history, self.config.quality);
        let failure_types = join_tags(&tags);

        let mut attempt = RecoveryAttempt::begin(&self.config.id, &tags, strategy);
        self.ctx.record_attempt(&attempt).await;
        self.active_attempt = Some(attempt.clone());
        self.ctx.publish(SupervisorEvent::RecoveryStarted {
            pipeline_id: self.config.id.clone(),
            failure_types: tags.clone(),
            strategy,
            preemptive,
            timestamp: Utc::now(),
        });
        info!(
            pipeline_id = %self.config.id,
            %strategy,
            %failure_types,
            preemptive,
            "Starting recovery"
        );

        let report = self.ctx.executor().execute(&mut *self, strategy).await;

        attempt.resolve(
            report.success,
            report.retries,
            report.duration,
            report.error.as_ref().map(ToString::to_string),
        );
        self.ctx.record_attempt(&attempt).await;
        self.active_attempt = None;
        self.history.push(attempt);
        self.refresh_processes();

        let duration_secs = report.duration.as_secs_f64();
        self.ctx.publish(SupervisorEvent::RecoveryFinished {
            pipeline_id: self.config.id.clone(),
            strategy,
            success: report.success,
            retries: report.retries,
            duration_secs,
            timestamp: Utc::now(),
        });

        match report.error {
            None => {
                self.failure_count = self.failure_count.saturating_sub(1);
                self.status.set_failure_count(self.failure_count);
                self.ctx
                    .log_event(PipelineEvent::new(
                        &self.config.id,
                        PipelineEventKind::RecoverySuccess,
                        json!({
                            "strategy": strategy,
                            "duration": duration_secs,
                            "retries": report.retries,
                            "failure_types": tags,
                        }),
                    ))
                    .await;
                info!(
                    pipeline_id = %self.config.id,
                    %strategy,
                    duration_secs,
                    "Recovery successful"
                );
                Ok(format!("Recovery successful using {strategy}"))
            }
            Some(e) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.status.set_failure_count(self.failure_count);
                self.ctx
                    .raise_alert(Alert::new(
                        &self.config.id,
                        "recovery_failed",
                        AlertSeverity::Critical,
                        format!("Failed to recover from {primary} using {strategy}"),
                    ))
                    .await;
                self.ctx
                    .log_event(PipelineEvent::new(
                        &self.config.id,
                        PipelineEventKind::RecoveryFailed,
                        json!({
                            "strategy": strategy,
                            "duration": duration_secs,
                            "retries": report.retries,
                            "failure_types": tags,
                            "error": e.to_string(),
                        }),
                    ))
                    .await;
                error!(pipeline_id = %self.config.id, %strategy, error = %e, "Recovery failed");
                Err(Error::RecoveryFailure {
                    strategy: strategy.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Give up on the run: release everything and park in `error`.
    async fn fail(&mut self, dead: &[ProcessRole]) {
        self.end_run().await;
        if let Err(e) = self.set_state(PipelineState::Error) {
            warn!(pipeline_id = %self.config.id, error = %e, "Could not enter error state");
            return;
        }
        self.ctx.persist_status(&self.config.id, PipelineState::Error).await;
        self.ctx
            .log_event(PipelineEvent::new(
                &self.config.id,
                PipelineEventKind::RecoveryFailed,
                json!({
                    "reason": "auto_recovery_failed",
                    "dead_processes": dead,
                }),
            ))
            .await;
        error!(
            pipeline_id = %self.config.id,
            dead_processes = ?dead,
            "Pipeline moved to error state"
        );
    }

    /// Liveness check from the monitor loop.
    ///
    /// Dead processes trigger a recovery pass; if that fails the pipeline
    /// ends up in `error`.
    pub async fn check_processes(&mut self) {
        if self.state != PipelineState::Live || self.status.is_recovering() {
            return;
        }
        let dead = self.dead_processes();
        if dead.is_empty() {
            return;
        }
        let roles: Vec<String> = dead.iter().map(ToString::to_string).collect();
        let death = Error::ProcessDeath(roles.join(", "));
        warn!(pipeline_id = %self.config.id, error = %death, "Pipeline processes died");

        let Some(guard) = self.status.try_begin_recovery() else {
            return;
        };
        let tags = self.detect_failure_type();
        if let Err(e) = self.recover_or_fail(guard, tags, false).await {
            debug!(pipeline_id = %self.config.id, error = %e, "Automatic recovery failed");
        }
    }

    /// Metrics pass from the monitor loop: sample, score, persist, alert and
    /// recover preemptively when health is degraded.
    pub async fn observe(&mut self) {
        if self.state != PipelineState::Live || self.status.is_recovering() {
            return;
        }
        let Some(sample) = self.collect_metrics() else {
            return;
        };
        if let Err(e) = self.ctx.telemetry.record_metrics(&self.config.id, &sample).await {
            warn!(pipeline_id = %self.config.id, error = %e, "Failed to store metrics");
        }

        let Some(report) = self.compute_health() else {
            return;
        };
        if let Err(e) = self.ctx.telemetry.record_health(&self.config.id, &report).await {
            warn!(pipeline_id = %self.config.id, error = %e, "Failed to store health");
        }

        debug!(
            pipeline_id = %self.config.id,
            health = report.health,
            average_fps = self.metrics.average_fps().unwrap_or_default(),
            "Pipeline observed"
        );

        for alert in performance_alerts(&self.config.id, &sample) {
            warn!(
                pipeline_id = %self.config.id,
                alert_type = %alert.alert_type,
                message = %alert.message,
                "Performance alert"
            );
            self.ctx.raise_alert(alert).await;
        }

        if report.is_degraded() {
            self.preempt(report.health).await;
        }
    }

    fn resource_pressure(&self, tags: &[FailureTag]) -> Option<Error> {
        let exhausted = tags
            .iter()
            .any(|t| matches!(t, FailureTag::HighCpu | FailureTag::MemoryExhaustion));
        let sample = self.metrics.latest().filter(|_| exhausted)?;
        Some(Error::ResourceExhaustion(format!(
            "cpu {:.1}%, memory {:.0} MB",
            sample.cpu_percent, sample.memory_mb
        )))
    }

    async fn preempt(&mut self, health: f64) {
        let cooldown = self.ctx.preemptive_cooldown;
        if let Some(last) = self.last_preemptive
            && last.elapsed() < cooldown
        {
            debug!(pipeline_id = %self.config.id, health, "Preemptive recovery on cooldown");
            return;
        }

        let tags = self.classify();
        if let Some(pressure) = self.resource_pressure(&tags) {
            warn!(pipeline_id = %self.config.id, error = %pressure, "Resource threshold breached");
        }
        if tags == [FailureTag::UnknownFailure] {
            debug!(pipeline_id = %self.config.id, health, "Health degraded without a known cause");
            return;
        }
        let Some(guard) = self.status.try_begin_recovery() else {
            return;
        };

        self.last_preemptive = Some(Instant::now());
        info!(
            pipeline_id = %self.config.id,
            health,
            failure_types = %join_tags(&tags),
            "Health degraded, recovering preemptively"
        );
        match self.recover_or_fail(guard, tags, true).await {
            Ok(message) => {
                self.ctx
                    .raise_alert(Alert::new(
                        &self.config.id,
                        "preemptive_recovery",
                        AlertSeverity::Info,
                        format!("Preemptive recovery successful: {message}"),
                    ))
                    .await;
            }
            Err(e) => {
                warn!(pipeline_id = %self.config.id, error = %e, "Preemptive recovery failed");
            }
        }
    }
}

#[async_trait]
impl RecoveryTarget for PipelineInstance {
    fn pipeline_id(&self) -> &str {
        &self.config.id
    }

    async fn restart_process(
        &mut self,
        role: ProcessRole,
        grace: Duration,
        pause: Duration,
    ) -> Result<()> {
        let Some(run) = self.run.as_mut() else {
            debug!(pipeline_id = %self.config.id, %role, "No active run, restarting everything");
            return self.full_restart(pause).await;
        };

        info!(pipeline_id = %self.config.id, %role, "Restarting process");
        if let Some(outcome) = run.processes.stop(role, grace).await {
            debug!(pipeline_id = %self.config.id, %role, ?outcome, "Process terminated");
        }
        tokio::time::sleep(pause).await;

        let result = self
            .ctx
            .launcher
            .launch_role(role, &self.config, &run.plan, &mut run.processes)
            .await;
        self.refresh_processes();
        result.map(|pid| {
            info!(pipeline_id = %self.config.id, %role, pid, "Process restarted");
        })
    }

    async fn full_restart(&mut self, settle: Duration) -> Result<()> {
        info!(pipeline_id = %self.config.id, "Restarting all processes");
        self.release().await;
        tokio::time::sleep(settle).await;
        let launched = self.ctx.launcher.launch(&self.config).await?;
        self.install(launched);
        Ok(())
    }

    async fn lower_quality(&mut self) -> Result<QualityTier> {
        let current = self.config.quality;
        let next = current.downgrade().ok_or(Error::QualityFloor)?;
        let patch = PipelineConfigPatch::quality(next);

        self.config.apply(patch.clone());
        self.status.set_quality(next);
        if let Err(e) = self.ctx.pipelines.update(&self.config.id, &patch).await {
            warn!(
                pipeline_id = %self.config.id,
                quality = %next,
                error = %e,
                "Failed to persist reduced quality"
            );
        }
        info!(pipeline_id = %self.config.id, from = %current, to = %next, "Lowering quality");
        Ok(next)
    }
}

impl std::fmt::Debug for PipelineInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInstance")
            .field("id", &self.config.id)
            .field("state", &self.state)
            .field("quality", &self.config.quality)
            .field("failure_count", &self.failure_count)
            .field("recovering", &self.status.is_recovering())
            .finish_non_exhaustive()
    }
}
