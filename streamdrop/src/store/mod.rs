//! Persistence for pipeline configuration and telemetry.
//!
//! Two repository traits sit at the seam between the supervisor and storage:
//! [`PipelineRepository`] holds the configuration of every pipeline and
//! [`TelemetryRepository`] receives everything the supervisor observes.
//! [`SqliteStore`] backs both with `sqlx`; [`MemoryStore`] keeps them in
//! process for tests and embedding.

mod memory;
mod models;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::domain::{PipelineConfig, PipelineConfigPatch, PipelineState};
use crate::metrics::{Alert, HealthReport, MetricSample};
use crate::platforms::PlatformInfo;
use crate::recovery::RecoveryAttempt;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, init_pool, init_pool_with_size, run_migrations};

/// A pipeline as the config store knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPipeline {
    pub config: PipelineConfig,
    /// Last status written by the supervisor.
    pub status: PipelineState,
    /// Uptime summed over every finished run.
    pub total_uptime_secs: u64,
}

/// Kind of entry in the pipeline event log.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineEventKind {
    PipelineStarted,
    PipelineStopped,
    RecoverySuccess,
    RecoveryFailed,
}

/// One entry of the pipeline event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub pipeline_id: String,
    pub kind: PipelineEventKind,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        pipeline_id: impl Into<String>,
        kind: PipelineEventKind,
        data: serde_json::Value,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            kind,
            data,
            created_at: Utc::now(),
        }
    }
}

/// Aggregate over the recovery attempts of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Resolved attempts.
    pub total: u64,
    pub successful: u64,
    pub mean_duration_secs: f64,
    pub mean_retries: f64,
}

impl RecoveryStats {
    /// Fold resolved attempts into stats. Unresolved attempts are ignored.
    pub fn from_attempts<'a>(attempts: impl IntoIterator<Item = &'a RecoveryAttempt>) -> Self {
        let mut stats = Self::default();
        let mut duration = 0.0;
        let mut retries = 0u64;
        for attempt in attempts.into_iter().filter(|a| a.is_resolved()) {
            stats.total += 1;
            if attempt.success == Some(true) {
                stats.successful += 1;
            }
            duration += attempt.duration_secs.unwrap_or_default();
            retries += u64::from(attempt.retry_count);
        }
        if stats.total > 0 {
            stats.mean_duration_secs = duration / stats.total as f64;
            stats.mean_retries = retries as f64 / stats.total as f64;
        }
        stats
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Config store.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<PipelineConfig>;
    async fn get_stored(&self, id: &str) -> Result<StoredPipeline>;
    async fn create(&self, config: &PipelineConfig) -> Result<()>;
    /// Apply a patch and return the updated configuration.
    async fn update(&self, id: &str, patch: &PipelineConfigPatch) -> Result<PipelineConfig>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Every pipeline, oldest first.
    async fn list(&self) -> Result<Vec<StoredPipeline>>;
    async fn update_status(&self, id: &str, status: PipelineState) -> Result<()>;
    /// Add the uptime of a finished run to the pipeline's total.
    async fn add_uptime(&self, id: &str, secs: u64) -> Result<()>;
    /// Platform catalog entries, enabled or not.
    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>>;
}

/// Telemetry sink plus the read helpers a controlling layer needs.
#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    async fn record_metrics(&self, pipeline_id: &str, sample: &MetricSample) -> Result<()>;
    async fn record_health(&self, pipeline_id: &str, report: &HealthReport) -> Result<()>;
    async fn create_alert(&self, alert: &Alert) -> Result<()>;
    /// Insert the attempt, or overwrite the stored copy with the same id.
    async fn record_recovery_attempt(&self, attempt: &RecoveryAttempt) -> Result<()>;
    async fn log_event(&self, event: &PipelineEvent) -> Result<()>;

    /// Newest first.
    async fn recent_metrics(&self, pipeline_id: &str, limit: usize) -> Result<Vec<MetricSample>>;
    /// Unacknowledged alerts, newest first, optionally for one pipeline.
    async fn unacked_alerts(&self, pipeline_id: Option<&str>) -> Result<Vec<Alert>>;
    /// Mark every alert of a pipeline acknowledged. Returns how many changed.
    async fn acknowledge_alerts(&self, pipeline_id: &str) -> Result<u64>;
    /// Oldest first.
    async fn recovery_attempts(&self, pipeline_id: &str) -> Result<Vec<RecoveryAttempt>>;
    async fn recovery_stats(&self, pipeline_id: &str) -> Result<RecoveryStats>;
    /// Newest first.
    async fn events(&self, pipeline_id: &str, limit: usize) -> Result<Vec<PipelineEvent>>;
}
