//! Row types of the SQLite schema and their domain conversions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{PipelineEvent, PipelineEventKind, StoredPipeline};
use crate::domain::{PipelineConfig, PipelineState};
use crate::metrics::{Alert, MetricSample};
use crate::platforms::PlatformInfo;
use crate::recovery::{FailureTag, RecoveryAttempt};
use crate::{Error, Result};

/// Row of `pipelines`. Audio settings and targets are JSON columns.
#[derive(Debug, Clone, FromRow)]
pub(super) struct PipelineDbModel {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub source: String,
    pub platform: String,
    pub stream_key: String,
    pub rtmp_url: Option<String>,
    pub quality: String,
    pub orientation: String,
    pub audio: String,
    pub output_targets: String,
    pub status: String,
    pub total_uptime_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineDbModel {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            name: config.name.clone(),
            content_type: config.content_type.to_string(),
            source: config.source.clone(),
            platform: config.platform.clone(),
            stream_key: config.stream_key.clone(),
            rtmp_url: config.rtmp_url.clone(),
            quality: config.quality.to_string(),
            orientation: config.orientation.to_string(),
            audio: serde_json::to_string(&config.audio)?,
            output_targets: serde_json::to_string(&config.output_targets)?,
            status: PipelineState::Stopped.as_str().to_string(),
            total_uptime_secs: 0,
            created_at: config.created_at,
            updated_at: config.updated_at,
        })
    }

    pub fn into_config(self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            content_type: parse_column("content_type", &self.content_type)?,
            quality: parse_column("quality", &self.quality)?,
            orientation: parse_column("orientation", &self.orientation)?,
            audio: serde_json::from_str(&self.audio)?,
            output_targets: serde_json::from_str(&self.output_targets)?,
            id: self.id,
            name: self.name,
            source: self.source,
            platform: self.platform,
            stream_key: self.stream_key,
            rtmp_url: self.rtmp_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn into_stored(self) -> Result<StoredPipeline> {
        let status = PipelineState::parse(&self.status).ok_or_else(|| {
            Error::Other(format!("invalid pipeline status in database: {}", self.status))
        })?;
        let total_uptime_secs = self.total_uptime_secs.max(0) as u64;
        Ok(StoredPipeline {
            config: self.into_config()?,
            status,
            total_uptime_secs,
        })
    }
}

fn parse_column<T: std::str::FromStr>(column: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Other(format!("invalid {column} in database: {value}")))
}

#[derive(Debug, Clone, FromRow)]
pub(super) struct MetricDbModel {
    pub fps: f64,
    pub bitrate_kbps: f64,
    pub frame_drops: i64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub bandwidth_mbps: f64,
    pub elapsed_secs: i64,
    pub timestamp: DateTime<Utc>,
}

impl From<MetricDbModel> for MetricSample {
    fn from(row: MetricDbModel) -> Self {
        Self {
            fps: row.fps,
            bitrate_kbps: row.bitrate_kbps,
            frame_drops: row.frame_drops.max(0) as u64,
            cpu_percent: row.cpu_percent,
            memory_mb: row.memory_mb,
            bandwidth_mbps: row.bandwidth_mbps,
            elapsed_secs: row.elapsed_secs.max(0) as u64,
            timestamp: row.timestamp,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(super) struct AlertDbModel {
    pub pipeline_id: String,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AlertDbModel> for Alert {
    type Error = Error;

    fn try_from(row: AlertDbModel) -> Result<Self> {
        Ok(Self {
            severity: parse_column("severity", &row.severity)?,
            pipeline_id: row.pipeline_id,
            alert_type: row.alert_type,
            message: row.message,
            acknowledged: row.acknowledged,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(super) struct RecoveryDbModel {
    pub id: String,
    pub pipeline_id: String,
    pub failure_type: String,
    pub strategy: String,
    pub retry_count: i64,
    pub success: Option<bool>,
    pub duration_secs: Option<f64>,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecoveryDbModel> for RecoveryAttempt {
    type Error = Error;

    fn try_from(row: RecoveryDbModel) -> Result<Self> {
        let Ok(failure_type) = row.failure_type.parse::<FailureTag>();
        Ok(Self {
            id: row.id,
            pipeline_id: row.pipeline_id,
            failure_type,
            strategy: parse_column("strategy", &row.strategy)?,
            retry_count: u32::try_from(row.retry_count.max(0)).unwrap_or(u32::MAX),
            success: row.success,
            duration_secs: row.duration_secs,
            reason: row.reason,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(super) struct EventDbModel {
    pub pipeline_id: String,
    pub event_type: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventDbModel> for PipelineEvent {
    type Error = Error;

    fn try_from(row: EventDbModel) -> Result<Self> {
        Ok(Self {
            kind: parse_column::<PipelineEventKind>("event_type", &row.event_type)?,
            data: serde_json::from_str(&row.data)?,
            pipeline_id: row.pipeline_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(super) struct PlatformDbModel {
    pub name: String,
    pub rtmp_url: String,
    pub max_bitrate_kbps: i64,
    pub vertical: bool,
    pub enabled: bool,
}

impl From<PlatformDbModel> for PlatformInfo {
    fn from(row: PlatformDbModel) -> Self {
        Self {
            name: row.name,
            rtmp_url: row.rtmp_url,
            max_bitrate_kbps: u32::try_from(row.max_bitrate_kbps.max(0)).unwrap_or(u32::MAX),
            vertical: row.vertical,
            enabled: row.enabled,
        }
    }
}
