//! Alerts raised for a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::MetricSample;

/// Severity of an alert.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// An alert record. The core only writes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub pipeline_id: String,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default)]
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        pipeline_id: impl Into<String>,
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            acknowledged: false,
            created_at: Utc::now(),
        }
    }
}

pub const CPU_ALERT_PERCENT: f64 = 80.0;
pub const MEMORY_ALERT_MB: f64 = 1000.0;
pub const FRAME_DROP_ALERT: u64 = 100;

/// Warning alerts for a sample that crosses the performance thresholds.
pub fn performance_alerts(pipeline_id: &str, sample: &MetricSample) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if sample.cpu_percent > CPU_ALERT_PERCENT {
        alerts.push(Alert::new(
            pipeline_id,
            "high_cpu",
            AlertSeverity::Warning,
            format!("High CPU usage: {:.1}%", sample.cpu_percent),
        ));
    }

    if sample.memory_mb > MEMORY_ALERT_MB {
        alerts.push(Alert::new(
            pipeline_id,
            "high_memory",
            AlertSeverity::Warning,
            format!("High memory usage: {:.0}MB", sample.memory_mb),
        ));
    }

    if sample.frame_drops > FRAME_DROP_ALERT {
        alerts.push(Alert::new(
            pipeline_id,
            "frame_drops",
            AlertSeverity::Warning,
            format!("Frame drops detected: {} frames", sample.frame_drops),
        ));
    }

    alerts
}
