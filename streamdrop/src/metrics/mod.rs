//! Metrics, health scoring and performance alerts.

mod alert;
mod health;
mod sample;

pub use alert::{
    Alert, AlertSeverity, CPU_ALERT_PERCENT, FRAME_DROP_ALERT, MEMORY_ALERT_MB, performance_alerts,
};
pub use health::{HealthReport, HealthScorer, PREEMPTIVE_RECOVERY_THRESHOLD};
pub use sample::{MetricSample, MetricsWindow};
