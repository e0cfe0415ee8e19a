//! Composite pipeline health score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::MetricSample;

/// Below this score a live pipeline gets a preemptive recovery pass.
pub const PREEMPTIVE_RECOVERY_THRESHOLD: f64 = 50.0;

/// Health score and its components, each in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub health: f64,
    pub performance: f64,
    pub connection: f64,
    pub stability: f64,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_degraded(&self) -> bool {
        self.health < PREEMPTIVE_RECOVERY_THRESHOLD
    }
}

/// Weighted score: 40% performance, 40% connection, 20% stability.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthScorer;

impl HealthScorer {
    const PERFORMANCE_WEIGHT: f64 = 0.4;
    const CONNECTION_WEIGHT: f64 = 0.4;
    const STABILITY_WEIGHT: f64 = 0.2;

    pub fn score(&self, sample: &MetricSample, failure_count: u32) -> HealthReport {
        // NaN counts as the worst possible reading.
        let cpu = worst_if_nan(sample.cpu_percent);
        let memory = worst_if_nan(sample.memory_mb);

        let performance =
            clamp_score(100.0 - (cpu - 50.0).max(0.0) - ((memory - 500.0) / 10.0).max(0.0));
        let connection = clamp_score(100.0 - sample.frame_drops as f64 * 2.0);
        let stability = clamp_score(100.0 - f64::from(failure_count) * 10.0);

        let health = clamp_score(
            Self::PERFORMANCE_WEIGHT * performance
                + Self::CONNECTION_WEIGHT * connection
                + Self::STABILITY_WEIGHT * stability,
        );

        HealthReport {
            health,
            performance,
            connection,
            stability,
            timestamp: Utc::now(),
        }
    }
}

fn worst_if_nan(value: f64) -> f64 {
    if value.is_nan() { f64::INFINITY } else { value }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, memory: f64, drops: u64) -> MetricSample {
        MetricSample {
            fps: 30.0,
            bitrate_kbps: 2500.0,
            frame_drops: drops,
            cpu_percent: cpu,
            memory_mb: memory,
            bandwidth_mbps: 2.5,
            elapsed_secs: 60,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_perfect_health() {
        let report = HealthScorer.score(&sample(20.0, 200.0, 0), 0);
        assert_eq!(report.performance, 100.0);
        assert_eq!(report.connection, 100.0);
        assert_eq!(report.stability, 100.0);
        assert_eq!(report.health, 100.0);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_weighted_components() {
        // performance = 100 - 20 - 10 = 70, connection = 100 - 20 = 80, stability = 80
        let report = HealthScorer.score(&sample(70.0, 600.0, 10), 2);
        assert_eq!(report.performance, 70.0);
        assert_eq!(report.connection, 80.0);
        assert_eq!(report.stability, 80.0);
        assert!((report.health - 76.0).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_below_threshold() {
        let report = HealthScorer.score(&sample(100.0, 1000.0, 40), 5);
        // performance 0, connection 20, stability 50
        assert!((report.health - 18.0).abs() < 1e-9);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_clamped_for_extreme_inputs() {
        let inputs = [
            sample(f64::NAN, f64::NAN, u64::MAX),
            sample(f64::INFINITY, 1e12, 0),
            sample(f64::NEG_INFINITY, f64::NEG_INFINITY, 0),
            sample(-50.0, -1000.0, 0),
            sample(1e308, 1e308, u64::MAX / 2),
        ];
        for s in &inputs {
            for failures in [0, 3, u32::MAX] {
                let report = HealthScorer.score(s, failures);
                let parts = [
                    report.health,
                    report.performance,
                    report.connection,
                    report.stability,
                ];
                for value in parts {
                    assert!((0.0..=100.0).contains(&value), "{value} out of range for {s:?}");
                }
            }
        }
        let worst = HealthScorer.score(&inputs[0], u32::MAX);
        assert_eq!(worst.health, 0.0);
    }
}
