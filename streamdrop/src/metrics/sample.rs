//! Metric samples and the per-instance sample window.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::QualityPreset;
use crate::process::{EncoderProgress, ResourceUsage};

/// One observation of a live pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub fps: f64,
    pub bitrate_kbps: f64,
    pub frame_drops: u64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    /// Upstream bandwidth over every output, in Mbps.
    pub bandwidth_mbps: f64,
    /// Time since the run started.
    pub elapsed_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Combine encoder progress and process usage into a sample.
    ///
    /// Before the encoder reports progress the preset's nominal fps and
    /// bitrate stand in, with zero drops.
    pub fn observe(
        preset: &QualityPreset,
        progress: Option<EncoderProgress>,
        usage: ResourceUsage,
        outputs: usize,
        elapsed: Duration,
    ) -> Self {
        let nominal_bitrate = f64::from(preset.bitrate_kbps);
        let (fps, bitrate_kbps, frame_drops) = match progress {
            Some(p) => (p.fps, p.bitrate_kbps.unwrap_or(nominal_bitrate), p.drop_frames),
            None => (f64::from(preset.framerate), nominal_bitrate, 0),
        };

        Self {
            fps,
            bitrate_kbps,
            frame_drops,
            cpu_percent: usage.cpu_percent,
            memory_mb: usage.memory_mb,
            bandwidth_mbps: bitrate_kbps * outputs.max(1) as f64 / 1000.0,
            elapsed_secs: elapsed.as_secs(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of the most recent samples.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Mean fps over the window.
    pub fn average_fps(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|s| s.fps).sum::<f64>() / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityTier;

    fn sample(fps: f64) -> MetricSample {
        MetricSample {
            fps,
            bitrate_kbps: 2500.0,
            frame_drops: 0,
            cpu_percent: 10.0,
            memory_mb: 100.0,
            bandwidth_mbps: 2.5,
            elapsed_secs: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_nominal_values_before_progress() {
        let preset = QualityTier::Medium.preset(false);
        let s = MetricSample::observe(
            &preset,
            None,
            ResourceUsage::default(),
            2,
            Duration::from_secs(90),
        );
        assert_eq!(s.fps, 30.0);
        assert_eq!(s.bitrate_kbps, 2500.0);
        assert_eq!(s.frame_drops, 0);
        assert_eq!(s.bandwidth_mbps, 5.0);
        assert_eq!(s.elapsed_secs, 90);
    }

    #[test]
    fn test_progress_overrides_nominal() {
        let preset = QualityTier::Medium.preset(false);
        let progress = EncoderProgress {
            frame: 10,
            fps: 24.5,
            bitrate_kbps: Some(2000.0),
            drop_frames: 7,
            elapsed_secs: 1.0,
        };
        let usage = ResourceUsage {
            cpu_percent: 42.0,
            memory_mb: 300.0,
            sampled: 3,
        };
        let s = MetricSample::observe(&preset, Some(progress), usage, 1, Duration::ZERO);
        assert_eq!(s.fps, 24.5);
        assert_eq!(s.bitrate_kbps, 2000.0);
        assert_eq!(s.frame_drops, 7);
        assert_eq!(s.cpu_percent, 42.0);
        assert_eq!(s.memory_mb, 300.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = MetricsWindow::new(3);
        for fps in [1.0, 2.0, 3.0, 4.0] {
            window.push(sample(fps));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.latest().unwrap().fps, 4.0);
        assert_eq!(window.iter().next().unwrap().fps, 2.0);
        assert_eq!(window.average_fps(), Some(3.0));

        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.average_fps(), None);
    }
}
