//! Status snapshot readable without the instance lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::{PipelineState, QualityTier};
use crate::process::ProcessStatus;
use crate::store::StoredPipeline;

/// What `status` reports for a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub id: String,
    pub name: String,
    pub state: PipelineState,
    /// `"Xh Ym"`, or `"Ym"` under an hour.
    pub uptime: String,
    pub uptime_secs: u64,
    /// Uptime of every finished run plus the current one.
    pub total_uptime_secs: u64,
    pub health_score: Option<f64>,
    pub failure_count: u32,
    pub recovery_in_progress: bool,
    pub quality: QualityTier,
    pub processes: Vec<ProcessStatus>,
}

impl PipelineStatus {
    /// Status of a pipeline with no instance in the registry.
    pub fn idle(stored: &StoredPipeline) -> Self {
        Self {
            id: stored.config.id.clone(),
            name: stored.config.name.clone(),
            state: PipelineState::Stopped,
            uptime: format_uptime(0),
            uptime_secs: 0,
            total_uptime_secs: stored.total_uptime_secs,
            health_score: None,
            failure_count: 0,
            recovery_in_progress: false,
            quality: stored.config.quality,
            processes: Vec::new(),
        }
    }
}

/// Render seconds the way operators read uptime.
pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[derive(Debug)]
struct Fields {
    name: String,
    state: PipelineState,
    live_since: Option<Instant>,
    total_uptime_secs: u64,
    health_score: Option<f64>,
    failure_count: u32,
    quality: QualityTier,
    processes: Vec<ProcessStatus>,
}

/// Shared between a pipeline instance, the registry and the monitor.
///
/// The instance writes it while holding its own lock; readers never block on
/// that lock. The recovery flag lives here so it can be claimed before the
/// instance lock is taken.
#[derive(Debug)]
pub struct StatusCell {
    id: String,
    fields: RwLock<Fields>,
    recovering: AtomicBool,
}

impl StatusCell {
    pub fn new(id: impl Into<String>, name: impl Into<String>, quality: QualityTier) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            fields: RwLock::new(Fields {
                name: name.into(),
                state: PipelineState::Stopped,
                live_since: None,
                total_uptime_secs: 0,
                health_score: None,
                failure_count: 0,
                quality,
                processes: Vec::new(),
            }),
            recovering: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> PipelineState {
        self.fields.read().state
    }

    pub fn snapshot(&self) -> PipelineStatus {
        let fields = self.fields.read();
        let uptime_secs = fields
            .live_since
            .map(|since| since.elapsed().as_secs())
            .unwrap_or_default();
        PipelineStatus {
            id: self.id.clone(),
            name: fields.name.clone(),
            state: fields.state,
            uptime: format_uptime(uptime_secs),
            uptime_secs,
            total_uptime_secs: fields.total_uptime_secs + uptime_secs,
            health_score: fields.health_score,
            failure_count: fields.failure_count,
            recovery_in_progress: self.is_recovering(),
            quality: fields.quality,
            processes: fields.processes.clone(),
        }
    }

    pub fn set_state(&self, state: PipelineState) {
        self.fields.write().state = state;
    }

    /// Mark the start of a live run, or its end with `None`.
    pub fn set_live_since(&self, since: Option<Instant>) {
        self.fields.write().live_since = since;
    }

    pub fn set_total_uptime(&self, secs: u64) {
        self.fields.write().total_uptime_secs = secs;
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.fields.write().name = name.into();
    }

    pub fn set_health(&self, health: Option<f64>) {
        self.fields.write().health_score = health;
    }

    pub fn set_failure_count(&self, count: u32) {
        self.fields.write().failure_count = count;
    }

    pub fn set_quality(&self, quality: QualityTier) {
        self.fields.write().quality = quality;
    }

    pub fn set_processes(&self, processes: Vec<ProcessStatus>) {
        self.fields.write().processes = processes;
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    /// Claim the recovery flag. `None` when a pass is already running.
    pub fn try_begin_recovery(self: &Arc<Self>) -> Option<RecoveryGuard> {
        self.recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RecoveryGuard {
                cell: Arc::clone(self),
            })
    }
}

/// Holds the recovery flag of one pipeline; releases it on drop.
#[derive(Debug)]
pub struct RecoveryGuard {
    cell: Arc<StatusCell>,
}

impl RecoveryGuard {
    pub fn pipeline_id(&self) -> &str {
        self.cell.id()
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.cell.recovering.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0m");
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(61 * 60), "1h 1m");
        assert_eq!(format_uptime(25 * 3600 + 5 * 60 + 9), "25h 5m");
        assert_eq!(format_uptime(45 * 60), "45m");
    }

    #[test]
    fn test_recovery_flag_is_exclusive() {
        let cell = StatusCell::new("p1", "demo", QualityTier::Medium);
        let guard = cell.try_begin_recovery().unwrap();
        assert_eq!(guard.pipeline_id(), "p1");
        assert!(cell.is_recovering());
        assert!(cell.try_begin_recovery().is_none());
        assert!(cell.snapshot().recovery_in_progress);

        drop(guard);
        assert!(!cell.is_recovering());
        assert!(cell.try_begin_recovery().is_some());
    }

    #[test]
    fn test_snapshot_reports_uptime_only_while_live() {
        let cell = StatusCell::new("p1", "demo", QualityTier::High);
        cell.set_total_uptime(120);
        let status = cell.snapshot();
        assert_eq!(status.state, PipelineState::Stopped);
        assert_eq!(status.uptime, "0m");
        assert_eq!(status.total_uptime_secs, 120);
        assert_eq!(status.quality, QualityTier::High);

        cell.set_state(PipelineState::Live);
        cell.set_live_since(Some(Instant::now()));
        assert_eq!(cell.snapshot().state, PipelineState::Live);
    }
}
