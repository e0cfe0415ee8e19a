//! Per-process CPU and memory sampling.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of a group of processes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Mean CPU percentage over the processes that were found.
    pub cpu_percent: f64,
    /// Summed resident memory in MB.
    pub memory_mb: f64,
    /// How many of the requested processes were found.
    pub sampled: usize,
}

/// Source of per-process resource usage.
pub trait UsageSource: Send + Sync {
    fn sample(&self, pids: &[u32]) -> ResourceUsage;
}

/// Samples resource usage through `sysinfo`.
///
/// CPU usage is a delta between two refreshes, so the first sample of a
/// process reports 0%.
pub struct UsageSampler {
    system: Mutex<System>,
}

impl UsageSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl UsageSource for UsageSampler {
    fn sample(&self, pids: &[u32]) -> ResourceUsage {
        if pids.is_empty() {
            return ResourceUsage::default();
        }

        let pids: Vec<Pid> = pids.iter().copied().map(Pid::from_u32).collect();
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let mut cpu_total = 0.0f64;
        let mut memory_bytes = 0u64;
        let mut sampled = 0usize;
        for pid in &pids {
            if let Some(process) = system.process(*pid) {
                cpu_total += f64::from(process.cpu_usage());
                memory_bytes += process.memory();
                sampled += 1;
            }
        }

        ResourceUsage {
            cpu_percent: if sampled > 0 {
                cpu_total / sampled as f64
            } else {
                0.0
            },
            memory_mb: memory_bytes as f64 / (1024.0 * 1024.0),
            sampled,
        }
    }
}

impl Default for UsageSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UsageSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageSampler").finish_non_exhaustive()
    }
}
