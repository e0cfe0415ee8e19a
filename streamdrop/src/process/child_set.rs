//! The OS processes of one pipeline instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use process_utils::Termination;
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::CommandSpec;
use super::encoder::{EncoderStats, spawn_progress_reader};
use crate::{Error, Result};

/// Role of a process inside a pipeline. Ordering is launch order.
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
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcessRole {
    Display,
    Renderer,
    Encoder,
}

impl ProcessRole {
    pub const ALL: [ProcessRole; 3] = [Self::Display, Self::Renderer, Self::Encoder];
}

/// Point-in-time view of one tracked process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub role: ProcessRole,
    pub pid: Option<u32>,
    pub alive: bool,
}

/// A spawned child and the tasks attached to it.
#[derive(Debug)]
pub struct ManagedProcess {
    role: ProcessRole,
    child: Child,
    pid: Option<u32>,
    program: String,
    started_at: Instant,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ManagedProcess {
    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the child is still running. Reaps it if it has exited.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(role = %self.role, error = %e, "Failed to poll child status");
                false
            }
        }
    }

    /// Two-phase shutdown. Never fails; problems are logged.
    pub async fn stop(mut self, grace: Duration) -> Termination {
        self.cancel.cancel();
        let outcome = match process_utils::terminate_gracefully(&mut self.child, grace).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(role = %self.role, pid = ?self.pid, error = %e, "Failed to terminate child");
                Termination::Killed
            }
        };
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!(role = %self.role, pid = ?self.pid, ?outcome, "Process stopped");
        outcome
    }
}

/// Owns the display, renderer and encoder processes of one pipeline run.
///
/// Handles are spawned with `kill_on_drop`, so dropping the set never leaks a
/// child; [`stop_all`](Self::stop_all) is still the polite way out.
#[derive(Debug)]
pub struct ChildProcessSet {
    pipeline_id: String,
    processes: BTreeMap<ProcessRole, ManagedProcess>,
    encoder_stats: Arc<EncoderStats>,
}

impl ChildProcessSet {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            processes: BTreeMap::new(),
            encoder_stats: Arc::new(EncoderStats::default()),
        }
    }

    /// Spawn a process for `role` and wait out its startup window.
    ///
    /// A process that cannot be spawned, or that exits before `grace` has
    /// elapsed, is a launch error and is not tracked.
    pub async fn spawn(
        &mut self,
        role: ProcessRole,
        spec: &CommandSpec,
        grace: Duration,
    ) -> Result<u32> {
        if self.processes.contains_key(&role) {
            return Err(Error::launch(role, "a process for this role is already running"));
        }

        let capture_stderr = role == ProcessRole::Encoder;
        let mut child = spec
            .to_command(capture_stderr)
            .spawn()
            .map_err(|e| Error::launch(role, format!("failed to spawn {}: {e}", spec.program)))?;
        let pid = child.id();
        let cancel = CancellationToken::new();

        let reader = if capture_stderr {
            self.encoder_stats.reset();
            child.stderr.take().map(|stderr| {
                spawn_progress_reader(
                    self.pipeline_id.clone(),
                    stderr,
                    Arc::clone(&self.encoder_stats),
                    cancel.clone(),
                )
            })
        } else {
            None
        };

        let mut process = ManagedProcess {
            role,
            child,
            pid,
            program: spec.program.clone(),
            started_at: Instant::now(),
            reader,
            cancel,
        };

        tokio::time::sleep(grace).await;

        if let Some(status) = process.child.try_wait()? {
            process.stop(Duration::ZERO).await;
            return Err(Error::launch(
                role,
                format!("{} exited during startup ({status})", spec.program),
            ));
        }

        info!(
            pipeline_id = %self.pipeline_id,
            %role,
            pid = ?pid,
            program = %spec.program,
            "Process launched"
        );
        self.processes.insert(role, process);
        Ok(pid.unwrap_or_default())
    }

    pub fn contains(&self, role: ProcessRole) -> bool {
        self.processes.contains_key(&role)
    }

    pub fn pid(&self, role: ProcessRole) -> Option<u32> {
        self.processes.get(&role).and_then(ManagedProcess::pid)
    }

    /// PIDs of every tracked process, in role order.
    pub fn pids(&self) -> Vec<u32> {
        self.processes.values().filter_map(ManagedProcess::pid).collect()
    }

    pub fn roles(&self) -> Vec<ProcessRole> {
        self.processes.keys().copied().collect()
    }

    pub fn is_alive(&mut self, role: ProcessRole) -> bool {
        self.processes
            .get_mut(&role)
            .is_some_and(ManagedProcess::is_alive)
    }

    /// Liveness of every tracked process, in role order.
    pub fn statuses(&mut self) -> Vec<ProcessStatus> {
        self.processes
            .iter_mut()
            .map(|(role, process)| ProcessStatus {
                role: *role,
                pid: process.pid(),
                alive: process.is_alive(),
            })
            .collect()
    }

    /// Tracked processes that have exited, in role order.
    pub fn dead_roles(&mut self) -> Vec<ProcessRole> {
        self.statuses()
            .into_iter()
            .filter(|s| !s.alive)
            .map(|s| s.role)
            .collect()
    }

    pub fn encoder_stats(&self) -> Arc<EncoderStats> {
        Arc::clone(&self.encoder_stats)
    }

    /// Stop one process. Returns `None` when the role was not tracked.
    pub async fn stop(&mut self, role: ProcessRole, grace: Duration) -> Option<Termination> {
        let process = self.processes.remove(&role)?;
        Some(process.stop(grace).await)
    }

    /// Stop everything, encoder first. Idempotent.
    pub async fn stop_all(&mut self, grace: Duration) {
        while let Some((role, process)) = self.processes.pop_last() {
            let program = process.program().to_string();
            let uptime_secs = process.uptime().as_secs();
            let outcome = process.stop(grace).await;
            debug!(
                pipeline_id = %self.pipeline_id,
                %role,
                %program,
                uptime_secs,
                ?outcome,
                "Released process"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sleeper() -> CommandSpec {
        CommandSpec::new("sleep").arg("30")
    }

    const GRACE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_spawn_and_stop_all() {
        let mut set = ChildProcessSet::new("p1");
        set.spawn(ProcessRole::Display, &sleeper(), GRACE).await.unwrap();
        set.spawn(ProcessRole::Renderer, &sleeper(), GRACE).await.unwrap();
        set.spawn(ProcessRole::Encoder, &sleeper(), GRACE).await.unwrap();

        assert_eq!(set.len(), 3);
        assert!(set.dead_roles().is_empty());
        assert_eq!(set.pids().len(), 3);

        set.stop_all(GRACE).await;
        assert!(set.is_empty());
        assert!(set.statuses().is_empty());

        set.stop_all(GRACE).await;
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let mut set = ChildProcessSet::new("p1");
        let err = set
            .spawn(
                ProcessRole::Renderer,
                &CommandSpec::new("/nonexistent/streamdrop-renderer"),
                GRACE,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { ref role, .. } if role == "renderer"));
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_early_exit_is_launch_error() {
        let mut set = ChildProcessSet::new("p1");
        let err = set
            .spawn(ProcessRole::Encoder, &CommandSpec::new("false"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert!(!set.contains(ProcessRole::Encoder));
    }

    #[tokio::test]
    async fn test_dead_process_detected() {
        let mut set = ChildProcessSet::new("p1");
        set.spawn(ProcessRole::Renderer, &sleeper(), GRACE).await.unwrap();
        let pid = set.spawn(ProcessRole::Encoder, &sleeper(), GRACE).await.unwrap();

        std::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(set.dead_roles(), vec![ProcessRole::Encoder]);
        assert!(set.is_alive(ProcessRole::Renderer));

        assert!(set.stop(ProcessRole::Encoder, GRACE).await.is_some());
        assert!(set.stop(ProcessRole::Encoder, GRACE).await.is_none());
        set.stop_all(GRACE).await;
    }

    #[tokio::test]
    async fn test_duplicate_role_rejected() {
        let mut set = ChildProcessSet::new("p1");
        set.spawn(ProcessRole::Renderer, &sleeper(), GRACE).await.unwrap();
        assert!(set.spawn(ProcessRole::Renderer, &sleeper(), GRACE).await.is_err());
        set.stop_all(GRACE).await;
    }

    #[test]
    fn test_role_order() {
        assert!(ProcessRole::Display < ProcessRole::Renderer);
        assert!(ProcessRole::Renderer < ProcessRole::Encoder);
        assert_eq!(ProcessRole::Encoder.to_string(), "encoder");
    }
}
