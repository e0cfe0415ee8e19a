//! Events published by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::PipelineState;
use crate::metrics::{Alert, AlertSeverity};
use crate::recovery::{FailureTag, RecoveryStrategy};

/// Something a controlling layer may want to react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    StateChanged {
        pipeline_id: String,
        old_state: PipelineState,
        new_state: PipelineState,
        timestamp: DateTime<Utc>,
    },
    RecoveryStarted {
        pipeline_id: String,
        failure_types: Vec<FailureTag>,
        strategy: RecoveryStrategy,
        /// Triggered by a degraded health score rather than a failure.
        preemptive: bool,
        timestamp: DateTime<Utc>,
    },
    RecoveryFinished {
        pipeline_id: String,
        strategy: RecoveryStrategy,
        success: bool,
        retries: u32,
        duration_secs: f64,
        timestamp: DateTime<Utc>,
    },
    AlertRaised {
        alert: Alert,
    },
}

impl SupervisorEvent {
    pub fn pipeline_id(&self) -> &str {
        match self {
            Self::StateChanged { pipeline_id, .. }
            | Self::RecoveryStarted { pipeline_id, .. }
            | Self::RecoveryFinished { pipeline_id, .. } => pipeline_id,
            Self::AlertRaised { alert } => &alert.pipeline_id,
        }
    }

    /// Human-readable summary.
    pub fn description(&self) -> String {
        match self {
            Self::StateChanged {
                pipeline_id,
                old_state,
                new_state,
                ..
            } => format!("{pipeline_id}: {old_state} -> {new_state}"),
            Self::RecoveryStarted {
                pipeline_id,
                strategy,
                preemptive,
                ..
            } => {
                let kind = if *preemptive { "preemptive recovery" } else { "recovery" };
                format!("{pipeline_id}: {kind} started with {strategy}")
            }
            Self::RecoveryFinished {
                pipeline_id,
                strategy,
                success,
                duration_secs,
                ..
            } => {
                let outcome = if *success { "succeeded" } else { "failed" };
                format!("{pipeline_id}: {strategy} {outcome} after {duration_secs:.1}s")
            }
            Self::AlertRaised { alert } => {
                format!("{}: [{}] {}", alert.pipeline_id, alert.severity, alert.message)
            }
        }
    }

    pub fn is_critical(&self) -> bool {
        match self {
            Self::StateChanged { new_state, .. } => *new_state == PipelineState::Error,
            Self::AlertRaised { alert } => alert.severity == AlertSeverity::Critical,
            Self::RecoveryStarted { .. } | Self::RecoveryFinished { .. } => false,
        }
    }
}

/// Fan-out of [`SupervisorEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct SupervisorEventBroadcaster {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error for callers
    /// that ignore the result.
    pub fn publish(
        &self,
        event: SupervisorEvent,
    ) -> Result<usize, broadcast::error::SendError<SupervisorEvent>> {
        self.sender.send(event)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SupervisorEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
