//! Recovery attempt records.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::{FailureTag, join_tags};
use super::strategy::RecoveryStrategy;

/// One recovery pass. `success` stays `None` while the pass runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub pipeline_id: String,
    /// Primary failure tag.
    pub failure_type: FailureTag,
    pub strategy: RecoveryStrategy,
    /// Retries used after the first try.
    pub retry_count: u32,
    pub success: Option<bool>,
    pub duration_secs: Option<f64>,
    /// Why the pass ran, plus the final error on failure.
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RecoveryAttempt {
    pub fn begin(
        pipeline_id: impl Into<String>,
        tags: &[FailureTag],
        strategy: RecoveryStrategy,
    ) -> Self {
        let failure_type = tags.first().cloned().unwrap_or(FailureTag::UnknownFailure);
        Self {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            failure_type,
            strategy,
            retry_count: 0,
            success: None,
            duration_secs: None,
            reason: format!("Failures detected: {}", join_tags(tags)),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn resolve(
        &mut self,
        success: bool,
        retry_count: u32,
        duration: Duration,
        error: Option<String>,
    ) {
        self.success = Some(success);
        self.retry_count = retry_count;
        self.duration_secs = Some(duration.as_secs_f64());
        self.completed_at = Some(Utc::now());
        if let Some(error) = error {
            self.reason = format!("{}; last error: {error}", self.reason);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.success.is_some()
    }
}

/// Bounded list of resolved attempts, oldest first.
#[derive(Debug, Clone)]
pub struct RecoveryHistory {
    entries: VecDeque<RecoveryAttempt>,
    capacity: usize,
}

impl RecoveryHistory {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, attempt: RecoveryAttempt) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(attempt);
    }

    /// Most recent resolved attempt whose primary tag is `tag`.
    pub fn last_resolved_for(&self, tag: &FailureTag) -> Option<&RecoveryAttempt> {
        self.entries
            .iter()
            .rev()
            .find(|a| a.is_resolved() && &a.failure_type == tag)
    }

    /// Most recent resolved attempt for `tag` that used `strategy`.
    pub fn last_resolved_with(
        &self,
        tag: &FailureTag,
        strategy: RecoveryStrategy,
    ) -> Option<&RecoveryAttempt> {
        self.entries
            .iter()
            .rev()
            .find(|a| a.is_resolved() && a.strategy == strategy && &a.failure_type == tag)
    }

    pub fn last(&self) -> Option<&RecoveryAttempt> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecoveryAttempt> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecoveryHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_resolve() {
        let tags = [FailureTag::HighCpu, FailureTag::CriticalHealth];
        let mut attempt = RecoveryAttempt::begin("p1", &tags, RecoveryStrategy::ReduceQuality);
        assert_eq!(attempt.failure_type, FailureTag::HighCpu);
        assert_eq!(attempt.reason, "Failures detected: high_cpu, critical_health");
        assert!(!attempt.is_resolved());

        attempt.resolve(false, 2, Duration::from_millis(1500), Some("boom".into()));
        assert_eq!(attempt.success, Some(false));
        assert_eq!(attempt.retry_count, 2);
        assert_eq!(attempt.duration_secs, Some(1.5));
        assert!(attempt.completed_at.is_some());
        assert!(attempt.reason.ends_with("last error: boom"));
    }

    #[test]
    fn test_history_bounded_and_searchable() {
        let mut history = RecoveryHistory::new(2);
        for strategy in [
            RecoveryStrategy::Reconnect,
            RecoveryStrategy::ReduceQuality,
            RecoveryStrategy::FullRestart,
        ] {
            let mut a = RecoveryAttempt::begin("p", &[FailureTag::HighCpu], strategy);
            a.resolve(true, 0, Duration::ZERO, None);
            history.push(a);
        }
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.last_resolved_for(&FailureTag::HighCpu).unwrap().strategy,
            RecoveryStrategy::FullRestart
        );
        assert!(history.last_resolved_for(&FailureTag::CriticalHealth).is_none());
    }
}
