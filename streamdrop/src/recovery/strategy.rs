//! Recovery strategies and strategy selection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::attempt::RecoveryHistory;
use super::failure::FailureTag;
use crate::domain::QualityTier;
use crate::process::ProcessRole;

/// Repair action, ordered roughly by how disruptive it is.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryStrategy {
    RestartEncoder,
    RestartRenderer,
    /// Every other process draws on the display, so this is a full restart.
    RestartDisplay,
    ReduceQuality,
    Reconnect,
    FullRestart,
}

/// Chooses a strategy for a failure.
///
/// The mapping keys on the first tag only. A strategy that just failed for
/// the same primary tag is not tried again: the planner escalates to
/// [`RecoveryStrategy::FullRestart`] instead. Once lowering quality has
/// failed at the lowest tier, it stays escalated for as long as the
/// pipeline remains at that tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryPlanner;

impl RecoveryPlanner {
    /// Base mapping. Total: anything unrecognised gets a full restart.
    pub fn strategy_for(tag: &FailureTag) -> RecoveryStrategy {
        match tag {
            FailureTag::ProcessFailure(ProcessRole::Encoder) => RecoveryStrategy::RestartEncoder,
            FailureTag::ProcessFailure(ProcessRole::Renderer) => RecoveryStrategy::RestartRenderer,
            FailureTag::ProcessFailure(ProcessRole::Display) => RecoveryStrategy::RestartDisplay,
            FailureTag::HighCpu => RecoveryStrategy::ReduceQuality,
            FailureTag::MemoryExhaustion => RecoveryStrategy::FullRestart,
            FailureTag::ConnectionIssues => RecoveryStrategy::Reconnect,
            FailureTag::CriticalHealth
            | FailureTag::UnknownFailure
            | FailureTag::ManualRecovery
            | FailureTag::Other(_) => RecoveryStrategy::FullRestart,
        }
    }

    /// Primary tag of a tag list.
    pub fn primary(tags: &[FailureTag]) -> FailureTag {
        tags.first().cloned().unwrap_or(FailureTag::UnknownFailure)
    }

    /// Strategy for `tags` on a pipeline currently at `quality`, escalated
    /// when history shows the base strategy cannot help.
    pub fn plan(
        &self,
        tags: &[FailureTag],
        history: &RecoveryHistory,
        quality: QualityTier,
    ) -> RecoveryStrategy {
        let primary = Self::primary(tags);
        let base = Self::strategy_for(&primary);
        if base == RecoveryStrategy::FullRestart {
            return base;
        }

        let repeat_failure = history
            .last_resolved_for(&primary)
            .is_some_and(|last| last.strategy == base && last.success == Some(false));

        let at_floor = base == RecoveryStrategy::ReduceQuality
            && quality == QualityTier::FLOOR
            && history
                .last_resolved_with(&primary, base)
                .is_some_and(|last| last.success == Some(false));

        if repeat_failure || at_floor {
            debug!(
                %primary,
                %base,
                %quality,
                "Base strategy cannot help, escalating to full restart"
            );
            RecoveryStrategy::FullRestart
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::attempt::RecoveryAttempt;
    use std::time::Duration;

    fn all_tags() -> Vec<FailureTag> {
        vec![
            FailureTag::ProcessFailure(ProcessRole::Display),
            FailureTag::ProcessFailure(ProcessRole::Renderer),
            FailureTag::ProcessFailure(ProcessRole::Encoder),
            FailureTag::HighCpu,
            FailureTag::MemoryExhaustion,
            FailureTag::ConnectionIssues,
            FailureTag::CriticalHealth,
            FailureTag::UnknownFailure,
            FailureTag::ManualRecovery,
            FailureTag::Other("weird".into()),
        ]
    }

    #[test]
    fn test_base_mapping() {
        use RecoveryStrategy::*;
        let expected = [
            RestartDisplay,
            RestartRenderer,
            RestartEncoder,
            ReduceQuality,
            FullRestart,
            Reconnect,
            FullRestart,
            FullRestart,
            FullRestart,
            FullRestart,
        ];
        for (tag, strategy) in all_tags().iter().zip(expected) {
            assert_eq!(RecoveryPlanner::strategy_for(tag), strategy, "{tag}");
        }
    }

    #[test]
    fn test_plan_is_deterministic_and_uses_first_tag() {
        let history = RecoveryHistory::new(10);
        for tag in all_tags() {
            let tags = vec![tag.clone(), FailureTag::HighCpu];
            let a = RecoveryPlanner.plan(&tags, &history, QualityTier::Medium);
            let b = RecoveryPlanner.plan(&tags, &history, QualityTier::Medium);
            assert_eq!(a, b);
            assert_eq!(a, RecoveryPlanner::strategy_for(&tag));
        }
        assert_eq!(
            RecoveryPlanner.plan(&[], &history, QualityTier::Medium),
            RecoveryStrategy::FullRestart
        );
    }

    #[test]
    fn test_escalates_after_failed_attempt() {
        let mut history = RecoveryHistory::new(10);
        let tags = vec![FailureTag::HighCpu];

        let mut failed = RecoveryAttempt::begin("p", &tags, RecoveryStrategy::ReduceQuality);
        failed.resolve(false, 0, Duration::from_millis(5), Some("floor".into()));
        history.push(failed);

        assert_eq!(
            RecoveryPlanner.plan(&tags, &history, QualityTier::Medium),
            RecoveryStrategy::FullRestart
        );

        // Other primaries are unaffected.
        assert_eq!(
            RecoveryPlanner.plan(&[FailureTag::ConnectionIssues], &history, QualityTier::Medium),
            RecoveryStrategy::Reconnect
        );
    }

    #[test]
    fn test_success_clears_escalation() {
        let mut history = RecoveryHistory::new(10);
        let tags = vec![FailureTag::ProcessFailure(ProcessRole::Encoder)];

        let mut failed = RecoveryAttempt::begin("p", &tags, RecoveryStrategy::RestartEncoder);
        failed.resolve(false, 3, Duration::from_secs(1), None);
        history.push(failed);
        assert_eq!(
            RecoveryPlanner.plan(&tags, &history, QualityTier::Medium),
            RecoveryStrategy::FullRestart
        );

        let mut escalated = RecoveryAttempt::begin("p", &tags, RecoveryStrategy::FullRestart);
        escalated.resolve(true, 0, Duration::from_secs(1), None);
        history.push(escalated);
        assert_eq!(
            RecoveryPlanner.plan(&tags, &history, QualityTier::Medium),
            RecoveryStrategy::RestartEncoder
        );
    }

    #[test]
    fn test_stays_escalated_at_quality_floor() {
        let mut history = RecoveryHistory::new(10);
        let tags = vec![FailureTag::HighCpu];
        let low = QualityTier::FLOOR;

        // Nothing failed yet: lowering quality is tried even at the floor.
        assert_eq!(
            RecoveryPlanner.plan(&tags, &history, low),
            RecoveryStrategy::ReduceQuality
        );

        let mut floor = RecoveryAttempt::begin("p", &tags, RecoveryStrategy::ReduceQuality);
        floor.resolve(false, 0, Duration::from_millis(1), Some("lowest tier".into()));
        history.push(floor);

        // Full restarts succeeding in between do not bring the doomed
        // downgrade back.
        for _ in 0..4 {
            assert_eq!(
                RecoveryPlanner.plan(&tags, &history, low),
                RecoveryStrategy::FullRestart
            );
            let mut restart = RecoveryAttempt::begin("p", &tags, RecoveryStrategy::FullRestart);
            restart.resolve(true, 0, Duration::from_millis(1), None);
            history.push(restart);
        }

        // Above the floor the downgrade is possible again.
        assert_eq!(
            RecoveryPlanner.plan(&tags, &history, QualityTier::Medium),
            RecoveryStrategy::ReduceQuality
        );
    }
}
