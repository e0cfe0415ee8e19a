//! Pipeline state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle state of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No processes are running.
    #[default]
    Stopped,
    /// The start sequence is launching processes.
    Starting,
    /// All processes launched and the stream is publishing.
    Live,
    /// Processes died and recovery failed. Only an explicit start leaves it.
    Error,
}

impl PipelineState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Live => "live",
            Self::Error => "error",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "starting" => Some(Self::Starting),
            "live" => Some(Self::Live),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Whether the pipeline holds (or is acquiring) OS processes.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Live)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (from, to) if from == &to => true,

            // Stop always succeeds
            (_, Stopped) => true,

            (Stopped | Error, Starting) => true,
            (Starting, Live) => true,
            (Live, Error) => true,

            _ => false,
        }
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: PipelineState) -> Result<PipelineState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            PipelineState::Stopped,
            PipelineState::Starting,
            PipelineState::Live,
            PipelineState::Error,
        ] {
            assert_eq!(PipelineState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PipelineState::parse("LIVE"), None);
    }

    #[test]
    fn test_valid_transitions() {
        let state = PipelineState::Stopped;
        let state = state.transition_to(PipelineState::Starting).unwrap();
        let state = state.transition_to(PipelineState::Live).unwrap();
        let state = state.transition_to(PipelineState::Live).unwrap();
        let state = state.transition_to(PipelineState::Error).unwrap();
        let state = state.transition_to(PipelineState::Starting).unwrap();
        assert_eq!(
            state.transition_to(PipelineState::Stopped).unwrap(),
            PipelineState::Stopped
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PipelineState::Stopped.can_transition_to(PipelineState::Live));
        assert!(!PipelineState::Stopped.can_transition_to(PipelineState::Error));
        assert!(!PipelineState::Error.can_transition_to(PipelineState::Live));
        assert!(!PipelineState::Live.can_transition_to(PipelineState::Starting));

        let err = PipelineState::Error
            .transition_to(PipelineState::Live)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_any_state_can_stop() {
        for state in [
            PipelineState::Stopped,
            PipelineState::Starting,
            PipelineState::Live,
            PipelineState::Error,
        ] {
            assert!(state.can_transition_to(PipelineState::Stopped));
        }
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&PipelineState::Live).unwrap();
        assert_eq!(json, "\"live\"");
    }
}
