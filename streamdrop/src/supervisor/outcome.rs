//! Flat result shape for interactive callers.

use serde::{Deserialize, Serialize};

use crate::Result;

/// `{ success, message }` as handed to a controlling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<String>> for OperationOutcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_from_result() {
        let ok = OperationOutcome::from(Ok("Pipeline started".to_string()));
        assert!(ok.success);
        assert_eq!(ok.message, "Pipeline started");

        let failed = OperationOutcome::from(Err(Error::RecoveryRejected("p1".into())));
        assert!(!failed.success);
        assert_eq!(failed.message, "Recovery already in progress for pipeline p1");
    }
}
