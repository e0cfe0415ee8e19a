//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported platform: {0}")]
    UnknownPlatform(String),

    #[error("Failed to launch {role}: {reason}")]
    Launch { role: String, reason: String },

    #[error("Pipeline processes exited: {0}")]
    ProcessDeath(String),

    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("Recovery already in progress for pipeline {0}")]
    RecoveryRejected(String),

    #[error("Recovery strategy {strategy} failed: {reason}")]
    RecoveryFailure { strategy: String, reason: String },

    #[error("Quality is already at the lowest tier")]
    QualityFloor,

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn launch(role: impl ToString, reason: impl Into<String>) -> Self {
        Self::Launch {
            role: role.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether repeating the failed operation could plausibly succeed.
    ///
    /// Configuration problems and the quality floor never go away on their
    /// own, so recovery does not spend retries on them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration(_)
                | Self::UnknownPlatform(_)
                | Self::QualityFloor
                | Self::Validation(_)
                | Self::NotFound { .. }
                | Self::RecoveryRejected(_)
                | Self::InvalidStateTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::launch("encoder", "spawn failed").is_retryable());
        assert!(Error::Io(std::io::Error::other("boom")).is_retryable());
        assert!(!Error::QualityFloor.is_retryable());
        assert!(!Error::config("missing stream key").is_retryable());
        assert!(!Error::UnknownPlatform("myspace".into()).is_retryable());
    }

    #[test]
    fn test_process_death_is_retryable() {
        let err = Error::ProcessDeath("encoder".into());
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Pipeline processes exited: encoder");
        assert!(Error::ResourceExhaustion("cpu 95.0%".into()).is_retryable());
    }

    #[test]
    fn test_launch_error_message() {
        let err = Error::launch("renderer", "exited during startup");
        assert_eq!(
            err.to_string(),
            "Failed to launch renderer: exited during startup"
        );
    }
}
