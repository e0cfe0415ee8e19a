//! Failure classification and recovery.
//!
//! The classifier turns symptoms into [`FailureTag`]s, the planner picks a
//! [`RecoveryStrategy`] for the primary tag, and the executor carries it out
//! against a [`RecoveryTarget`] with bounded retry.

mod attempt;
mod executor;
mod failure;
mod strategy;

pub use attempt::{RecoveryAttempt, RecoveryHistory};
pub use executor::{ExecutionReport, RecoveryExecutor, RecoveryTarget};
pub use failure::{FailureClassifier, FailureTag, Symptoms, join_tags};
pub use strategy::{RecoveryPlanner, RecoveryStrategy};
