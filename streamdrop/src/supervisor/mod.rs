//! Pipeline supervision.
//!
//! [`SupervisorRegistry`] owns every running [`PipelineInstance`] behind its
//! own lock and is the surface a controlling layer talks to.
//! [`SupervisorMonitor`] periodically checks each instance, scores its
//! health and triggers recovery.

mod context;
mod events;
mod instance;
mod monitor;
mod outcome;
mod registry;
mod status;

pub use context::SupervisorContext;
pub use events::{SupervisorEvent, SupervisorEventBroadcaster};
pub use instance::PipelineInstance;
pub use monitor::SupervisorMonitor;
pub use outcome::OperationOutcome;
pub use registry::SupervisorRegistry;
pub use status::{PipelineStatus, RecoveryGuard, StatusCell, format_uptime};
