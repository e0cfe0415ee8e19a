//! Pipeline aggregate: configuration and lifecycle state.

mod config;
mod state;

pub use config::{
    CUSTOM_PLATFORM, ContentType, Orientation, OutputTarget, PipelineConfig, PipelineConfigPatch,
};
pub use state::PipelineState;
