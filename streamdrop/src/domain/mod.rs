//! Domain layer for streamdrop.
//!
//! Pipeline configuration, the pipeline state machine and the value objects
//! shared by the supervisor, the recovery engine and the stores.

pub mod pipeline;
pub mod value_objects;

pub use pipeline::{
    CUSTOM_PLATFORM, ContentType, Orientation, OutputTarget, PipelineConfig, PipelineConfigPatch,
    PipelineState,
};
pub use value_objects::*;
