//! Child process management.
//!
//! Backends describe the display, renderer and encoder commands; the
//! launcher runs them in order and hands the resulting [`ChildProcessSet`]
//! to the pipeline instance that owns it.

mod child_set;
mod command;
mod display;
mod encoder;
mod launcher;
mod renderer;
mod usage;

pub use child_set::{ChildProcessSet, ManagedProcess, ProcessRole, ProcessStatus};
pub use command::CommandSpec;
pub use display::{DisplayAllocator, DisplayBackend, DisplayLease, XvfbDisplay};
pub use encoder::{
    CaptureSource, EncodeContext, EncoderBackend, EncoderProgress, EncoderStats, FfmpegEncoder,
    parse_progress,
};
pub use launcher::{Backends, LaunchPlan, LaunchedPipeline, PipelineLauncher};
pub use renderer::{BrowserRenderer, GameSurfaceRenderer, RenderContext, Renderer, RendererSet};
pub use usage::{ResourceUsage, UsageSampler, UsageSource};
