//! Pipeline start sequence.

use std::sync::Arc;

use tracing::{debug, info};

use super::child_set::{ChildProcessSet, ProcessRole};
use super::command::CommandSpec;
use super::display::{DisplayAllocator, DisplayBackend, DisplayLease, XvfbDisplay};
use super::encoder::{CaptureSource, EncodeContext, EncoderBackend, FfmpegEncoder};
use super::renderer::{BrowserRenderer, GameSurfaceRenderer, RenderContext, RendererSet};
use crate::config::{BinaryPaths, CaptureMode, ProcessTimings};
use crate::domain::{PipelineConfig, QualityPreset};
use crate::output::{OutputPlan, resolve_outputs};
use crate::platforms::PlatformCatalog;
use crate::{Error, Result};

/// The command builders used for each process role.
#[derive(Clone)]
pub struct Backends {
    pub display: Arc<dyn DisplayBackend>,
    pub renderers: RendererSet,
    pub encoder: Arc<dyn EncoderBackend>,
}

impl Backends {
    /// Xvfb, chromium / python and ffmpeg at the configured paths.
    pub fn from_binaries(paths: &BinaryPaths) -> Self {
        Self {
            display: Arc::new(XvfbDisplay::new(&paths.xvfb)),
            renderers: RendererSet::new(
                Arc::new(BrowserRenderer::new(&paths.chromium)),
                Arc::new(GameSurfaceRenderer::new(&paths.python)),
            ),
            encoder: Arc::new(FfmpegEncoder::new(&paths.ffmpeg)),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("renderers", &self.renderers)
            .finish_non_exhaustive()
    }
}

/// Resolved parameters of one run, kept to relaunch single processes.
#[derive(Debug)]
pub struct LaunchPlan {
    pub preset: QualityPreset,
    pub outputs: OutputPlan,
    pub display: Option<DisplayLease>,
}

impl LaunchPlan {
    pub fn display_number(&self) -> Option<u32> {
        self.display.as_ref().map(DisplayLease::number)
    }
}

/// Processes and plan of a freshly started run.
#[derive(Debug)]
pub struct LaunchedPipeline {
    pub processes: ChildProcessSet,
    pub plan: LaunchPlan,
}

/// Launches the process chain of a pipeline.
#[derive(Debug)]
pub struct PipelineLauncher {
    backends: Backends,
    catalog: Arc<PlatformCatalog>,
    capture_mode: CaptureMode,
    timings: ProcessTimings,
    displays: Arc<DisplayAllocator>,
}

impl PipelineLauncher {
    pub fn new(
        backends: Backends,
        catalog: Arc<PlatformCatalog>,
        capture_mode: CaptureMode,
        timings: ProcessTimings,
        display_base: u32,
    ) -> Self {
        Self {
            backends,
            catalog,
            capture_mode,
            timings,
            displays: DisplayAllocator::new(display_base),
        }
    }

    pub fn timings(&self) -> &ProcessTimings {
        &self.timings
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.catalog
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    /// Validate the config and resolve everything a launch needs.
    ///
    /// Fails before any process is spawned.
    pub fn plan(&self, config: &PipelineConfig) -> Result<LaunchPlan> {
        config.validate()?;
        let outputs = resolve_outputs(config, &self.catalog)?;

        let vertical = config
            .orientation
            .is_vertical(self.catalog.prefers_vertical(&config.platform));
        let mut preset = config.quality.preset(vertical);
        if let Some(max_bitrate) = self.catalog.max_bitrate(&config.platform) {
            preset = preset.capped(max_bitrate);
        }

        let display = match self.capture_mode {
            CaptureMode::VirtualDisplay => Some(self.displays.acquire()),
            CaptureMode::Headless => None,
        };

        Ok(LaunchPlan {
            preset,
            outputs,
            display,
        })
    }

    /// Run the full start sequence: display, renderer, encoder.
    ///
    /// On failure every process already spawned is torn down again.
    pub async fn launch(&self, config: &PipelineConfig) -> Result<LaunchedPipeline> {
        let plan = self.plan(config)?;
        let mut processes = ChildProcessSet::new(&config.id);

        info!(
            pipeline_id = %config.id,
            quality = %config.quality,
            resolution = %plan.preset.resolution(),
            bitrate_kbps = plan.preset.bitrate_kbps,
            display = ?plan.display_number(),
            outputs = ?plan.outputs.redacted(),
            "Launching pipeline"
        );

        for role in ProcessRole::ALL {
            if role == ProcessRole::Display && plan.display.is_none() {
                continue;
            }
            if let Err(e) = self.launch_role(role, config, &plan, &mut processes).await {
                processes.stop_all(self.timings.terminate_grace).await;
                return Err(e);
            }
        }

        Ok(LaunchedPipeline { processes, plan })
    }

    /// Launch a single process of an existing run.
    pub async fn launch_role(
        &self,
        role: ProcessRole,
        config: &PipelineConfig,
        plan: &LaunchPlan,
        processes: &mut ChildProcessSet,
    ) -> Result<u32> {
        let spec = self.command_for(role, config, plan)?;
        debug!(pipeline_id = %config.id, %role, program = %spec.program, "Spawning process");
        processes.spawn(role, &spec, self.grace_for(role)).await
    }

    fn command_for(
        &self,
        role: ProcessRole,
        config: &PipelineConfig,
        plan: &LaunchPlan,
    ) -> Result<CommandSpec> {
        let display = plan.display_number();
        match role {
            ProcessRole::Display => {
                let number = display
                    .ok_or_else(|| Error::launch(role, "no display in headless capture mode"))?;
                Ok(self.backends.display.command(number, &plan.preset))
            }
            ProcessRole::Renderer => self
                .backends
                .renderers
                .for_content(config.content_type)
                .command(&RenderContext {
                    source: &config.source,
                    display,
                    preset: plan.preset,
                }),
            ProcessRole::Encoder => Ok(self.backends.encoder.command(&EncodeContext {
                capture: display.map_or(CaptureSource::Synthetic, CaptureSource::Display),
                preset: plan.preset,
                audio: &config.audio,
                outputs: &plan.outputs,
            })),
        }
    }

    fn grace_for(&self, role: ProcessRole) -> std::time::Duration {
        match role {
            ProcessRole::Display => self.timings.display_grace,
            ProcessRole::Renderer => self.timings.renderer_grace,
            ProcessRole::Encoder => self.timings.encoder_grace,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{ContentType, Orientation, OutputTarget, QualityTier};
    use crate::process::renderer::Renderer;
    use std::time::Duration;

    struct Sleeper;

    impl DisplayBackend for Sleeper {
        fn command(&self, _display: u32, _preset: &QualityPreset) -> CommandSpec {
            CommandSpec::new("sleep").arg("30")
        }
    }

    impl Renderer for Sleeper {
        fn name(&self) -> &'static str {
            "sleeper"
        }

        fn command(&self, _ctx: &RenderContext<'_>) -> Result<CommandSpec> {
            Ok(CommandSpec::new("sleep").arg("30"))
        }
    }

    impl EncoderBackend for Sleeper {
        fn command(&self, _ctx: &EncodeContext<'_>) -> CommandSpec {
            CommandSpec::new("sleep").arg("30")
        }
    }

    struct Broken;

    impl EncoderBackend for Broken {
        fn command(&self, _ctx: &EncodeContext<'_>) -> CommandSpec {
            CommandSpec::new("/nonexistent/streamdrop-encoder")
        }
    }

    fn launcher(encoder: Arc<dyn EncoderBackend>, mode: CaptureMode) -> PipelineLauncher {
        PipelineLauncher::new(
            Backends {
                display: Arc::new(Sleeper),
                renderers: RendererSet::uniform(Arc::new(Sleeper)),
                encoder,
            },
            Arc::new(PlatformCatalog::builtin()),
            mode,
            ProcessTimings::uniform(Duration::from_millis(30)),
            7100,
        )
    }

    fn config(platform: &str) -> PipelineConfig {
        PipelineConfig::new("t", ContentType::BrowserPage, "https://x", platform, "key")
    }

    #[test]
    fn test_plan_caps_bitrate_and_rotates() {
        let launcher = launcher(Arc::new(Sleeper), CaptureMode::Headless);
        let plan = launcher
            .plan(&config("tiktok").with_quality(QualityTier::Ultra))
            .unwrap();
        assert_eq!(plan.preset.resolution(), "1080x1920");
        assert_eq!(plan.preset.bitrate_kbps, 4000);
        assert!(plan.display.is_none());

        let plan = launcher
            .plan(
                &config("tiktok")
                    .with_quality(QualityTier::Low)
                    .with_orientation(Orientation::Horizontal),
            )
            .unwrap();
        assert_eq!(plan.preset.resolution(), "854x480");
    }

    #[test]
    fn test_plan_rejects_unknown_target() {
        let launcher = launcher(Arc::new(Sleeper), CaptureMode::Headless);
        let err = launcher
            .plan(&config("youtube").with_target(OutputTarget::new("nowhere", "k")))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPlatform(_)));
    }

    #[tokio::test]
    async fn test_launch_all_roles() {
        let launcher = launcher(Arc::new(Sleeper), CaptureMode::VirtualDisplay);
        let mut launched = launcher.launch(&config("youtube")).await.unwrap();
        assert!(launched.plan.display_number().is_some());
        assert_eq!(
            launched.processes.roles(),
            vec![ProcessRole::Display, ProcessRole::Renderer, ProcessRole::Encoder]
        );
        launched.processes.stop_all(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_failed_launch_releases_everything() {
        let launcher = launcher(Arc::new(Broken), CaptureMode::VirtualDisplay);
        let err = launcher.launch(&config("youtube")).await.unwrap_err();
        assert!(matches!(err, Error::Launch { ref role, .. } if role == "encoder"));
        assert_eq!(launcher.displays.in_use(), 0);
    }
}
