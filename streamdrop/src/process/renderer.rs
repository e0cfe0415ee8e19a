//! Content renderers.
//!
//! A renderer turns a pipeline source into the command that draws it. The
//! variants are closed: a browser for pages and an interpreter for game
//! scripts, picked by [`ContentType`].

use std::path::Path;
use std::sync::Arc;

use super::child_set::ProcessRole;
use super::command::CommandSpec;
use crate::domain::{ContentType, QualityPreset};
use crate::{Error, Result};

/// Inputs of one renderer launch.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Page URL or script path.
    pub source: &'a str,
    /// X display to draw into; `None` in headless mode.
    pub display: Option<u32>,
    pub preset: QualityPreset,
}

/// Narrow capability of a content renderer: describe the process to run.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the command, or fail when the source is unusable.
    fn command(&self, ctx: &RenderContext<'_>) -> Result<CommandSpec>;
}

/// Chromium showing a web page.
#[derive(Debug, Clone)]
pub struct BrowserRenderer {
    binary_path: String,
}

impl BrowserRenderer {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

impl Renderer for BrowserRenderer {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn command(&self, ctx: &RenderContext<'_>) -> Result<CommandSpec> {
        if ctx.source.trim().is_empty() {
            return Err(Error::launch(ProcessRole::Renderer, "page URL is empty"));
        }

        let preset = ctx.preset;
        let mut spec = CommandSpec::new(&self.binary_path);
        spec = match ctx.display {
            Some(display) => spec.arg("--kiosk").env("DISPLAY", format!(":{display}")),
            None => spec.arg("--headless=new"),
        };

        Ok(spec
            .args([
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-background-timer-throttling",
                "--disable-backgrounding-occluded-windows",
                "--disable-renderer-backgrounding",
                "--no-first-run",
                "--autoplay-policy=no-user-gesture-required",
            ])
            .arg("--window-position=0,0")
            .arg(format!("--window-size={},{}", preset.width, preset.height))
            .arg(ctx.source))
    }
}

/// A Python script that opens its own window.
#[derive(Debug, Clone)]
pub struct GameSurfaceRenderer {
    interpreter: String,
}

impl GameSurfaceRenderer {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Renderer for GameSurfaceRenderer {
    fn name(&self) -> &'static str {
        "game_surface"
    }

    fn command(&self, ctx: &RenderContext<'_>) -> Result<CommandSpec> {
        if !Path::new(ctx.source).is_file() {
            return Err(Error::launch(
                ProcessRole::Renderer,
                format!("script not found: {}", ctx.source),
            ));
        }

        let preset = ctx.preset;
        let spec = CommandSpec::new(&self.interpreter)
            .arg(ctx.source)
            .env("STREAM_WIDTH", preset.width.to_string())
            .env("STREAM_HEIGHT", preset.height.to_string())
            .env("STREAM_FPS", preset.framerate.to_string());

        Ok(match ctx.display {
            Some(display) => spec.env("DISPLAY", format!(":{display}")),
            None => spec
                .env("SDL_VIDEODRIVER", "dummy")
                .env("SDL_AUDIODRIVER", "dummy"),
        })
    }
}

/// One renderer per content type.
#[derive(Clone)]
pub struct RendererSet {
    browser: Arc<dyn Renderer>,
    game_surface: Arc<dyn Renderer>,
}

impl RendererSet {
    pub fn new(browser: Arc<dyn Renderer>, game_surface: Arc<dyn Renderer>) -> Self {
        Self {
            browser,
            game_surface,
        }
    }

    /// Use the same renderer for every content type.
    pub fn uniform(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            browser: Arc::clone(&renderer),
            game_surface: renderer,
        }
    }

    pub fn for_content(&self, content_type: ContentType) -> &dyn Renderer {
        match content_type {
            ContentType::BrowserPage => self.browser.as_ref(),
            ContentType::GameSurface => self.game_surface.as_ref(),
        }
    }
}

impl std::fmt::Debug for RendererSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererSet")
            .field("browser", &self.browser.name())
            .field("game_surface", &self.game_surface.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityTier;

    fn ctx(source: &str, display: Option<u32>) -> RenderContext<'_> {
        RenderContext {
            source,
            display,
            preset: QualityTier::High.preset(false),
        }
    }

    #[test]
    fn test_browser_on_display() {
        let spec = BrowserRenderer::new("chromium")
            .command(&ctx("https://example.com", Some(99)))
            .unwrap();
        assert_eq!(spec.program, "chromium");
        assert!(spec.args.contains(&"--kiosk".to_string()));
        assert!(spec.args.contains(&"--no-sandbox".to_string()));
        assert!(spec.args.contains(&"--window-size=1920,1080".to_string()));
        assert_eq!(spec.args.last().unwrap(), "https://example.com");
        assert_eq!(spec.env_value("DISPLAY"), Some(":99"));
    }

    #[test]
    fn test_browser_headless() {
        let spec = BrowserRenderer::new("chromium")
            .command(&ctx("https://example.com", None))
            .unwrap();
        assert!(spec.args.contains(&"--headless=new".to_string()));
        assert_eq!(spec.env_value("DISPLAY"), None);
    }

    #[test]
    fn test_game_surface_requires_script() {
        let err = GameSurfaceRenderer::new("python3")
            .command(&ctx("/nonexistent/game.py", Some(99)))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Launch { ref reason, .. } if reason.contains("script not found")
        ));
    }

    #[test]
    fn test_game_surface_command() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("game.py");
        std::fs::write(&script, "print('hi')").unwrap();
        let source = script.to_string_lossy().to_string();

        let spec = GameSurfaceRenderer::new("python3")
            .command(&ctx(&source, None))
            .unwrap();
        assert_eq!(spec.args, vec![source.clone()]);
        assert_eq!(spec.env_value("SDL_VIDEODRIVER"), Some("dummy"));
        assert_eq!(spec.env_value("STREAM_WIDTH"), Some("1920"));
    }

    #[test]
    fn test_selection_by_content_type() {
        let set = RendererSet::new(
            Arc::new(BrowserRenderer::new("chromium")),
            Arc::new(GameSurfaceRenderer::new("python3")),
        );
        assert_eq!(set.for_content(ContentType::BrowserPage).name(), "browser");
        assert_eq!(set.for_content(ContentType::GameSurface).name(), "game_surface");
    }
}
