//! Supervisor configuration.
//!
//! Everything is read from the environment (after `dotenvy` has loaded any
//! `.env` file). Every key is optional; malformed values are rejected with a
//! `Configuration` error instead of silently falling back.
//!
//! Supported env vars:
//! - `DATABASE_URL` (default `sqlite:streamdrop.db?mode=rwc`)
//! - `STREAMDROP_LOG_DIR` (default `logs`)
//! - `STREAMDROP_CHECK_INTERVAL_SECS` (default 10)
//! - `STREAMDROP_METRICS_INTERVAL_SECS` (default 30)
//! - `STREAMDROP_CAPTURE_MODE` (`virtual_display` or `headless`)
//! - `STREAMDROP_FFMPEG_PATH`, `STREAMDROP_CHROMIUM_PATH`,
//!   `STREAMDROP_PYTHON_PATH`, `STREAMDROP_XVFB_PATH`
//! - `STREAMDROP_DISPLAY_BASE` (default 99)
//! - `STREAMDROP_RECOVERY_MAX_RETRIES` (default 3)
//! - `STREAMDROP_PREEMPTIVE_COOLDOWN_SECS` (default 300)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:streamdrop.db?mode=rwc";

/// How the encoder gets its video.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CaptureMode {
    /// Renderer draws into an Xvfb display that the encoder grabs.
    #[default]
    VirtualDisplay,
    /// No display; the encoder publishes a synthetic test source.
    Headless,
}

/// Executables used by the default backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPaths {
    pub ffmpeg: String,
    pub chromium: String,
    pub python: String,
    pub xvfb: String,
}

impl Default for BinaryPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            chromium: "chromium-browser".to_string(),
            python: "python3".to_string(),
            xvfb: "Xvfb".to_string(),
        }
    }
}

/// Grace windows, settle delays and cooldowns used around child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimings {
    /// Wait after SIGTERM before a forced kill.
    pub terminate_grace: Duration,
    /// Longer SIGTERM wait used by `reconnect`, lets the muxer flush.
    pub reconnect_grace: Duration,
    /// Pause between killing and relaunching one process.
    pub settle: Duration,
    /// Pause between tearing everything down and starting again.
    pub full_restart_settle: Duration,
    /// Pause before the encoder dials the ingest servers again.
    pub reconnect_cooldown: Duration,
    /// Startup windows. A process that exits inside its window failed to launch.
    pub display_grace: Duration,
    pub renderer_grace: Duration,
    pub encoder_grace: Duration,
}

impl Default for ProcessTimings {
    fn default() -> Self {
        Self {
            terminate_grace: Duration::from_secs(5),
            reconnect_grace: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            full_restart_settle: Duration::from_secs(3),
            reconnect_cooldown: Duration::from_secs(5),
            display_grace: Duration::from_secs(2),
            renderer_grace: Duration::from_secs(3),
            encoder_grace: Duration::from_secs(1),
        }
    }
}

impl ProcessTimings {
    /// Every window shrunk to `step`, for tests and dry runs.
    pub fn uniform(step: Duration) -> Self {
        Self {
            terminate_grace: step,
            reconnect_grace: step,
            settle: step,
            full_restart_settle: step,
            reconnect_cooldown: step,
            display_grace: step,
            renderer_grace: step,
            encoder_grace: step,
        }
    }
}

/// Top level configuration of the supervisor process.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    /// How often the monitor loop checks process liveness.
    pub check_interval: Duration,
    /// How often metrics, health and alerts are computed.
    pub metrics_interval: Duration,
    pub capture_mode: CaptureMode,
    pub binaries: BinaryPaths,
    /// First X display number handed out.
    pub display_base: u32,
    pub retry: RetryPolicy,
    /// Minimum gap between two preemptive recovery passes of one pipeline.
    pub preemptive_cooldown: Duration,
    /// Number of metric samples kept per instance.
    pub metrics_window: usize,
    pub timings: ProcessTimings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from("logs"),
            check_interval: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(30),
            capture_mode: CaptureMode::default(),
            binaries: BinaryPaths::default(),
            display_base: 99,
            retry: RetryPolicy::default(),
            preemptive_cooldown: Duration::from_secs(300),
            metrics_window: 120,
            timings: ProcessTimings::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = get("STREAMDROP_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_key::<u64>(&get, "STREAMDROP_CHECK_INTERVAL_SECS")? {
            config.check_interval = positive_secs("STREAMDROP_CHECK_INTERVAL_SECS", secs)?;
        }
        if let Some(secs) = parse_key::<u64>(&get, "STREAMDROP_METRICS_INTERVAL_SECS")? {
            config.metrics_interval = positive_secs("STREAMDROP_METRICS_INTERVAL_SECS", secs)?;
        }
        if let Some(mode) = parse_key::<CaptureMode>(&get, "STREAMDROP_CAPTURE_MODE")? {
            config.capture_mode = mode;
        }
        if let Some(path) = get("STREAMDROP_FFMPEG_PATH") {
            config.binaries.ffmpeg = path;
        }
        if let Some(path) = get("STREAMDROP_CHROMIUM_PATH") {
            config.binaries.chromium = path;
        }
        if let Some(path) = get("STREAMDROP_PYTHON_PATH") {
            config.binaries.python = path;
        }
        if let Some(path) = get("STREAMDROP_XVFB_PATH") {
            config.binaries.xvfb = path;
        }
        if let Some(base) = parse_key::<u32>(&get, "STREAMDROP_DISPLAY_BASE")? {
            config.display_base = base;
        }
        if let Some(retries) = parse_key::<u32>(&get, "STREAMDROP_RECOVERY_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(secs) = parse_key::<u64>(&get, "STREAMDROP_PREEMPTIVE_COOLDOWN_SECS")? {
            config.preemptive_cooldown = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_key<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::config(format!("invalid value for {key}: {raw:?}"))),
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::config(format!("{key} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.check_interval, Duration::from_secs(10));
        assert_eq!(config.metrics_interval, Duration::from_secs(30));
        assert_eq!(config.capture_mode, CaptureMode::VirtualDisplay);
        assert_eq!(config.display_base, 99);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.metrics_window, 120);
        assert_eq!(config.timings.terminate_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = SupervisorConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("STREAMDROP_CHECK_INTERVAL_SECS", "2"),
            ("STREAMDROP_CAPTURE_MODE", "headless"),
            ("STREAMDROP_FFMPEG_PATH", "/opt/ffmpeg"),
            ("STREAMDROP_RECOVERY_MAX_RETRIES", "0"),
            ("STREAMDROP_PREEMPTIVE_COOLDOWN_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.check_interval, Duration::from_secs(2));
        assert_eq!(config.capture_mode, CaptureMode::Headless);
        assert_eq!(config.binaries.ffmpeg, "/opt/ffmpeg");
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.preemptive_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config =
            SupervisorConfig::from_lookup(lookup(&[("STREAMDROP_DISPLAY_BASE", "  ")])).unwrap();
        assert_eq!(config.display_base, 99);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SupervisorConfig::from_lookup(lookup(&[("STREAMDROP_DISPLAY_BASE", "abc")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("DISPLAY_BASE")));

        let err = SupervisorConfig::from_lookup(lookup(&[("STREAMDROP_CAPTURE_MODE", "wayland")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err =
            SupervisorConfig::from_lookup(lookup(&[("STREAMDROP_CHECK_INTERVAL_SECS", "0")]))
                .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_uniform_timings() {
        let timings = ProcessTimings::uniform(Duration::from_millis(20));
        assert_eq!(timings.encoder_grace, Duration::from_millis(20));
        assert_eq!(timings.reconnect_grace, Duration::from_millis(20));
    }
}
