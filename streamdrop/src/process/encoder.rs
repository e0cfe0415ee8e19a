//! ffmpeg encoder backend and progress parsing.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::command::CommandSpec;
use crate::domain::{AudioSettings, QualityPreset};
use crate::output::OutputPlan;

/// Where the encoder reads video from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Grab an X display (`:N`).
    Display(u32),
    /// ffmpeg's built-in test pattern, used in headless mode.
    Synthetic,
}

/// Inputs of one encoder launch.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub capture: CaptureSource,
    pub preset: QualityPreset,
    pub audio: &'a AudioSettings,
    pub outputs: &'a OutputPlan,
}

/// Produces the encoder command for a pipeline.
pub trait EncoderBackend: Send + Sync {
    fn command(&self, ctx: &EncodeContext<'_>) -> CommandSpec;
}

/// The ffmpeg/libx264 encoder.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary_path: String,
}

impl FfmpegEncoder {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Full ffmpeg argument list.
    pub fn build_args(ctx: &EncodeContext<'_>) -> Vec<String> {
        let preset = ctx.preset;
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            "warning".into(),
            "-stats".into(),
        ];

        // Video input
        match ctx.capture {
            CaptureSource::Display(display) => args.extend([
                "-f".into(),
                "x11grab".into(),
                "-video_size".into(),
                preset.resolution(),
                "-framerate".into(),
                preset.framerate.to_string(),
                "-i".into(),
                format!(":{display}"),
            ]),
            CaptureSource::Synthetic => args.extend([
                "-re".into(),
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("testsrc=size={}:rate={}", preset.resolution(), preset.framerate),
            ]),
        }

        // Audio input; a silent track when audio is off
        if ctx.audio.enabled {
            let (format, input) = ctx.audio.device.ffmpeg_input();
            args.extend(["-f".into(), format.into(), "-i".into(), input.into()]);
        } else {
            args.extend([
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                format!("anullsrc=channel_layout=stereo:sample_rate={}", ctx.audio.sample_rate),
            ]);
        }

        let bitrate = format!("{}k", preset.bitrate_kbps);
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            ctx.audio.video_preset.clone(),
            "-b:v".into(),
            bitrate.clone(),
            "-maxrate".into(),
            bitrate,
            "-bufsize".into(),
            format!("{}k", preset.buffer_size_kbps()),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-g".into(),
            preset.gop_size().to_string(),
        ]);

        let audio_bitrate = if ctx.audio.enabled {
            ctx.audio.bitrate.clone()
        } else {
            "128k".to_string()
        };
        args.extend([
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            audio_bitrate,
            "-ar".into(),
            ctx.audio.sample_rate.to_string(),
        ]);

        args.extend(ctx.outputs.muxer_args());
        args
    }
}

impl EncoderBackend for FfmpegEncoder {
    fn command(&self, ctx: &EncodeContext<'_>) -> CommandSpec {
        let spec = CommandSpec::new(&self.binary_path)
            .args(Self::build_args(ctx))
            .env("LC_ALL", "C");
        match ctx.capture {
            CaptureSource::Display(display) => spec.env("DISPLAY", format!(":{display}")),
            CaptureSource::Synthetic => spec,
        }
    }
}

/// One parsed ffmpeg stats line.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EncoderProgress {
    pub frame: u64,
    pub fps: f64,
    /// `None` while ffmpeg still reports `N/A`.
    pub bitrate_kbps: Option<f64>,
    pub drop_frames: u64,
    /// Encoded media time in seconds.
    pub elapsed_secs: f64,
}

/// Parse a stats line such as
/// `frame=  300 fps= 30 q=28.0 size= 1024kB time=00:00:10.00 bitrate= 838.9kbits/s drop=2`.
pub fn parse_progress(line: &str) -> Option<EncoderProgress> {
    let line = line.trim();
    if !line.starts_with("frame=") {
        return None;
    }

    let frame = field(line, "frame=")?.parse().ok()?;
    let fps = field(line, "fps=").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let bitrate_kbps = field(line, "bitrate=")
        .and_then(|v| v.strip_suffix("kbits/s"))
        .and_then(|v| v.parse().ok());
    let drop_frames = field(line, "drop=").and_then(|v| v.parse().ok()).unwrap_or(0);
    let elapsed_secs = field(line, "time=").and_then(parse_time).unwrap_or(0.0);

    Some(EncoderProgress {
        frame,
        fps,
        bitrate_kbps,
        drop_frames,
        elapsed_secs,
    })
}

/// Value after `key`, skipping the padding ffmpeg puts after `=`.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    line[start..].split_whitespace().next()
}

/// Parse time string (HH:MM:SS.ms) to seconds.
fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Latest progress of the running encoder, shared with its stderr reader.
#[derive(Debug, Default)]
pub struct EncoderStats {
    latest: RwLock<Option<EncoderProgress>>,
}

impl EncoderStats {
    pub fn record(&self, progress: EncoderProgress) {
        *self.latest.write() = Some(progress);
    }

    pub fn latest(&self) -> Option<EncoderProgress> {
        *self.latest.read()
    }

    pub fn reset(&self) {
        *self.latest.write() = None;
    }
}

/// Read encoder stderr until EOF or cancellation, recording stats lines.
///
/// ffmpeg rewrites its stats line with `\r`, so input is split on both `\r`
/// and `\n`.
pub fn spawn_progress_reader(
    pipeline_id: String,
    stderr: ChildStderr,
    stats: Arc<EncoderStats>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut segments = BufReader::new(stderr).split(b'\r');

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%pipeline_id, "Encoder output reader cancelled");
                    break;
                }
                segment = segments.next_segment() => {
                    match segment {
                        Ok(Some(bytes)) => {
                            let text = String::from_utf8_lossy(&bytes);
                            for line in text.lines() {
                                if let Some(progress) = parse_progress(line) {
                                    trace!(%pipeline_id, ?progress, "Encoder progress");
                                    stats.record(progress);
                                } else if line.contains("Error") || line.contains("error") {
                                    warn!(%pipeline_id, "Encoder: {}", line.trim());
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(%pipeline_id, "Encoder output closed");
                            break;
                        }
                        Err(e) => {
                            warn!(%pipeline_id, error = %e, "Error reading encoder output");
                            break;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AudioDevice, QualityTier};

    fn args_for(
        capture: CaptureSource,
        audio: &AudioSettings,
        outputs: &OutputPlan,
    ) -> Vec<String> {
        FfmpegEncoder::build_args(&EncodeContext {
            capture,
            preset: QualityTier::Medium.preset(false),
            audio,
            outputs,
        })
    }

    fn window<'a>(args: &'a [String], flag: &str) -> &'a str {
        let idx = args.iter().position(|a| a == flag).unwrap();
        &args[idx + 1]
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("invalid"), None);
    }

    #[test]
    fn test_parse_progress() {
        let line = "frame=  300 fps= 30 q=28.0 size=    1024kB time=00:00:10.00 \
                    bitrate= 838.9kbits/s drop=2 speed=1.00x";
        let p = parse_progress(line).unwrap();
        assert_eq!(p.frame, 300);
        assert_eq!(p.fps, 30.0);
        assert_eq!(p.bitrate_kbps, Some(838.9));
        assert_eq!(p.drop_frames, 2);
        assert_eq!(p.elapsed_secs, 10.0);
    }

    #[test]
    fn test_parse_progress_na_bitrate() {
        let line = "frame=    0 fps=0.0 q=0.0 size=       0kB time=N/A bitrate=N/A speed=N/A";
        let p = parse_progress(line).unwrap();
        assert_eq!(p.bitrate_kbps, None);
        assert_eq!(p.drop_frames, 0);
        assert_eq!(p.elapsed_secs, 0.0);
        assert!(parse_progress("Input #0, x11grab, from ':99':").is_none());
    }

    #[test]
    fn test_display_capture_args() {
        let audio = AudioSettings::default();
        let outputs = OutputPlan::Single("rtmp://host/live/key".into());
        let args = args_for(CaptureSource::Display(99), &audio, &outputs);

        assert_eq!(window(&args, "-video_size"), "1280x720");
        assert_eq!(window(&args, "-framerate"), "30");
        assert!(args.contains(&":99".to_string()));
        assert_eq!(window(&args, "-b:v"), "2500k");
        assert_eq!(window(&args, "-maxrate"), "2500k");
        assert_eq!(window(&args, "-bufsize"), "5000k");
        assert_eq!(window(&args, "-g"), "60");
        assert_eq!(window(&args, "-preset"), "veryfast");
        assert!(args.iter().any(|a| a.starts_with("anullsrc")));
        assert_eq!(args.last().unwrap(), "rtmp://host/live/key");
    }

    #[test]
    fn test_synthetic_capture_with_audio_device() {
        let audio = AudioSettings::from_device(AudioDevice::Alsa);
        let outputs = OutputPlan::Tee(vec!["rtmp://a/k".into(), "rtmp://b/k".into()]);
        let args = args_for(CaptureSource::Synthetic, &audio, &outputs);

        assert!(args.iter().any(|a| a.starts_with("testsrc=size=1280x720")));
        assert!(!args.contains(&"x11grab".to_string()));
        assert!(args.contains(&"hw:0".to_string()));
        assert_eq!(window(&args, "-b:a"), "128k");
        assert_eq!(args.last().unwrap(), "[f=flv]rtmp://a/k|[f=flv]rtmp://b/k");
    }

    #[test]
    fn test_command_sets_display_env() {
        let encoder = FfmpegEncoder::new("/usr/bin/ffmpeg");
        let audio = AudioSettings::default();
        let outputs = OutputPlan::Single("rtmp://host/live/key".into());
        let ctx = EncodeContext {
            capture: CaptureSource::Display(101),
            preset: QualityTier::Low.preset(false),
            audio: &audio,
            outputs: &outputs,
        };
        let spec = encoder.command(&ctx);
        assert_eq!(spec.program, "/usr/bin/ffmpeg");
        assert_eq!(spec.env_value("DISPLAY"), Some(":101"));
    }

    #[test]
    fn test_stats_reset() {
        let stats = EncoderStats::default();
        assert!(stats.latest().is_none());
        stats.record(EncoderProgress {
            frame: 1,
            ..Default::default()
        });
        assert_eq!(stats.latest().unwrap().frame, 1);
        stats.reset();
        assert!(stats.latest().is_none());
    }
}
