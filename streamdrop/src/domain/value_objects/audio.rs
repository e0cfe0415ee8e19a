//! Audio capture settings.

use serde::{Deserialize, Serialize};

/// Where the encoder pulls audio from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDevice {
    /// Default PulseAudio source.
    Pulse,
    /// First ALSA hardware device.
    Alsa,
    /// A named PulseAudio source.
    Named(String),
}

impl Default for AudioDevice {
    fn default() -> Self {
        Self::Pulse
    }
}

impl AudioDevice {
    /// ffmpeg input format and input name for this device.
    pub fn ffmpeg_input(&self) -> (&'static str, &str) {
        match self {
            Self::Pulse => ("pulse", "default"),
            Self::Alsa => ("alsa", "hw:0"),
            Self::Named(name) => ("pulse", name.as_str()),
        }
    }
}

/// Audio options of a pipeline.
///
/// A pipeline without audio still publishes a silent track, most ingest
/// servers reject video-only streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device: AudioDevice,
    /// AAC bitrate, ffmpeg notation (e.g. `128k`).
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// x264 preset used for the video track.
    #[serde(default = "default_video_preset")]
    pub video_preset: String,
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_video_preset() -> String {
    "veryfast".to_string()
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device: AudioDevice::default(),
            bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            video_preset: default_video_preset(),
        }
    }
}

impl AudioSettings {
    /// Enabled audio from the given device, defaults otherwise.
    pub fn from_device(device: AudioDevice) -> Self {
        Self {
            enabled: true,
            device,
            ..Default::default()
        }
    }
}
