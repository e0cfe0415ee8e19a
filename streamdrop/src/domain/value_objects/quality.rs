//! Quality tiers and the encoder presets behind them.

use serde::{Deserialize, Serialize};

/// Ordered quality tier of a pipeline.
///
/// The derived ordering follows the ladder: `Low < Medium < High < Ultra`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl QualityTier {
    /// Every tier, highest first. This is the order `reduce_quality` walks.
    pub const LADDER: [QualityTier; 4] = [Self::Ultra, Self::High, Self::Medium, Self::Low];

    /// The lowest defined tier.
    pub const FLOOR: QualityTier = QualityTier::Low;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }

    /// The next tier down, or `None` at the floor.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::Ultra => Some(Self::High),
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => None,
        }
    }

    /// Encoder preset for this tier.
    pub fn preset(self, vertical: bool) -> QualityPreset {
        let preset = match self {
            Self::Low => QualityPreset::new(854, 480, 1000, 24),
            Self::Medium => QualityPreset::new(1280, 720, 2500, 30),
            Self::High => QualityPreset::new(1920, 1080, 4000, 30),
            Self::Ultra => QualityPreset::new(1920, 1080, 6000, 60),
        };
        if vertical { preset.rotated() } else { preset }
    }
}

/// Resolution, bitrate and framerate bundle handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbps.
    pub bitrate_kbps: u32,
    pub framerate: u32,
}

impl QualityPreset {
    pub const fn new(width: u32, height: u32, bitrate_kbps: u32, framerate: u32) -> Self {
        Self {
            width,
            height,
            bitrate_kbps,
            framerate,
        }
    }

    /// Swap width and height for portrait platforms.
    pub fn rotated(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
            ..self
        }
    }

    /// Cap the bitrate at a platform ceiling. A zero ceiling means "no limit".
    pub fn capped(self, max_bitrate_kbps: u32) -> Self {
        if max_bitrate_kbps == 0 {
            return self;
        }
        Self {
            bitrate_kbps: self.bitrate_kbps.min(max_bitrate_kbps),
            ..self
        }
    }

    /// `WIDTHxHEIGHT`, as used by ffmpeg and Xvfb.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Keyframe interval: two seconds worth of frames.
    pub fn gop_size(&self) -> u32 {
        self.framerate * 2
    }

    /// Rate-control buffer, twice the bitrate.
    pub fn buffer_size_kbps(&self) -> u32 {
        self.bitrate_kbps * 2
    }
}
