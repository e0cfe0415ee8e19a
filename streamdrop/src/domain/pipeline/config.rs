//! Pipeline configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{AudioSettings, QualityTier};
use crate::{Error, Result};

/// Platform name that routes to a caller supplied RTMP base URL.
pub const CUSTOM_PLATFORM: &str = "custom";

/// What the renderer draws.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ContentType {
    /// A web page rendered by a headless browser.
    #[default]
    #[strum(to_string = "browser_page", serialize = "html")]
    BrowserPage,
    /// A script that draws its own window.
    #[strum(to_string = "game_surface", serialize = "pygame")]
    GameSurface,
}

/// Requested output orientation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Orientation {
    /// Vertical when the primary platform prefers it.
    #[default]
    Auto,
    Horizontal,
    Vertical,
}

impl Orientation {
    pub fn is_vertical(self, platform_prefers_vertical: bool) -> bool {
        match self {
            Self::Auto => platform_prefers_vertical,
            Self::Horizontal => false,
            Self::Vertical => true,
        }
    }
}

/// An additional simultaneous publishing destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTarget {
    pub platform: String,
    pub stream_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl OutputTarget {
    pub fn new(platform: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            stream_key: stream_key.into(),
            rtmp_url: None,
            enabled: true,
        }
    }

    pub fn custom(rtmp_url: impl Into<String>, stream_key: impl Into<String>) -> Self {
        Self {
            platform: CUSTOM_PLATFORM.to_string(),
            stream_key: stream_key.into(),
            rtmp_url: Some(rtmp_url.into()),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Description of one pipeline. Immutable while a run is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub id: String,
    pub name: String,
    pub content_type: ContentType,
    /// Page URL or script path, depending on `content_type`.
    pub source: String,
    pub platform: String,
    pub stream_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp_url: Option<String>,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub output_targets: Vec<OutputTarget>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PipelineConfig {
    /// New configuration with a fresh id and defaults for the optional parts.
    pub fn new(
        name: impl Into<String>,
        content_type: ContentType,
        source: impl Into<String>,
        platform: impl Into<String>,
        stream_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            content_type,
            source: source.into(),
            platform: platform.into(),
            stream_key: stream_key.into(),
            rtmp_url: None,
            quality: QualityTier::default(),
            orientation: Orientation::default(),
            audio: AudioSettings::default(),
            output_targets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_rtmp_url(mut self, rtmp_url: impl Into<String>) -> Self {
        self.rtmp_url = Some(rtmp_url.into());
        self
    }

    pub fn with_target(mut self, target: OutputTarget) -> Self {
        self.output_targets.push(target);
        self
    }

    /// Check required fields. Returns a `Configuration` error naming the first problem.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("id", &self.id),
            ("name", &self.name),
            ("source", &self.source),
            ("platform", &self.platform),
            ("stream_key", &self.stream_key),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::config(format!("pipeline {field} must not be empty")));
            }
        }

        if self.platform == CUSTOM_PLATFORM && !has_text(&self.rtmp_url) {
            return Err(Error::config("custom platform requires rtmp_url"));
        }

        for (index, target) in self.output_targets.iter().enumerate() {
            if target.platform.trim().is_empty() || target.stream_key.trim().is_empty() {
                return Err(Error::config(format!(
                    "output target {index} needs a platform and a stream_key"
                )));
            }
            if target.platform == CUSTOM_PLATFORM && !has_text(&target.rtmp_url) {
                return Err(Error::config(format!(
                    "output target {index} uses the custom platform without rtmp_url"
                )));
            }
        }

        Ok(())
    }

    /// Apply a partial update, bumping `updated_at`.
    pub fn apply(&mut self, patch: PipelineConfigPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(source) = patch.source {
            self.source = source;
        }
        if let Some(stream_key) = patch.stream_key {
            self.stream_key = stream_key;
        }
        if let Some(rtmp_url) = patch.rtmp_url {
            self.rtmp_url = rtmp_url;
        }
        if let Some(quality) = patch.quality {
            self.quality = quality;
        }
        if let Some(orientation) = patch.orientation {
            self.orientation = orientation;
        }
        if let Some(audio) = patch.audio {
            self.audio = audio;
        }
        if let Some(targets) = patch.output_targets {
            self.output_targets = targets;
        }
        self.updated_at = Utc::now();
    }

    /// Enabled additional targets, in configuration order.
    pub fn enabled_targets(&self) -> impl Iterator<Item = &OutputTarget> {
        self.output_targets.iter().filter(|t| t.enabled)
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Partial update of a pipeline configuration.
///
/// `rtmp_url` is doubly optional: `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfigPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub stream_key: Option<String>,
    #[serde(default)]
    pub rtmp_url: Option<Option<String>>,
    #[serde(default)]
    pub quality: Option<QualityTier>,
    #[serde(default)]
    pub orientation: Option<Orientation>,
    #[serde(default)]
    pub audio: Option<AudioSettings>,
    #[serde(default)]
    pub output_targets: Option<Vec<OutputTarget>>,
}

impl PipelineConfigPatch {
    pub fn quality(quality: QualityTier) -> Self {
        Self {
            quality: Some(quality),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> PipelineConfig {
        PipelineConfig::new(
            "Lofi",
            ContentType::BrowserPage,
            "https://example.com",
            "youtube",
            "key-1",
        )
    }

    #[test]
    fn test_new_generates_uuid() {
        let a = sample();
        let b = sample();
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_eq!(a.quality, QualityTier::Medium);
    }

    #[test]
    fn test_validate_required_fields() {
        assert!(sample().validate().is_ok());

        let mut config = sample();
        config.stream_key = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("stream_key")));
    }

    #[test]
    fn test_custom_platform_requires_url() {
        let mut config = sample();
        config.platform = CUSTOM_PLATFORM.into();
        assert!(config.validate().is_err());

        let config = config.with_rtmp_url("rtmp://ingest.local/live");
        assert!(config.validate().is_ok());

        let config = config.with_target(OutputTarget::new(CUSTOM_PLATFORM, "k2"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_patch() {
        let mut config = sample().with_rtmp_url("rtmp://a");
        let before = config.updated_at;
        config.apply(PipelineConfigPatch {
            name: Some("Renamed".into()),
            quality: Some(QualityTier::Low),
            rtmp_url: Some(None),
            ..Default::default()
        });
        assert_eq!(config.name, "Renamed");
        assert_eq!(config.quality, QualityTier::Low);
        assert_eq!(config.rtmp_url, None);
        assert_eq!(config.source, "https://example.com");
        assert!(config.updated_at >= before);
    }

    #[test]
    fn test_enabled_targets_keep_order() {
        let config = sample()
            .with_target(OutputTarget::new("twitch", "t"))
            .with_target(OutputTarget::new("facebook", "f").disabled())
            .with_target(OutputTarget::new("tiktok", "k"));
        let platforms: Vec<_> = config.enabled_targets().map(|t| t.platform.as_str()).collect();
        assert_eq!(platforms, vec!["twitch", "tiktok"]);
    }

    #[test]
    fn test_content_type_aliases() {
        assert_eq!(ContentType::from_str("html").unwrap(), ContentType::BrowserPage);
        assert_eq!(ContentType::from_str("pygame").unwrap(), ContentType::GameSurface);
        assert_eq!(ContentType::from_str("game_surface").unwrap(), ContentType::GameSurface);
        assert_eq!(ContentType::GameSurface.to_string(), "game_surface");
    }

    #[test]
    fn test_orientation() {
        assert!(Orientation::Auto.is_vertical(true));
        assert!(!Orientation::Auto.is_vertical(false));
        assert!(Orientation::Vertical.is_vertical(false));
        assert!(!Orientation::Horizontal.is_vertical(true));
    }

    #[test]
    fn test_deserialize_minimal() {
        let json = r#"{
            "id": "p1",
            "name": "n",
            "content_type": "game_surface",
            "source": "game.py",
            "platform": "twitch",
            "stream_key": "k"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.content_type, ContentType::GameSurface);
        assert!(config.output_targets.is_empty());
        assert!(!config.audio.enabled);
    }
}
