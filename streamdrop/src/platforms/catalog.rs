//! Platform name to ingest endpoint mapping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Ingest details of one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub name: String,
    /// Base URL; the stream key is appended verbatim.
    pub rtmp_url: String,
    /// Highest video bitrate the platform accepts, in kbps.
    pub max_bitrate_kbps: u32,
    /// Portrait-first platform.
    #[serde(default)]
    pub vertical: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl PlatformInfo {
    pub fn new(
        name: impl Into<String>,
        rtmp_url: impl Into<String>,
        max_bitrate_kbps: u32,
    ) -> Self {
        Self {
            name: name.into(),
            rtmp_url: rtmp_url.into(),
            max_bitrate_kbps,
            vertical: false,
            enabled: true,
        }
    }

    pub fn vertical(mut self) -> Self {
        self.vertical = true;
        self
    }

    /// Publish URL for a stream key.
    pub fn stream_url(&self, stream_key: &str) -> String {
        format!("{}{}", self.rtmp_url, stream_key)
    }
}

/// Lookup table of known platforms.
#[derive(Debug, Clone)]
pub struct PlatformCatalog {
    platforms: HashMap<String, PlatformInfo>,
}

impl Default for PlatformCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlatformCatalog {
    /// The platforms supported out of the box.
    pub fn builtin_entries() -> Vec<PlatformInfo> {
        vec![
            PlatformInfo::new("youtube", "rtmp://a.rtmp.youtube.com/live2/", 9000),
            PlatformInfo::new("twitch", "rtmp://live.twitch.tv/live/", 6000),
            PlatformInfo::new("facebook", "rtmps://live-api-s.facebook.com:443/rtmp/", 4000),
            PlatformInfo::new("linkedin", "rtmps://1-46c2-477-4480.live-video.net/live/", 5000),
            PlatformInfo::new("instagram", "rtmps://live-upload.instagram.com/rtmp/", 3500)
                .vertical(),
            PlatformInfo::new("tiktok", "rtmp://push.tiktokcdn.com/live/", 4000).vertical(),
        ]
    }

    pub fn builtin() -> Self {
        Self::from_entries(Self::builtin_entries())
    }

    /// Build a catalog from stored entries. Disabled entries are skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = PlatformInfo>) -> Self {
        let platforms = entries
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| (p.name.to_ascii_lowercase(), p))
            .collect();
        Self { platforms }
    }

    pub fn get(&self, name: &str) -> Option<&PlatformInfo> {
        self.platforms.get(&name.to_ascii_lowercase())
    }

    /// Like [`get`](Self::get), but an unknown name is an `UnknownPlatform` error.
    pub fn resolve(&self, name: &str) -> Result<&PlatformInfo> {
        self.get(name)
            .ok_or_else(|| Error::UnknownPlatform(name.to_string()))
    }

    pub fn prefers_vertical(&self, name: &str) -> bool {
        self.get(name).is_some_and(|p| p.vertical)
    }

    pub fn max_bitrate(&self, name: &str) -> Option<u32> {
        self.get(name).map(|p| p.max_bitrate_kbps)
    }

    /// Add or replace a platform.
    pub fn upsert(&mut self, info: PlatformInfo) {
        self.platforms.insert(info.name.to_ascii_lowercase(), info);
    }

    /// Sorted platform names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.platforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}
