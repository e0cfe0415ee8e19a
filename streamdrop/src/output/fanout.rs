//! Multi-target fan-out.
//!
//! The primary destination and every enabled additional target are turned
//! into publish URLs. One URL is written as a plain FLV output; several are
//! written through ffmpeg's `tee` muxer so the stream is encoded once.

use crate::domain::{CUSTOM_PLATFORM, OutputTarget, PipelineConfig};
use crate::platforms::PlatformCatalog;
use crate::{Error, Result};

/// Resolved output of one encoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPlan {
    Single(String),
    Tee(Vec<String>),
}

impl OutputPlan {
    fn from_urls(mut urls: Vec<String>) -> Self {
        if urls.len() == 1 {
            Self::Single(urls.remove(0))
        } else {
            Self::Tee(urls)
        }
    }

    /// Publish URLs in resolution order.
    pub fn urls(&self) -> &[String] {
        match self {
            Self::Single(url) => std::slice::from_ref(url),
            Self::Tee(urls) => urls,
        }
    }

    pub fn len(&self) -> usize {
        self.urls().len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls().is_empty()
    }

    pub fn is_tee(&self) -> bool {
        matches!(self, Self::Tee(_))
    }

    /// The `tee` muxer slave list, `[f=flv]url1|[f=flv]url2`.
    pub fn tee_spec(&self) -> String {
        self.urls()
            .iter()
            .map(|url| format!("[f=flv]{url}"))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Trailing ffmpeg arguments selecting the muxer and destination.
    pub fn muxer_args(&self) -> Vec<String> {
        match self {
            Self::Single(url) => vec!["-f".into(), "flv".into(), url.clone()],
            Self::Tee(_) => vec![
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "1:a:0".into(),
                "-f".into(),
                "tee".into(),
                self.tee_spec(),
            ],
        }
    }

    /// URLs with stream keys masked, for logs.
    pub fn redacted(&self) -> Vec<String> {
        self.urls().iter().map(|u| redact_url(u)).collect()
    }
}

/// Resolve the primary destination plus enabled targets.
///
/// All-or-nothing: the first target that cannot be resolved fails the whole
/// resolution.
pub fn resolve_outputs(config: &PipelineConfig, catalog: &PlatformCatalog) -> Result<OutputPlan> {
    let mut urls = Vec::with_capacity(1 + config.output_targets.len());
    urls.push(resolve_target(
        &config.platform,
        &config.stream_key,
        config.rtmp_url.as_deref(),
        catalog,
    )?);

    for target in config.enabled_targets() {
        let OutputTarget {
            platform,
            stream_key,
            rtmp_url,
            ..
        } = target;
        urls.push(resolve_target(platform, stream_key, rtmp_url.as_deref(), catalog)?);
    }

    Ok(OutputPlan::from_urls(urls))
}

/// Publish URL for one destination.
pub fn resolve_target(
    platform: &str,
    stream_key: &str,
    rtmp_url: Option<&str>,
    catalog: &PlatformCatalog,
) -> Result<String> {
    if platform.eq_ignore_ascii_case(CUSTOM_PLATFORM) {
        let base = rtmp_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::config("custom platform requires rtmp_url"))?;
        return Ok(format!("{}/{}", base.trim_end_matches('/'), stream_key));
    }

    Ok(catalog.resolve(platform)?.stream_url(stream_key))
}

/// Replace the last path segment (the stream key) with `***`.
pub fn redact_url(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) if idx + 1 < url.len() => format!("{}***", &url[..=idx]),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;

    fn config(platform: &str) -> PipelineConfig {
        PipelineConfig::new("p", ContentType::BrowserPage, "https://x", platform, "main")
    }

    #[test]
    fn test_single_target() {
        let catalog = PlatformCatalog::builtin();
        let plan = resolve_outputs(&config("youtube"), &catalog).unwrap();
        assert_eq!(
            plan,
            OutputPlan::Single("rtmp://a.rtmp.youtube.com/live2/main".into())
        );
        assert_eq!(
            plan.muxer_args(),
            vec!["-f", "flv", "rtmp://a.rtmp.youtube.com/live2/main"]
        );
    }

    #[test]
    fn test_tee_preserves_order_and_skips_disabled() {
        let catalog = PlatformCatalog::builtin();
        let config = config("youtube")
            .with_target(OutputTarget::new("twitch", "tw"))
            .with_target(OutputTarget::new("facebook", "fb").disabled())
            .with_target(OutputTarget::custom("rtmp://relay.local/app/", "rl"));

        let plan = resolve_outputs(&config, &catalog).unwrap();
        assert!(plan.is_tee());
        assert_eq!(
            plan.urls(),
            &[
                "rtmp://a.rtmp.youtube.com/live2/main".to_string(),
                "rtmp://live.twitch.tv/live/tw".to_string(),
                "rtmp://relay.local/app/rl".to_string(),
            ]
        );
        assert_eq!(
            plan.tee_spec(),
            concat!(
                "[f=flv]rtmp://a.rtmp.youtube.com/live2/main|",
                "[f=flv]rtmp://live.twitch.tv/live/tw|",
                "[f=flv]rtmp://relay.local/app/rl",
            )
        );
        let args = plan.muxer_args();
        assert_eq!(&args[..4], &["-map", "0:v:0", "-map", "1:a:0"]);
        assert_eq!(args[5], "tee");
    }

    #[test]
    fn test_unknown_target_fails_everything() {
        let catalog = PlatformCatalog::builtin();
        let config = config("youtube")
            .with_target(OutputTarget::new("twitch", "tw"))
            .with_target(OutputTarget::new("myspace", "ms"));
        let err = resolve_outputs(&config, &catalog).unwrap_err();
        assert!(matches!(err, Error::UnknownPlatform(_)));
    }

    #[test]
    fn test_custom_primary() {
        let catalog = PlatformCatalog::builtin();
        let plan = resolve_outputs(
            &config(CUSTOM_PLATFORM).with_rtmp_url("rtmp://ingest.example/live"),
            &catalog,
        )
        .unwrap();
        assert_eq!(plan.urls(), &["rtmp://ingest.example/live/main".to_string()]);

        let err = resolve_target(CUSTOM_PLATFORM, "k", None, &catalog).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_redaction() {
        assert_eq!(
            redact_url("rtmp://live.twitch.tv/live/secret"),
            "rtmp://live.twitch.tv/live/***"
        );
        assert_eq!(redact_url("rtmp://host/"), "rtmp://host/");
    }
}
