//! Failure tags and the classifier that derives them from symptoms.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::metrics::MetricSample;
use crate::process::ProcessRole;

/// Categorised symptom of a failing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureTag {
    /// A tracked process exited.
    ProcessFailure(ProcessRole),
    HighCpu,
    MemoryExhaustion,
    ConnectionIssues,
    CriticalHealth,
    /// Nothing specific was detected.
    UnknownFailure,
    /// Recovery requested by an operator.
    ManualRecovery,
    /// A tag this build does not know, kept verbatim.
    Other(String),
}

impl fmt::Display for FailureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessFailure(role) => write!(f, "process_failure_{role}"),
            Self::HighCpu => f.write_str("high_cpu"),
            Self::MemoryExhaustion => f.write_str("memory_exhaustion"),
            Self::ConnectionIssues => f.write_str("connection_issues"),
            Self::CriticalHealth => f.write_str("critical_health"),
            Self::UnknownFailure => f.write_str("unknown_failure"),
            Self::ManualRecovery => f.write_str("manual_recovery"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

impl FromStr for FailureTag {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognised names become [`FailureTag::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "high_cpu" => Self::HighCpu,
            "memory_exhaustion" => Self::MemoryExhaustion,
            "connection_issues" => Self::ConnectionIssues,
            "critical_health" => Self::CriticalHealth,
            "unknown_failure" => Self::UnknownFailure,
            "manual_recovery" => Self::ManualRecovery,
            other => match other
                .strip_prefix("process_failure_")
                .and_then(|role| role.parse::<ProcessRole>().ok())
            {
                Some(role) => Self::ProcessFailure(role),
                None => Self::Other(other.to_string()),
            },
        })
    }
}

impl Serialize for FailureTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FailureTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let Ok(tag) = raw.parse::<FailureTag>();
        Ok(tag)
    }
}

/// Render a tag list as `a, b, c`.
pub fn join_tags(tags: &[FailureTag]) -> String {
    tags.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Observations the classifier works from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Symptoms<'a> {
    /// Roles of tracked processes that have exited.
    pub dead: &'a [ProcessRole],
    pub sample: Option<&'a MetricSample>,
    pub health: Option<f64>,
}

/// Maps symptoms to failure tags. Pure and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    pub const HIGH_CPU_PERCENT: f64 = 90.0;
    pub const MEMORY_EXHAUSTION_MB: f64 = 2000.0;
    pub const CONNECTION_DROP_FRAMES: u64 = 50;
    pub const CRITICAL_HEALTH: f64 = 30.0;

    /// Never empty: falls back to [`FailureTag::UnknownFailure`].
    pub fn classify(&self, symptoms: &Symptoms<'_>) -> Vec<FailureTag> {
        let mut dead = symptoms.dead.to_vec();
        dead.sort_unstable();
        dead.dedup();

        let mut tags: Vec<FailureTag> = dead.into_iter().map(FailureTag::ProcessFailure).collect();

        if let Some(sample) = symptoms.sample {
            if sample.cpu_percent > Self::HIGH_CPU_PERCENT {
                tags.push(FailureTag::HighCpu);
            }
            if sample.memory_mb > Self::MEMORY_EXHAUSTION_MB {
                tags.push(FailureTag::MemoryExhaustion);
            }
            if sample.frame_drops > Self::CONNECTION_DROP_FRAMES {
                tags.push(FailureTag::ConnectionIssues);
            }
        }

        if symptoms.health.is_some_and(|h| h < Self::CRITICAL_HEALTH) {
            tags.push(FailureTag::CriticalHealth);
        }

        if tags.is_empty() {
            tags.push(FailureTag::UnknownFailure);
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(cpu: f64, memory: f64, drops: u64) -> MetricSample {
        MetricSample {
            fps: 30.0,
            bitrate_kbps: 2500.0,
            frame_drops: drops,
            cpu_percent: cpu,
            memory_mb: memory,
            bandwidth_mbps: 2.5,
            elapsed_secs: 60,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_tag_names_roundtrip() {
        let tags = [
            FailureTag::ProcessFailure(ProcessRole::Display),
            FailureTag::ProcessFailure(ProcessRole::Renderer),
            FailureTag::ProcessFailure(ProcessRole::Encoder),
            FailureTag::HighCpu,
            FailureTag::MemoryExhaustion,
            FailureTag::ConnectionIssues,
            FailureTag::CriticalHealth,
            FailureTag::UnknownFailure,
            FailureTag::ManualRecovery,
        ];
        for tag in tags {
            let parsed: FailureTag = tag.to_string().parse().unwrap();
            assert_eq!(parsed, tag);
        }
        assert_eq!(
            FailureTag::ProcessFailure(ProcessRole::Encoder).to_string(),
            "process_failure_encoder"
        );
    }

    #[test]
    fn test_unknown_names_become_other() {
        let tag: FailureTag = "process_failure_gpu".parse().unwrap();
        assert_eq!(tag, FailureTag::Other("process_failure_gpu".into()));
        assert_eq!(tag.to_string(), "process_failure_gpu");
    }

    #[test]
    fn test_serde_as_string() {
        let tags = vec![FailureTag::HighCpu, FailureTag::ManualRecovery];
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"["high_cpu","manual_recovery"]"#);
        let back: Vec<FailureTag> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![FailureTag::HighCpu, FailureTag::ManualRecovery]);
    }

    #[test]
    fn test_no_symptoms_is_unknown() {
        let tags = FailureClassifier.classify(&Symptoms::default());
        assert_eq!(tags, vec![FailureTag::UnknownFailure]);

        let healthy = sample(10.0, 100.0, 0);
        let tags = FailureClassifier.classify(&Symptoms {
            dead: &[],
            sample: Some(&healthy),
            health: Some(95.0),
        });
        assert_eq!(tags, vec![FailureTag::UnknownFailure]);
    }

    #[test]
    fn test_process_tags_first_in_role_order() {
        let bad = sample(95.0, 2500.0, 60);
        let tags = FailureClassifier.classify(&Symptoms {
            dead: &[ProcessRole::Encoder, ProcessRole::Display],
            sample: Some(&bad),
            health: Some(10.0),
        });
        assert_eq!(
            tags,
            vec![
                FailureTag::ProcessFailure(ProcessRole::Display),
                FailureTag::ProcessFailure(ProcessRole::Encoder),
                FailureTag::HighCpu,
                FailureTag::MemoryExhaustion,
                FailureTag::ConnectionIssues,
                FailureTag::CriticalHealth,
            ]
        );
    }

    #[test]
    fn test_thresholds_are_strict() {
        let edge = sample(90.0, 2000.0, 50);
        let tags = FailureClassifier.classify(&Symptoms {
            dead: &[],
            sample: Some(&edge),
            health: Some(30.0),
        });
        assert_eq!(tags, vec![FailureTag::UnknownFailure]);
    }
}
