//! In-process implementation of the stores.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    PipelineEvent, PipelineRepository, RecoveryStats, StoredPipeline, TelemetryRepository,
};
use crate::domain::{PipelineConfig, PipelineConfigPatch, PipelineState};
use crate::metrics::{Alert, HealthReport, MetricSample};
use crate::platforms::{PlatformCatalog, PlatformInfo};
use crate::recovery::RecoveryAttempt;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Tables {
    pipelines: Vec<StoredPipeline>,
    metrics: Vec<(String, MetricSample)>,
    health: Vec<(String, HealthReport)>,
    alerts: Vec<Alert>,
    recovery: Vec<RecoveryAttempt>,
    events: Vec<PipelineEvent>,
    platforms: HashMap<String, PlatformInfo>,
}

impl Tables {
    fn pipeline_mut(&mut self, id: &str) -> Result<&mut StoredPipeline> {
        self.pipelines
            .iter_mut()
            .find(|p| p.config.id == id)
            .ok_or_else(|| Error::not_found("Pipeline", id))
    }
}

/// Both repositories kept in memory. Telemetry grows without bound.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the built-in platforms.
    pub fn new() -> Self {
        let platforms = PlatformCatalog::builtin_entries()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            tables: RwLock::new(Tables {
                platforms,
                ..Default::default()
            }),
        }
    }

    pub fn upsert_platform(&self, info: PlatformInfo) {
        self.tables.write().platforms.insert(info.name.clone(), info);
    }

    /// Every health report recorded for a pipeline, oldest first.
    pub fn health_reports(&self, pipeline_id: &str) -> Vec<HealthReport> {
        self.tables
            .read()
            .health
            .iter()
            .filter(|(id, _)| id == pipeline_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Every alert recorded for a pipeline, oldest first.
    pub fn alerts(&self, pipeline_id: &str) -> Vec<Alert> {
        self.tables
            .read()
            .alerts
            .iter()
            .filter(|a| a.pipeline_id == pipeline_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PipelineRepository for MemoryStore {
    async fn get(&self, id: &str) -> Result<PipelineConfig> {
        Ok(self.get_stored(id).await?.config)
    }

    async fn get_stored(&self, id: &str) -> Result<StoredPipeline> {
        self.tables
            .read()
            .pipelines
            .iter()
            .find(|p| p.config.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found("Pipeline", id))
    }

    async fn create(&self, config: &PipelineConfig) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.pipelines.iter().any(|p| p.config.id == config.id) {
            return Err(Error::validation(format!("pipeline {} already exists", config.id)));
        }
        tables.pipelines.push(StoredPipeline {
            config: config.clone(),
            status: PipelineState::Stopped,
            total_uptime_secs: 0,
        });
        Ok(())
    }

    async fn update(&self, id: &str, patch: &PipelineConfigPatch) -> Result<PipelineConfig> {
        let mut tables = self.tables.write();
        let stored = tables.pipeline_mut(id)?;
        stored.config.apply(patch.clone());
        Ok(stored.config.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let before = tables.pipelines.len();
        tables.pipelines.retain(|p| p.config.id != id);
        if tables.pipelines.len() == before {
            return Err(Error::not_found("Pipeline", id));
        }
        tables.metrics.retain(|(p, _)| p != id);
        tables.health.retain(|(p, _)| p != id);
        tables.alerts.retain(|a| a.pipeline_id != id);
        tables.recovery.retain(|a| a.pipeline_id != id);
        tables.events.retain(|e| e.pipeline_id != id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredPipeline>> {
        Ok(self.tables.read().pipelines.clone())
    }

    async fn update_status(&self, id: &str, status: PipelineState) -> Result<()> {
        self.tables.write().pipeline_mut(id)?.status = status;
        Ok(())
    }

    async fn add_uptime(&self, id: &str, secs: u64) -> Result<()> {
        let mut tables = self.tables.write();
        let stored = tables.pipeline_mut(id)?;
        stored.total_uptime_secs = stored.total_uptime_secs.saturating_add(secs);
        Ok(())
    }

    async fn list_platforms(&self) -> Result<Vec<PlatformInfo>> {
        let mut platforms: Vec<_> = self.tables.read().platforms.values().cloned().collect();
        platforms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(platforms)
    }
}

#[async_trait]
impl TelemetryRepository for MemoryStore {
    async fn record_metrics(&self, pipeline_id: &str, sample: &MetricSample) -> Result<()> {
        self.tables
            .write()
            .metrics
            .push((pipeline_id.to_string(), sample.clone()));
        Ok(())
    }

    async fn record_health(&self, pipeline_id: &str, report: &HealthReport) -> Result<()> {
        self.tables
            .write()
            .health
            .push((pipeline_id.to_string(), report.clone()));
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        self.tables.write().alerts.push(alert.clone());
        Ok(())
    }

    async fn record_recovery_attempt(&self, attempt: &RecoveryAttempt) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.recovery.iter_mut().find(|a| a.id == attempt.id) {
            Some(existing) => *existing = attempt.clone(),
            None => tables.recovery.push(attempt.clone()),
        }
        Ok(())
    }

    async fn log_event(&self, event: &PipelineEvent) -> Result<()> {
        self.tables.write().events.push(event.clone());
        Ok(())
    }

    async fn recent_metrics(&self, pipeline_id: &str, limit: usize) -> Result<Vec<MetricSample>> {
        Ok(self
            .tables
            .read()
            .metrics
            .iter()
            .rev()
            .filter(|(id, _)| id == pipeline_id)
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn unacked_alerts(&self, pipeline_id: Option<&str>) -> Result<Vec<Alert>> {
        Ok(self
            .tables
            .read()
            .alerts
            .iter()
            .rev()
            .filter(|a| !a.acknowledged && pipeline_id.is_none_or(|id| a.pipeline_id == id))
            .cloned()
            .collect())
    }

    async fn acknowledge_alerts(&self, pipeline_id: &str) -> Result<u64> {
        let mut changed = 0;
        for alert in self
            .tables
            .write()
            .alerts
            .iter_mut()
            .filter(|a| a.pipeline_id == pipeline_id && !a.acknowledged)
        {
            alert.acknowledged = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn recovery_attempts(&self, pipeline_id: &str) -> Result<Vec<RecoveryAttempt>> {
        Ok(self
            .tables
            .read()
            .recovery
            .iter()
            .filter(|a| a.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn recovery_stats(&self, pipeline_id: &str) -> Result<RecoveryStats> {
        let tables = self.tables.read();
        Ok(RecoveryStats::from_attempts(
            tables.recovery.iter().filter(|a| a.pipeline_id == pipeline_id),
        ))
    }

    async fn events(&self, pipeline_id: &str, limit: usize) -> Result<Vec<PipelineEvent>> {
        Ok(self
            .tables
            .read()
            .events
            .iter()
            .rev()
            .filter(|e| e.pipeline_id == pipeline_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
