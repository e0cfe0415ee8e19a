//! All active pipeline instances, keyed by id.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use super::context::SupervisorContext;
use super::events::SupervisorEvent;
use super::instance::PipelineInstance;
use super::status::{PipelineStatus, StatusCell};
use crate::domain::{PipelineConfig, PipelineConfigPatch, PipelineState};
use crate::output::resolve_outputs;
use crate::{Error, Result};

/// One registered instance. The mutex serializes every operation on the
/// pipeline; the status cell can be read at any time.
struct PipelineSlot {
    instance: Mutex<PipelineInstance>,
    status: Arc<StatusCell>,
}

/// Entry point for controlling pipelines.
///
/// An instance is registered when it is started and removed again when it is
/// stopped. Pipelines parked in `error` stay registered until an explicit
/// stop or start.
pub struct SupervisorRegistry {
    ctx: Arc<SupervisorContext>,
    slots: DashMap<String, Arc<PipelineSlot>>,
}

impl SupervisorRegistry {
    pub fn new(ctx: Arc<SupervisorContext>) -> Self {
        Self {
            ctx,
            slots: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<SupervisorContext> {
        &self.ctx
    }

    fn slot(&self, id: &str) -> Option<Arc<PipelineSlot>> {
        self.slots.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn is_current(&self, id: &str, slot: &Arc<PipelineSlot>) -> bool {
        self.slots
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    fn remove_slot(&self, id: &str, slot: &Arc<PipelineSlot>) {
        self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Ids of every registered instance.
    pub fn active_ids(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Validate a new pipeline and store it. Nothing is launched.
    pub async fn create(&self, config: PipelineConfig) -> Result<PipelineConfig> {
        config.validate()?;
        resolve_outputs(&config, self.ctx.launcher.catalog())?;
        self.ctx.pipelines.create(&config).await?;
        info!(
            pipeline_id = %config.id,
            name = %config.name,
            platform = %config.platform,
            "Pipeline created"
        );
        Ok(config)
    }

    pub async fn start(&self, id: &str) -> Result<String> {
        loop {
            let slot = match self.slot(id) {
                Some(slot) => slot,
                None => {
                    let stored = self.ctx.pipelines.get_stored(id).await?;
                    let instance = PipelineInstance::new(stored.config, Arc::clone(&self.ctx))
                        .with_total_uptime(stored.total_uptime_secs);
                    let candidate = Arc::new(PipelineSlot {
                        status: instance.status_cell(),
                        instance: Mutex::new(instance),
                    });
                    Arc::clone(
                        self.slots
                            .entry(id.to_string())
                            .or_insert(candidate)
                            .value(),
                    )
                }
            };

            let mut instance = slot.instance.lock().await;
            // A concurrent stop may have retired this slot while we waited.
            if !self.is_current(id, &slot) {
                continue;
            }
            let result = instance.start().await;
            if instance.state() == PipelineState::Stopped {
                self.remove_slot(id, &slot);
            }
            return result;
        }
    }

    /// Stop a pipeline. Stopping one that is not running succeeds.
    pub async fn stop(&self, id: &str) -> Result<String> {
        let Some(slot) = self.slot(id) else {
            self.ctx.pipelines.get(id).await?;
            return Ok("Pipeline already stopped".to_string());
        };
        let mut instance = slot.instance.lock().await;
        let result = instance.stop().await;
        self.remove_slot(id, &slot);
        result
    }

    /// Apply a configuration change. A running pipeline is stopped, updated
    /// and started again.
    pub async fn update(&self, id: &str, patch: PipelineConfigPatch) -> Result<PipelineConfig> {
        let Some(slot) = self.slot(id) else {
            self.validate_patch(self.ctx.pipelines.get(id).await?, &patch)?;
            return self.ctx.pipelines.update(id, &patch).await;
        };

        let mut instance = slot.instance.lock().await;
        let result = self.reconfigure(&mut instance, id, &patch).await;
        // Whatever step failed, a stopped instance no longer belongs here.
        if instance.state() == PipelineState::Stopped {
            self.remove_slot(id, &slot);
        }
        result
    }

    async fn reconfigure(
        &self,
        instance: &mut PipelineInstance,
        id: &str,
        patch: &PipelineConfigPatch,
    ) -> Result<PipelineConfig> {
        self.validate_patch(instance.config().clone(), patch)?;

        let was_live = instance.state() == PipelineState::Live;
        if was_live {
            instance.stop().await?;
        }
        let updated = self.ctx.pipelines.update(id, patch).await?;
        instance.replace_config(updated.clone())?;

        if was_live {
            info!(pipeline_id = %id, "Restarting pipeline with updated configuration");
            instance.start().await?;
        }
        Ok(updated)
    }

    fn validate_patch(
        &self,
        mut config: PipelineConfig,
        patch: &PipelineConfigPatch,
    ) -> Result<()> {
        config.apply(patch.clone());
        config.validate()?;
        resolve_outputs(&config, self.ctx.launcher.catalog())?;
        Ok(())
    }

    /// Stop the pipeline if needed and remove it from the store.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Some(slot) = self.slot(id) {
            let mut instance = slot.instance.lock().await;
            instance.stop().await?;
            self.remove_slot(id, &slot);
        }
        self.ctx.pipelines.delete(id).await?;
        info!(pipeline_id = %id, "Pipeline deleted");
        Ok(())
    }

    /// Status without waiting on the instance lock.
    pub async fn status(&self, id: &str) -> Result<PipelineStatus> {
        if let Some(slot) = self.slot(id) {
            return Ok(slot.status.snapshot());
        }
        let stored = self.ctx.pipelines.get_stored(id).await?;
        Ok(PipelineStatus::idle(&stored))
    }

    /// Status of every stored pipeline, in store order.
    pub async fn list(&self) -> Result<Vec<PipelineStatus>> {
        let stored = self.ctx.pipelines.list().await?;
        Ok(stored
            .iter()
            .map(|p| match self.slot(&p.config.id) {
                Some(slot) => slot.status.snapshot(),
                None => PipelineStatus::idle(p),
            })
            .collect())
    }

    /// Operator-triggered recovery pass.
    ///
    /// The recovery flag is claimed before the instance lock, so a second
    /// request while one is running is rejected instead of queued.
    pub async fn manual_recover(&self, id: &str) -> Result<String> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::validation(format!("pipeline {id} is not running")))?;
        let guard = slot
            .status
            .try_begin_recovery()
            .ok_or_else(|| Error::RecoveryRejected(id.to_string()))?;
        let mut instance = slot.instance.lock().await;
        instance.manual_recover(guard).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.ctx.events.subscribe()
    }

    /// Liveness pass over every registered pipeline, concurrently.
    pub async fn check_all(&self) {
        let slots: Vec<_> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        join_all(slots.iter().map(|slot| async move {
            if slot.status.is_recovering() {
                return;
            }
            slot.instance.lock().await.check_processes().await;
        }))
        .await;
    }

    /// Metrics, health and alert pass over every registered pipeline.
    pub async fn observe_all(&self) {
        let slots: Vec<_> = self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        join_all(slots.iter().map(|slot| async move {
            if slot.status.state() != PipelineState::Live || slot.status.is_recovering() {
                return;
            }
            slot.instance.lock().await.observe().await;
        }))
        .await;
    }

    /// Stop every registered pipeline.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self
            .slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        info!(count = slots.len(), "Stopping all pipelines");
        for (id, slot) in slots {
            let mut instance = slot.instance.lock().await;
            if let Err(e) = instance.stop().await {
                debug!(pipeline_id = %id, error = %e, "Stop during shutdown failed");
            }
            self.remove_slot(&id, &slot);
        }
    }
}

impl std::fmt::Debug for SupervisorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorRegistry")
            .field("active", &self.slots.len())
            .finish_non_exhaustive()
    }
}
