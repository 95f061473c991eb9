//! Component registry: sensor/subsystem lifecycle and command delivery.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use gladys_core::component::{
    ComponentCapabilities, ComponentCommand, ComponentRecord, ComponentState, PendingCommand,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mutex-guarded map of live components.
pub struct ComponentRegistry {
    inner: Mutex<HashMap<String, ComponentRecord>>,
    dead_after: Duration,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new(dead_after: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            dead_after,
        }
    }

    /// Insert or update a registration. An empty id requests a
    /// server-assigned one. Returns the effective component id.
    pub async fn register(
        &self,
        component_id: Option<String>,
        component_type: &str,
        address: &str,
        capabilities: ComponentCapabilities,
    ) -> String {
        let id = component_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{component_type}-{}", Uuid::new_v4()));
        let mut inner = self.inner.lock().await;
        match inner.get_mut(&id) {
            Some(existing) => {
                // Re-registration refreshes everything but keeps queued
                // commands for the next heartbeat.
                existing.component_type = component_type.to_string();
                existing.address = address.to_string();
                existing.capabilities = capabilities;
                existing.state = ComponentState::Starting;
                existing.last_heartbeat_ms = gladys_core::now_ms();
                debug!(component_id = %id, "component re-registered");
            }
            None => {
                inner.insert(
                    id.clone(),
                    ComponentRecord::new(
                        id.clone(),
                        component_type.to_string(),
                        address.to_string(),
                        capabilities,
                    ),
                );
                info!(component_id = %id, component_type, "component registered");
            }
        }
        id
    }

    /// Remove a registration. Returns whether it existed.
    pub async fn unregister(&self, component_id: &str) -> bool {
        let existed = self.inner.lock().await.remove(component_id).is_some();
        if existed {
            info!(component_id, "component unregistered");
        }
        existed
    }

    /// Record a heartbeat and drain pending commands. `None` for an
    /// unknown component (the sensor should re-register).
    pub async fn heartbeat(
        &self,
        component_id: &str,
        state: ComponentState,
        error_message: Option<String>,
    ) -> Option<Vec<PendingCommand>> {
        let mut inner = self.inner.lock().await;
        let record = inner.get_mut(component_id)?;
        record.state = state;
        record.last_error = error_message;
        record.last_heartbeat_ms = gladys_core::now_ms();
        Some(record.take_pending())
    }

    /// Queue a command for delivery on the target's next heartbeat.
    /// Args pass through untouched.
    pub async fn queue_command(
        &self,
        target_id: &str,
        command: ComponentCommand,
        args: BTreeMap<String, String>,
    ) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let record = inner.get_mut(target_id)?;
        let pending = PendingCommand::new(command, args);
        let command_id = pending.command_id.clone();
        record.pending_commands.push(pending);
        debug!(target_id, command_id = %command_id, ?command, "command queued");
        Some(command_id)
    }

    /// Look up by id, or by type when no id is given.
    pub async fn resolve(
        &self,
        component_id: Option<&str>,
        component_type: Option<&str>,
    ) -> Vec<ComponentRecord> {
        let inner = self.inner.lock().await;
        if let Some(id) = component_id {
            return inner.get(id).cloned().into_iter().collect();
        }
        match component_type {
            Some(ty) => inner
                .values()
                .filter(|record| record.component_type == ty)
                .cloned()
                .collect(),
            None => inner.values().cloned().collect(),
        }
    }

    /// Mark components silent past the dead window. Returns newly dead ids.
    pub async fn mark_dead(&self) -> Vec<String> {
        let cutoff = gladys_core::now_ms() - self.dead_after.as_millis() as i64;
        let mut newly_dead = Vec::new();
        let mut inner = self.inner.lock().await;
        for record in inner.values_mut() {
            if record.state != ComponentState::Dead && record.last_heartbeat_ms < cutoff {
                record.state = ComponentState::Dead;
                warn!(component_id = %record.component_id, "component missed heartbeats; marked dead");
                newly_dead.push(record.component_id.clone());
            }
        }
        newly_dead
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
