//! Runtime records for registered sensors and subsystems.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state reported on heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    #[default]
    Unknown,
    Starting,
    Active,
    Paused,
    Stopping,
    Stopped,
    Error,
    /// Assigned by the heartbeat scanner, never self-reported.
    Dead,
}

/// How a component ships events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Event,
    Streaming,
    Batched,
}

/// Commands deliverable over the heartbeat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentCommand {
    Start,
    Stop,
    Pause,
    Resume,
    Reload,
    HealthCheck,
    Recover,
}

/// Declared capabilities of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCapabilities {
    pub transport_mode: TransportMode,
    pub supported_commands: Vec<ComponentCommand>,
    /// "single" or "multi".
    pub instance_policy: String,
}

/// A command queued for delivery on the target's next heartbeat.
///
/// Args pass through verbatim: the orchestrator never inspects,
/// re-types, or re-orders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command_id: String,
    pub command: ComponentCommand,
    pub args: BTreeMap<String, String>,
}

impl PendingCommand {
    #[must_use]
    pub fn new(command: ComponentCommand, args: BTreeMap<String, String>) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            command,
            args,
        }
    }
}

/// Registry entry for a live component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub component_id: String,
    pub component_type: String,
    pub address: String,
    pub capabilities: ComponentCapabilities,
    pub state: ComponentState,
    pub last_error: Option<String>,
    pub last_heartbeat_ms: i64,
    pub registered_at_ms: i64,
    /// Commands awaiting the next heartbeat, oldest first.
    pub pending_commands: Vec<PendingCommand>,
}

impl ComponentRecord {
    #[must_use]
    pub fn new(
        component_id: String,
        component_type: String,
        address: String,
        capabilities: ComponentCapabilities,
    ) -> Self {
        let now = crate::now_ms();
        Self {
            component_id,
            component_type,
            address,
            capabilities,
            state: ComponentState::Starting,
            last_error: None,
            last_heartbeat_ms: now,
            registered_at_ms: now,
            pending_commands: Vec::new(),
        }
    }

    /// Drain every pending command, oldest first.
    pub fn take_pending(&mut self) -> Vec<PendingCommand> {
        std::mem::take(&mut self.pending_commands)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pending_drains_in_order() {
        let mut record = ComponentRecord::new(
            "sensor-1".to_string(),
            "sensor".to_string(),
            "http://localhost:7001".to_string(),
            ComponentCapabilities::default(),
        );
        let mut args = BTreeMap::new();
        args.insert("dry_run".to_string(), "true".to_string());
        record
            .pending_commands
            .push(PendingCommand::new(ComponentCommand::Pause, args.clone()));
        record
            .pending_commands
            .push(PendingCommand::new(ComponentCommand::Resume, BTreeMap::new()));

        let drained = record.take_pending();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].command, ComponentCommand::Pause);
        assert_eq!(drained[0].args, args);
        assert_eq!(drained[1].command, ComponentCommand::Resume);
        assert!(record.pending_commands.is_empty());
    }
}
