//! Node lifecycle helpers.
//!
//! These functions mutate a `Node` in memory and publish the matching
//! events. Persisting the result is left to the caller, which always writes
//! the node back to the store before starting the work the new state
//! describes.

use crate::state::machine::{next_state, target_for, ProvisionEvent};
use crate::error::{ConductorError, ConductorResult};
use chrono::Utc;
use mk_protocol::ipc::Event;
use mk_protocol::{CreateNodeRequest, HistoryEntry, Node, PowerState, ProvisionState};
use tokio::sync::broadcast::Sender;
use uuid::Uuid;

/// Create a new node record in the `enroll` state.
pub fn create_node(request: CreateNodeRequest) -> Node {
    Node {
        uuid: Uuid::new_v4(),
        name: request.name,
        provision_state: ProvisionState::Enroll,
        target_provision_state: None,
        reservation: None,
        last_error: None,
        maintenance: false,
        maintenance_reason: None,
        power_state: PowerState::Unknown,
        parent_node: request.parent_node,
        traits: request.traits,
        owner: request.owner,
        conductor_group: request.conductor_group.unwrap_or_default(),
        shard: request.shard,
        driver_internal_info: Default::default(),
        provision_updated_at: Utc::now(),
        history: Vec::new(),
    }
}

/// Apply `event` to the node and emit a `ProvisionStateChanged` event.
///
/// Operator verbs set `target_provision_state`; reaching a stable state
/// clears it.
///
/// # Errors
///
/// Returns `ConductorError::InvalidState` if the transition is not allowed.
/// The node is left untouched in that case.
pub fn transition(
    node: &mut Node,
    event: ProvisionEvent,
    events_tx: &Sender<Event>,
) -> ConductorResult<ProvisionState> {
    let from = node.provision_state;
    let to = next_state(&node.ident(), from, event, node.target_provision_state)?;

    if let Some(target) = target_for(from, event) {
        node.target_provision_state = Some(target);
    }
    if to.is_stable() {
        node.target_provision_state = None;
    }

    node.provision_state = to;
    node.provision_updated_at = Utc::now();

    tracing::debug!(node = %node.uuid, %from, %to, %event, "provision state changed");
    let _ = events_tx.send(Event::ProvisionStateChanged {
        node_id: node.uuid,
        from,
        to,
        target: node.target_provision_state,
    });

    Ok(to)
}

/// Move the node to the failure state of its current state.
///
/// Sets `last_error`, appends an error history entry, drops the in-progress
/// step list and emits `NodeFailed`.
///
/// # Errors
///
/// Returns `ConductorError::InvalidState` if the current state has no
/// failure state (for example, a stable state).
pub fn fail_node(
    node: &mut Node,
    error: &str,
    conductor: &str,
    max_history: usize,
    events_tx: &Sender<Event>,
) -> ConductorResult<ProvisionState> {
    let from = node.provision_state;
    let to = from
        .failure_state()
        .ok_or_else(|| ConductorError::invalid_state(node.ident(), from, "fail"))?;

    node.provision_state = to;
    node.target_provision_state = None;
    node.provision_updated_at = Utc::now();
    node.last_error = Some(error.to_string());
    node.driver_internal_info.clear_steps();
    record_history(node, error, "provisioning", "ERROR", conductor, max_history);

    tracing::warn!(node = %node.uuid, %from, %to, error, "node failed");
    let _ = events_tx.send(Event::ProvisionStateChanged {
        node_id: node.uuid,
        from,
        to,
        target: None,
    });
    let _ = events_tx.send(Event::NodeFailed {
        node_id: node.uuid,
        state: to,
        error: error.to_string(),
    });

    Ok(to)
}

/// Append an entry to the node history, keeping at most `max_entries`.
pub fn record_history(
    node: &mut Node,
    event: &str,
    event_type: &str,
    severity: &str,
    conductor: &str,
    max_entries: usize,
) {
    node.history.push(HistoryEntry {
        uuid: Uuid::new_v4(),
        event: event.to_string(),
        event_type: event_type.to_string(),
        severity: severity.to_string(),
        conductor: conductor.to_string(),
        created_at: Utc::now(),
    });

    if node.history.len() > max_entries {
        let excess = node.history.len() - max_entries;
        node.history.drain(..excess);
    }
}
