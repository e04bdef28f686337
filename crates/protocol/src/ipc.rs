//! Conductor event stream.
//!
//! The conductor publishes an [`Event`] for every provisioning state change
//! and every step status change. Subscribers (the API process, the CLI's
//! `serve` log sink, tests) consume them from a broadcast channel.
//!
//! Uses tagged enum serialization for TypeScript compatibility:
//! ```json
//! {
//!   "type": "provisionStateChanged",
//!   "payload": {
//!     "node_id": "uuid-here",
//!     "from": "available",
//!     "to": "deploying",
//!     "target": "active"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::node_models::ProvisionState;
use crate::step_models::{StepInterface, StepPhase, StepStatus};

/// Events sent from the conductor to observers.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A node moved between provisioning states.
    ProvisionStateChanged {
        #[ts(type = "string")]
        node_id: Uuid,
        from: ProvisionState,
        to: ProvisionState,
        target: Option<ProvisionState>,
    },

    /// A step changed status.
    StepStatusUpdate {
        #[ts(type = "string")]
        node_id: Uuid,
        phase: StepPhase,
        step_index: usize,
        interface: StepInterface,
        step: String,
        status: StepStatus,
    },

    /// A step was skipped because its priority is zero.
    StepSkipped {
        #[ts(type = "string")]
        node_id: Uuid,
        step_index: usize,
        step: String,
    },

    /// Work on a node failed and `last_error` was set.
    NodeFailed {
        #[ts(type = "string")]
        node_id: Uuid,
        state: ProvisionState,
        error: String,
    },

    /// A heartbeat arrived from the ramdisk agent.
    HeartbeatReceived {
        #[ts(type = "string")]
        node_id: Uuid,
        agent_url: String,
    },

    /// A stale reservation was cleared during startup reconciliation.
    ReservationCleared {
        #[ts(type = "string")]
        node_id: Uuid,
        host: String,
    },
}

impl Event {
    /// The node the event refers to.
    pub fn node_id(&self) -> Uuid {
        match self {
            Event::ProvisionStateChanged { node_id, .. }
            | Event::StepStatusUpdate { node_id, .. }
            | Event::StepSkipped { node_id, .. }
            | Event::NodeFailed { node_id, .. }
            | Event::HeartbeatReceived { node_id, .. }
            | Event::ReservationCleared { node_id, .. } => *node_id,
        }
    }
}
