//! Bare-metal node models.
//!
//! This module defines the node record tracked by the conductor, its
//! provisioning state, and the bookkeeping used while steps are in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::step_models::{Step, StepPhase};

/// Provisioning state of a node.
///
/// States ending in "-ing" mean a conductor is actively working on the node.
/// States containing "wait" mean the node is waiting for an agent heartbeat.
/// "hold" states are paused by a `hold` step until an operator unholds them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
pub enum ProvisionState {
    #[serde(rename = "enroll")]
    Enroll,
    #[serde(rename = "verifying")]
    Verifying,
    #[serde(rename = "manageable")]
    Manageable,
    #[serde(rename = "available")]
    Available,

    #[serde(rename = "cleaning")]
    Cleaning,
    #[serde(rename = "clean wait")]
    CleanWait,
    #[serde(rename = "clean hold")]
    CleanHold,
    #[serde(rename = "clean failed")]
    CleanFailed,

    #[serde(rename = "deploying")]
    Deploying,
    #[serde(rename = "wait call-back")]
    DeployWait,
    #[serde(rename = "deploy hold")]
    DeployHold,
    #[serde(rename = "deploy failed")]
    DeployFailed,
    #[serde(rename = "active")]
    Active,

    #[serde(rename = "deleting")]
    Deleting,
    #[serde(rename = "error")]
    Error,

    #[serde(rename = "adopting")]
    Adopting,
    #[serde(rename = "adopt failed")]
    AdoptFailed,

    #[serde(rename = "rescuing")]
    Rescuing,
    #[serde(rename = "rescue wait")]
    RescueWait,
    #[serde(rename = "rescue failed")]
    RescueFailed,
    #[serde(rename = "rescue")]
    Rescue,
    #[serde(rename = "unrescuing")]
    Unrescuing,
    #[serde(rename = "unrescue failed")]
    UnrescueFailed,

    #[serde(rename = "servicing")]
    Servicing,
    #[serde(rename = "service wait")]
    ServiceWait,
    #[serde(rename = "service hold")]
    ServiceHold,
    #[serde(rename = "service failed")]
    ServiceFailed,
}

impl ProvisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionState::Enroll => "enroll",
            ProvisionState::Verifying => "verifying",
            ProvisionState::Manageable => "manageable",
            ProvisionState::Available => "available",
            ProvisionState::Cleaning => "cleaning",
            ProvisionState::CleanWait => "clean wait",
            ProvisionState::CleanHold => "clean hold",
            ProvisionState::CleanFailed => "clean failed",
            ProvisionState::Deploying => "deploying",
            ProvisionState::DeployWait => "wait call-back",
            ProvisionState::DeployHold => "deploy hold",
            ProvisionState::DeployFailed => "deploy failed",
            ProvisionState::Active => "active",
            ProvisionState::Deleting => "deleting",
            ProvisionState::Error => "error",
            ProvisionState::Adopting => "adopting",
            ProvisionState::AdoptFailed => "adopt failed",
            ProvisionState::Rescuing => "rescuing",
            ProvisionState::RescueWait => "rescue wait",
            ProvisionState::RescueFailed => "rescue failed",
            ProvisionState::Rescue => "rescue",
            ProvisionState::Unrescuing => "unrescuing",
            ProvisionState::UnrescueFailed => "unrescue failed",
            ProvisionState::Servicing => "servicing",
            ProvisionState::ServiceWait => "service wait",
            ProvisionState::ServiceHold => "service hold",
            ProvisionState::ServiceFailed => "service failed",
        }
    }

    /// A conductor is actively working on the node.
    pub fn is_active_work(&self) -> bool {
        matches!(
            self,
            ProvisionState::Verifying
                | ProvisionState::Cleaning
                | ProvisionState::Deploying
                | ProvisionState::Deleting
                | ProvisionState::Adopting
                | ProvisionState::Rescuing
                | ProvisionState::Unrescuing
                | ProvisionState::Servicing
        )
    }

    /// The node is waiting for an agent callback.
    pub fn is_wait(&self) -> bool {
        matches!(
            self,
            ProvisionState::CleanWait
                | ProvisionState::DeployWait
                | ProvisionState::RescueWait
                | ProvisionState::ServiceWait
        )
    }

    /// The node is paused by a `hold` step.
    pub fn is_hold(&self) -> bool {
        matches!(
            self,
            ProvisionState::CleanHold | ProvisionState::DeployHold | ProvisionState::ServiceHold
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ProvisionState::CleanFailed
                | ProvisionState::DeployFailed
                | ProvisionState::AdoptFailed
                | ProvisionState::RescueFailed
                | ProvisionState::UnrescueFailed
                | ProvisionState::ServiceFailed
        )
    }

    /// States in which the node rests until an operator acts on it.
    pub fn is_stable(&self) -> bool {
        self.is_failed()
            || matches!(
                self,
                ProvisionState::Enroll
                    | ProvisionState::Manageable
                    | ProvisionState::Available
                    | ProvisionState::Active
                    | ProvisionState::Rescue
                    | ProvisionState::Error
            )
    }

    /// Where the node lands if work in this state fails or times out.
    pub fn failure_state(&self) -> Option<ProvisionState> {
        match self {
            ProvisionState::Verifying => Some(ProvisionState::Enroll),
            ProvisionState::Cleaning | ProvisionState::CleanWait => {
                Some(ProvisionState::CleanFailed)
            }
            ProvisionState::Deploying | ProvisionState::DeployWait => {
                Some(ProvisionState::DeployFailed)
            }
            ProvisionState::Deleting => Some(ProvisionState::Error),
            ProvisionState::Adopting => Some(ProvisionState::AdoptFailed),
            ProvisionState::Rescuing | ProvisionState::RescueWait => {
                Some(ProvisionState::RescueFailed)
            }
            ProvisionState::Unrescuing => Some(ProvisionState::UnrescueFailed),
            ProvisionState::Servicing | ProvisionState::ServiceWait => {
                Some(ProvisionState::ServiceFailed)
            }
            _ => None,
        }
    }

    /// The step phase driven from this state, if any.
    pub fn phase(&self) -> Option<StepPhase> {
        match self {
            ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::CleanHold
            | ProvisionState::CleanFailed => Some(StepPhase::Clean),
            ProvisionState::Deploying
            | ProvisionState::DeployWait
            | ProvisionState::DeployHold
            | ProvisionState::DeployFailed => Some(StepPhase::Deploy),
            ProvisionState::Servicing
            | ProvisionState::ServiceWait
            | ProvisionState::ServiceHold
            | ProvisionState::ServiceFailed => Some(StepPhase::Service),
            _ => None,
        }
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known power state of a node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    #[default]
    Unknown,
}

/// Conductor bookkeeping for in-flight work.
///
/// Persisted with the node so a heartbeat handled by any conductor can pick
/// up where the previous one stopped.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct DriverInternalInfo {
    /// Ordered step list of the phase in progress.
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Phase the step list belongs to.
    #[serde(default)]
    pub step_phase: Option<StepPhase>,

    /// Index of the step most recently started.
    #[serde(default)]
    pub step_index: Option<usize>,

    /// Callback URL reported by the ramdisk agent.
    #[serde(default)]
    pub agent_url: Option<String>,

    #[serde(default)]
    #[ts(type = "string | null")]
    pub agent_last_heartbeat: Option<DateTime<Utc>>,
}

impl DriverInternalInfo {
    /// The step most recently started, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.step_index.and_then(|index| self.steps.get(index))
    }

    pub fn clear_steps(&mut self) {
        self.steps.clear();
        self.step_phase = None;
        self.step_index = None;
    }
}

/// A single entry in a node's event history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct HistoryEntry {
    #[ts(type = "string")]
    pub uuid: Uuid,
    pub event: String,
    pub event_type: String,
    pub severity: String,
    pub conductor: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// A bare-metal node managed by the conductor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct Node {
    #[ts(type = "string")]
    pub uuid: Uuid,

    #[serde(default)]
    pub name: Option<String>,

    pub provision_state: ProvisionState,

    /// State the current operation is heading for.
    #[serde(default)]
    pub target_provision_state: Option<ProvisionState>,

    /// Conductor host holding the exclusive lock on this node.
    #[serde(default)]
    pub reservation: Option<String>,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub maintenance: bool,

    #[serde(default)]
    pub maintenance_reason: Option<String>,

    #[serde(default)]
    pub power_state: PowerState,

    /// Parent of composite hardware, such as a DPU inside a host.
    #[serde(default)]
    #[ts(type = "string | null")]
    pub parent_node: Option<Uuid>,

    /// Traits used to match runbooks and deploy templates.
    #[serde(default)]
    pub traits: Vec<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub conductor_group: String,

    #[serde(default)]
    pub shard: Option<String>,

    #[serde(default)]
    pub driver_internal_info: DriverInternalInfo,

    /// When `provision_state` last changed. Callback timeouts count from here.
    #[ts(type = "string")]
    pub provision_updated_at: DateTime<Utc>,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Node {
    /// Display name: the node name when set, else its UUID.
    pub fn ident(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.uuid.to_string())
    }
}
