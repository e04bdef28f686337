//! REST request and response bodies.
//!
//! These mirror the provisioning API:
//! `PUT /v1/nodes/{id}/states/provision` with a [`ProvisionRequest`] body,
//! and the unauthenticated `POST /v1/heartbeat/{id}` used by the ramdisk.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::step_models::Step;

/// Provisioning verb carried in the `target` field of a provision request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionVerb {
    Manage,
    Provide,
    Clean,
    /// Deploy the node. Sent as `"active"`.
    #[serde(rename = "active")]
    Deploy,
    Rebuild,
    /// Tear down a deployment. Sent as `"deleted"`.
    #[serde(rename = "deleted")]
    Undeploy,
    Rescue,
    Unrescue,
    Adopt,
    Service,
    Abort,
    Unhold,
}

impl ProvisionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionVerb::Manage => "manage",
            ProvisionVerb::Provide => "provide",
            ProvisionVerb::Clean => "clean",
            ProvisionVerb::Deploy => "active",
            ProvisionVerb::Rebuild => "rebuild",
            ProvisionVerb::Undeploy => "deleted",
            ProvisionVerb::Rescue => "rescue",
            ProvisionVerb::Unrescue => "unrescue",
            ProvisionVerb::Adopt => "adopt",
            ProvisionVerb::Service => "service",
            ProvisionVerb::Abort => "abort",
            ProvisionVerb::Unhold => "unhold",
        }
    }
}

impl fmt::Display for ProvisionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `PUT /v1/nodes/{id}/states/provision`.
///
/// ```json
/// {
///   "target": "clean",
///   "clean_steps": [
///     {"interface": "deploy", "step": "erase_devices_metadata"}
///   ]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ProvisionRequest {
    pub target: ProvisionVerb,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<Step>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_steps: Option<Vec<Step>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_steps: Option<Vec<Step>>,

    /// Runbook name or UUID to use instead of explicit steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runbook: Option<String>,
}

impl ProvisionRequest {
    pub fn new(target: ProvisionVerb) -> Self {
        Self {
            target,
            clean_steps: None,
            deploy_steps: None,
            service_steps: None,
            runbook: None,
        }
    }

    pub fn with_clean_steps(mut self, steps: Vec<Step>) -> Self {
        self.clean_steps = Some(steps);
        self
    }

    pub fn with_deploy_steps(mut self, steps: Vec<Step>) -> Self {
        self.deploy_steps = Some(steps);
        self
    }

    pub fn with_service_steps(mut self, steps: Vec<Step>) -> Self {
        self.service_steps = Some(steps);
        self
    }

    pub fn with_runbook(mut self, runbook: impl Into<String>) -> Self {
        self.runbook = Some(runbook.into());
        self
    }
}

/// Outcome of the in-band step the agent was running.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepResult {
    Succeeded,
    Failed { error: String },
}

/// Body of `POST /v1/heartbeat/{id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct HeartbeatRequest {
    pub agent_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_result: Option<StepResult>,
}

/// Body of `POST /v1/nodes`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, TS)]
pub struct CreateNodeRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    #[ts(type = "string | null")]
    pub parent_node: Option<Uuid>,

    #[serde(default)]
    pub traits: Vec<String>,

    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub conductor_group: Option<String>,

    #[serde(default)]
    pub shard: Option<String>,
}

/// Body of `PATCH /v1/nodes/{id}/maintenance`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct MaintenanceRequest {
    pub maintenance: bool,

    #[serde(default)]
    pub reason: Option<String>,
}

/// JSON error body returned by the API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
