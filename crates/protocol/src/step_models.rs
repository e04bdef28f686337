//! Step models shared by cleaning, deployment and servicing.
//!
//! A step is a named unit of work owned by one driver interface. Drivers
//! declare what they can do as [`StepSpec`]s; requests, runbooks and deploy
//! templates refer to them with [`Step`] entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use ts_rs::TS;

/// Driver interface that owns a step.
///
/// Serialized in lowercase to match the step JSON format:
/// `{"interface": "raid", "step": "create_configuration", ...}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, TS)]
#[serde(rename_all = "lowercase")]
pub enum StepInterface {
    Power,
    Management,
    Deploy,
    Bios,
    Raid,
}

impl StepInterface {
    /// All interfaces, in declaration order.
    pub const ALL: [StepInterface; 5] = [
        StepInterface::Power,
        StepInterface::Management,
        StepInterface::Deploy,
        StepInterface::Bios,
        StepInterface::Raid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepInterface::Power => "power",
            StepInterface::Management => "management",
            StepInterface::Deploy => "deploy",
            StepInterface::Bios => "bios",
            StepInterface::Raid => "raid",
        }
    }
}

impl fmt::Display for StepInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provisioning phase a step list belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Clean,
    Deploy,
    Service,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Clean => "clean",
            StepPhase::Deploy => "deploy",
            StepPhase::Service => "service",
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step entry in a request, runbook, deploy template, or the
/// in-progress list stored on a node.
///
/// # Example
///
/// ```json
/// {"interface": "raid", "step": "create_configuration", "args": {}, "priority": 20}
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct Step {
    /// Interface that implements the step.
    pub interface: StepInterface,

    /// Step name, unique within its interface.
    pub step: String,

    /// Keyword arguments passed to the step.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[ts(type = "Record<string, unknown>")]
    pub args: Map<String, Value>,

    /// Execution priority, higher runs first.
    ///
    /// `None` for manually requested steps, which run in the order given.
    /// `Some(0)` disables the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Position of the step inside a runbook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,

    /// Run this step against the node's child nodes instead of the node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub execute_on_child_nodes: bool,

    /// Restrict child execution to these child node UUIDs or names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_child_node_execution: Option<Vec<String>>,
}

impl Step {
    pub fn new(interface: StepInterface, step: impl Into<String>) -> Self {
        Self {
            interface,
            step: step.into(),
            args: Map::new(),
            priority: None,
            order: None,
            execute_on_child_nodes: false,
            limit_child_node_execution: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn on_child_nodes(mut self, limit: Option<Vec<String>>) -> Self {
        self.execute_on_child_nodes = true;
        self.limit_child_node_execution = limit;
        self
    }

    /// The `(interface, step)` identity used for uniqueness and overrides.
    pub fn key(&self) -> (StepInterface, &str) {
        (self.interface, self.step.as_str())
    }

    /// Whether the step is disabled by an explicit zero priority.
    pub fn is_disabled(&self) -> bool {
        self.priority == Some(0)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface, self.step)
    }
}

/// Describes one argument accepted by a driver step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
pub struct ArgInfo {
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// A step as declared by a driver interface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct StepSpec {
    pub interface: StepInterface,
    pub step: String,

    /// Default priority. Zero means the step only runs when requested.
    pub priority: i32,

    /// Whether the step may be aborted while the node waits on it.
    #[serde(default)]
    pub abortable: bool,

    /// In-band steps run inside the ramdisk agent and finish on heartbeat.
    #[serde(default)]
    pub requires_ramdisk: bool,

    #[serde(default)]
    pub argsinfo: HashMap<String, ArgInfo>,
}

impl StepSpec {
    pub fn new(interface: StepInterface, step: impl Into<String>, priority: i32) -> Self {
        Self {
            interface,
            step: step.into(),
            priority,
            abortable: false,
            requires_ramdisk: false,
            argsinfo: HashMap::new(),
        }
    }

    pub fn in_band(mut self) -> Self {
        self.requires_ramdisk = true;
        self
    }

    pub fn abortable(mut self) -> Self {
        self.abortable = true;
        self
    }

    pub fn with_arg(mut self, name: &str, description: &str, required: bool) -> Self {
        self.argsinfo.insert(
            name.to_string(),
            ArgInfo {
                description: description.to_string(),
                required,
            },
        );
        self
    }

    /// Build the default step entry for this spec.
    pub fn to_step(&self) -> Step {
        Step::new(self.interface, self.step.clone()).with_priority(self.priority)
    }
}

/// Lifecycle of a single step inside an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Held,
}
