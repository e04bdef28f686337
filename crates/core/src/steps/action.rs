//! Built-in step resolution.
//!
//! A handful of step names are handled by the conductor itself whatever
//! interface they are declared under. They are resolved once into a
//! [`StepAction`] so execution dispatches with a `match`.

use mk_protocol::{Step, StepInterface};

/// Step names handled by the conductor.
pub const RESERVED_STEP_NAMES: [&str; 5] = ["hold", "wait", "power_on", "power_off", "reboot"];

/// What executing a step means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Pause the node in the phase's hold state until unhold.
    Hold,
    /// Sleep for `seconds`.
    Wait { seconds: u64 },
    PowerOn,
    PowerOff,
    Reboot,
    /// Delegate to a driver interface.
    Interface {
        interface: StepInterface,
        name: String,
    },
}

impl StepAction {
    /// Resolve a step entry into an action.
    pub fn resolve(step: &Step) -> Self {
        match step.step.as_str() {
            "hold" => StepAction::Hold,
            "wait" => StepAction::Wait {
                seconds: step
                    .args
                    .get("seconds")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0),
            },
            "power_on" => StepAction::PowerOn,
            "power_off" => StepAction::PowerOff,
            "reboot" => StepAction::Reboot,
            name => StepAction::Interface {
                interface: step.interface,
                name: name.to_string(),
            },
        }
    }

    /// Whether the action may run against child nodes.
    pub fn supports_child_nodes(&self) -> bool {
        matches!(
            self,
            StepAction::Wait { .. } | StepAction::PowerOn | StepAction::PowerOff | StepAction::Reboot
        )
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, StepAction::Interface { .. })
    }
}

/// Whether a step name is handled by the conductor instead of a driver.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_STEP_NAMES.contains(&name)
}
