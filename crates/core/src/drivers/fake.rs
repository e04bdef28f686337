//! Simulated driver interfaces.
//!
//! `FakeInterface` and `FakePower` back the `fake-hardware` hardware type.
//! They declare a realistic step catalog, record every call, and can be told
//! to run a step synchronously, hand it to the agent, or fail it.

use crate::drivers::base::{
    DriverError, DriverInterface, DriverResult, PowerInterface, StepOutcome,
};
use async_trait::async_trait;
use mk_protocol::{Node, PowerState, Step, StepInterface, StepPhase, StepSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a fake step does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Finish immediately.
    Sync,
    /// Hand the step to the agent and return `StepOutcome::Async`.
    Async,
    /// Fail with the given message.
    Fail(String),
}

/// A step call recorded by a fake interface or the fake power interface.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub node: Uuid,
    pub step: String,
}

/// Shared, ordered log of calls across every fake interface of a registry.
pub type CallLog = Arc<Mutex<Vec<FakeCall>>>;

/// In-memory driver interface with a fixed step catalog.
///
/// Out-of-band steps finish synchronously and in-band steps are handed to the
/// agent, unless overridden with [`FakeInterface::with_behavior`].
#[derive(Clone)]
pub struct FakeInterface {
    interface: StepInterface,
    behaviors: HashMap<String, FakeBehavior>,
    calls: CallLog,
}

impl FakeInterface {
    pub fn new(interface: StepInterface) -> Self {
        Self {
            interface,
            behaviors: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record calls into a log shared with other fakes.
    pub fn with_call_log(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }

    /// Override what `step` does when executed.
    pub fn with_behavior(mut self, step: &str, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(step.to_string(), behavior);
        self
    }

    /// Every step executed so far, in order.
    pub async fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().await.clone()
    }

    fn find_spec(&self, name: &str) -> Option<StepSpec> {
        [StepPhase::Clean, StepPhase::Deploy, StepPhase::Service]
            .into_iter()
            .flat_map(|phase| catalog(self.interface, phase))
            .find(|spec| spec.step == name)
    }
}

#[async_trait]
impl DriverInterface for FakeInterface {
    fn interface(&self) -> StepInterface {
        self.interface
    }

    fn steps(&self, phase: StepPhase) -> Vec<StepSpec> {
        catalog(self.interface, phase)
    }

    async fn execute_step(&self, node: &Node, step: &Step) -> DriverResult<StepOutcome> {
        let spec = self
            .find_spec(&step.step)
            .ok_or_else(|| DriverError::NotSupported(step.to_string()))?;

        self.calls.lock().await.push(FakeCall {
            node: node.uuid,
            step: step.to_string(),
        });

        let behavior = self.behaviors.get(&step.step).cloned().unwrap_or({
            if spec.requires_ramdisk {
                FakeBehavior::Async
            } else {
                FakeBehavior::Sync
            }
        });

        match behavior {
            FakeBehavior::Sync => Ok(StepOutcome::Done),
            FakeBehavior::Async => Ok(StepOutcome::Async),
            FakeBehavior::Fail(reason) => Err(DriverError::Execution(reason)),
        }
    }
}

/// Step catalog of the fake hardware type.
fn catalog(interface: StepInterface, phase: StepPhase) -> Vec<StepSpec> {
    use StepInterface::*;

    match (interface, phase) {
        (Deploy, StepPhase::Clean) => vec![
            StepSpec::new(Deploy, "erase_devices_metadata", 99)
                .in_band()
                .abortable(),
            StepSpec::new(Deploy, "erase_devices", 10)
                .in_band()
                .abortable(),
        ],
        (Deploy, StepPhase::Deploy) => vec![
            StepSpec::new(Deploy, "deploy", 100),
            StepSpec::new(Deploy, "write_image", 80).in_band(),
            StepSpec::new(Deploy, "prepare_instance_boot", 60),
        ],
        (Deploy, StepPhase::Service) => vec![StepSpec::new(Deploy, "write_image", 0).in_band()],
        (Raid, StepPhase::Clean) => vec![
            StepSpec::new(Raid, "delete_configuration", 0),
            StepSpec::new(Raid, "create_configuration", 0)
                .with_arg("create_root_volume", "Create the root volume", false)
                .with_arg("create_nonroot_volumes", "Create non-root volumes", false),
        ],
        (Raid, StepPhase::Deploy) | (Raid, StepPhase::Service) => vec![StepSpec::new(
            Raid,
            "apply_configuration",
            0,
        )
        .with_arg("raid_config", "Target RAID configuration", true)
        .with_arg("delete_existing", "Delete existing volumes first", false)],
        (Bios, StepPhase::Clean) => vec![
            StepSpec::new(Bios, "factory_reset", 0),
            StepSpec::new(Bios, "apply_configuration", 0)
                .with_arg("settings", "List of BIOS settings to apply", true),
        ],
        (Bios, StepPhase::Deploy) | (Bios, StepPhase::Service) => vec![StepSpec::new(
            Bios,
            "apply_configuration",
            0,
        )
        .with_arg("settings", "List of BIOS settings to apply", true)],
        (Management, StepPhase::Clean) | (Management, StepPhase::Service) => {
            vec![StepSpec::new(Management, "clear_job_queue", 0)]
        }
        _ => Vec::new(),
    }
}

/// In-memory power control.
#[derive(Clone, Default)]
pub struct FakePower {
    states: Arc<Mutex<HashMap<Uuid, PowerState>>>,
    calls: Option<CallLog>,
    unavailable: bool,
}

impl FakePower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Power control whose management controller never answers.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_call_log(mut self, calls: CallLog) -> Self {
        self.calls = Some(calls);
        self
    }

    async fn record(&self, node: &Node, action: &str) -> DriverResult<()> {
        if self.unavailable {
            return Err(DriverError::Unavailable(format!(
                "no response from BMC of node {}",
                node.ident()
            )));
        }
        if let Some(calls) = &self.calls {
            calls.lock().await.push(FakeCall {
                node: node.uuid,
                step: format!("power.{action}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PowerInterface for FakePower {
    async fn get_power_state(&self, node: &Node) -> DriverResult<PowerState> {
        if self.unavailable {
            return Err(DriverError::Unavailable(format!(
                "no response from BMC of node {}",
                node.ident()
            )));
        }
        let states = self.states.lock().await;
        Ok(states.get(&node.uuid).copied().unwrap_or(PowerState::Off))
    }

    async fn set_power_state(&self, node: &Node, state: PowerState) -> DriverResult<()> {
        let action = match state {
            PowerState::On => "power_on",
            PowerState::Off => "power_off",
            PowerState::Unknown => {
                return Err(DriverError::NotSupported("power.unknown".to_string()));
            }
        };
        self.record(node, action).await?;
        self.states.lock().await.insert(node.uuid, state);
        Ok(())
    }

    async fn reboot(&self, node: &Node) -> DriverResult<()> {
        self.record(node, "reboot").await?;
        self.states.lock().await.insert(node.uuid, PowerState::On);
        Ok(())
    }
}
