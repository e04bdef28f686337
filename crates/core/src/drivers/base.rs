//! Driver interface traits and supporting types.
//!
//! Hardware is opaque to the conductor: every interaction goes through a
//! [`DriverInterface`] (which declares and runs steps) or the node's
//! [`PowerInterface`] (used by the built-in power steps).

use async_trait::async_trait;
use mk_protocol::{Node, PowerState, Step, StepInterface, StepPhase, StepSpec};
use thiserror::Error;

/// How a driver step finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step completed while the conductor waited.
    Done,
    /// The step was handed to the ramdisk agent. Completion is reported by
    /// the next heartbeat.
    Async,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Step {0} is not supported by this driver")]
    NotSupported(String),
    #[error("Driver execution failed: {0}")]
    Execution(String),
    #[error("Management controller unavailable: {0}")]
    Unavailable(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// A driver interface (deploy, bios, raid, ...) bound to a hardware type.
#[async_trait]
pub trait DriverInterface: Send + Sync {
    /// The interface this implementation serves.
    fn interface(&self) -> StepInterface;

    /// Steps this interface offers for a phase.
    fn steps(&self, phase: StepPhase) -> Vec<StepSpec>;

    /// Run one step against the node.
    async fn execute_step(&self, node: &Node, step: &Step) -> DriverResult<StepOutcome>;
}

/// Power control used by the `power_on`, `power_off` and `reboot` steps.
#[async_trait]
pub trait PowerInterface: Send + Sync {
    async fn get_power_state(&self, node: &Node) -> DriverResult<PowerState>;

    async fn set_power_state(&self, node: &Node, state: PowerState) -> DriverResult<()>;

    async fn reboot(&self, node: &Node) -> DriverResult<()>;
}
