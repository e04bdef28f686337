//! Driver registry for a hardware type.
//!
//! The `DriverRegistry` is responsible for:
//! - Holding one implementation per driver interface
//! - Filtering interfaces by the `enabled_interfaces` setting
//! - Answering step catalog lookups for the collector and the executor

use crate::drivers::base::{DriverInterface, PowerInterface};
use mk_protocol::{Step, StepInterface, StepPhase, StepSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Manages the driver interfaces available to the conductor.
#[derive(Clone)]
pub struct DriverRegistry {
    interfaces: HashMap<StepInterface, Arc<dyn DriverInterface>>,
    power: Arc<dyn PowerInterface>,
    enabled: Vec<StepInterface>,
}

impl DriverRegistry {
    /// Create a registry with only the power interface.
    ///
    /// Every interface is enabled; use [`DriverRegistry::with_enabled`] to
    /// restrict them.
    pub fn new(power: Arc<dyn PowerInterface>) -> Self {
        Self {
            interfaces: HashMap::new(),
            power,
            enabled: StepInterface::ALL.to_vec(),
        }
    }

    /// Register an interface implementation, replacing any previous one.
    pub fn with_interface(mut self, interface: Arc<dyn DriverInterface>) -> Self {
        self.interfaces.insert(interface.interface(), interface);
        self
    }

    pub fn with_enabled(mut self, enabled: Vec<StepInterface>) -> Self {
        self.enabled = enabled;
        self
    }

    /// Get an enabled interface.
    pub fn get(&self, interface: StepInterface) -> Option<Arc<dyn DriverInterface>> {
        if !self.is_enabled(interface) {
            return None;
        }
        self.interfaces.get(&interface).cloned()
    }

    pub fn power(&self) -> Arc<dyn PowerInterface> {
        Arc::clone(&self.power)
    }

    pub fn is_enabled(&self, interface: StepInterface) -> bool {
        self.enabled.contains(&interface)
    }

    /// All step specs of every enabled interface for a phase.
    ///
    /// Returned in `StepInterface::ALL` order so results are deterministic.
    pub fn step_specs(&self, phase: StepPhase) -> Vec<StepSpec> {
        StepInterface::ALL
            .iter()
            .filter_map(|interface| self.get(*interface))
            .flat_map(|driver| driver.steps(phase))
            .collect()
    }

    /// Find the spec matching a step entry in a phase.
    pub fn find_spec(&self, phase: StepPhase, step: &Step) -> Option<StepSpec> {
        let driver = self.get(step.interface)?;
        driver
            .steps(phase)
            .into_iter()
            .find(|spec| spec.step == step.step)
    }

    /// Interfaces that have an implementation and are enabled.
    pub fn list_interfaces(&self) -> Vec<StepInterface> {
        StepInterface::ALL
            .into_iter()
            .filter(|i| self.interfaces.contains_key(i) && self.is_enabled(*i))
            .collect()
    }
}
