//! Driver factory for building registries from configuration.

use crate::drivers::fake::{CallLog, FakeInterface, FakePower};
use crate::drivers::registry::DriverRegistry;
use anyhow::{bail, Result};
use mk_protocol::config_models::ConductorConfig;
use mk_protocol::StepInterface;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Factory for creating driver registries based on configuration.
///
/// The factory maps `hardware_type` to a set of interface implementations.
pub struct DriverFactory;

impl DriverFactory {
    /// Create the registry for `config.hardware_type`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown hardware type or when an enabled
    /// interface has no implementation.
    ///
    /// # Examples
    ///
    /// ```
    /// use mk_core::drivers::DriverFactory;
    /// use mk_protocol::config_models::ConductorConfig;
    ///
    /// let registry = DriverFactory::create(&ConductorConfig::default()).unwrap();
    /// assert_eq!(registry.list_interfaces().len(), 5);
    /// ```
    pub fn create(config: &ConductorConfig) -> Result<DriverRegistry> {
        match config.hardware_type.as_str() {
            "fake-hardware" => {
                let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
                let power = FakePower::new().with_call_log(calls.clone());
                let mut registry = DriverRegistry::new(Arc::new(power))
                    .with_enabled(config.enabled_interfaces.clone());
                for interface in StepInterface::ALL {
                    let fake = FakeInterface::new(interface).with_call_log(calls.clone());
                    registry = registry.with_interface(Arc::new(fake));
                }
                Ok(registry)
            }
            other => bail!(
                "Unknown hardware type '{other}'. Supported hardware types: fake-hardware"
            ),
        }
    }
}
