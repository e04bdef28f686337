//! Conductor configuration models for `.metal-kit/conductor.toml`.
//!
//! Every option has a default so an empty or missing file yields a working
//! single-conductor setup.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use ts_rs::TS;

use crate::node_models::ProvisionState;
use crate::step_models::StepInterface;

/// Represents conductor settings from `.metal-kit/conductor.toml`.
///
/// # Example
///
/// ```toml
/// host = "conductor-1"
/// conductor_group = "rack-a"
/// automated_clean = true
/// clean_callback_timeout = 1800
/// enabled_interfaces = ["power", "management", "deploy", "bios", "raid"]
///
/// [step_priority_overrides]
/// "deploy.erase_devices" = 0
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ConductorConfig {
    /// Name this conductor uses for reservations.
    #[serde(default = "default_host")]
    pub host: String,

    /// Conductor group this conductor serves. Nodes only map to conductors
    /// in their own group; the empty string is the default group.
    #[serde(default)]
    pub conductor_group: String,

    /// Address the REST API listens on.
    #[serde(default = "default_api_bind")]
    pub api_bind: String,

    /// Hardware type used to build the driver interfaces.
    #[serde(default = "default_hardware_type")]
    pub hardware_type: String,

    /// Interfaces whose steps are collected and executed.
    #[serde(default = "default_enabled_interfaces")]
    pub enabled_interfaces: Vec<StepInterface>,

    /// Run automated cleaning on `provide` and after undeploy.
    #[serde(default = "default_true")]
    pub automated_clean: bool,

    /// Seconds a node may stay in `clean wait`. Zero disables the timeout.
    #[serde(default = "default_callback_timeout")]
    pub clean_callback_timeout: u64,

    /// Seconds a node may stay in `wait call-back`.
    #[serde(default = "default_callback_timeout")]
    pub deploy_callback_timeout: u64,

    /// Seconds a node may stay in `service wait`.
    #[serde(default = "default_callback_timeout")]
    pub service_callback_timeout: u64,

    /// Seconds a node may stay in `rescue wait`.
    #[serde(default = "default_callback_timeout")]
    pub rescue_callback_timeout: u64,

    /// Interval in seconds between callback timeout checks.
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Extra attempts to acquire a lock held by another conductor.
    #[serde(default = "default_retry_attempts")]
    pub node_locked_retry_attempts: u32,

    /// Seconds between lock attempts.
    #[serde(default = "default_retry_interval")]
    pub node_locked_retry_interval: u64,

    /// Priority overrides for driver steps, keyed by `interface.step`.
    #[serde(default)]
    pub step_priority_overrides: HashMap<String, i32>,

    /// Each conductor owns `2^hash_partition_exponent` points on the ring.
    #[serde(default = "default_partition_exponent")]
    pub hash_partition_exponent: u32,

    /// Number of conductors mapped to each node.
    #[serde(default = "default_replicas")]
    pub hash_distribution_replicas: usize,

    /// Seconds between hash ring rebuilds.
    #[serde(default = "default_ring_reset_interval")]
    pub hash_ring_reset_interval: u64,

    /// History entries kept per node; older entries are dropped.
    #[serde(default = "default_max_history")]
    pub max_history_entries: usize,
}

impl ConductorConfig {
    /// Callback timeout in seconds for a wait state, `None` if the state has
    /// no timeout or it is disabled.
    pub fn callback_timeout(&self, state: ProvisionState) -> Option<u64> {
        let timeout = match state {
            ProvisionState::CleanWait => self.clean_callback_timeout,
            ProvisionState::DeployWait => self.deploy_callback_timeout,
            ProvisionState::ServiceWait => self.service_callback_timeout,
            ProvisionState::RescueWait => self.rescue_callback_timeout,
            _ => 0,
        };
        (timeout > 0).then_some(timeout)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            conductor_group: String::new(),
            api_bind: default_api_bind(),
            hardware_type: default_hardware_type(),
            enabled_interfaces: default_enabled_interfaces(),
            automated_clean: true,
            clean_callback_timeout: default_callback_timeout(),
            deploy_callback_timeout: default_callback_timeout(),
            service_callback_timeout: default_callback_timeout(),
            rescue_callback_timeout: default_callback_timeout(),
            sync_interval: default_sync_interval(),
            node_locked_retry_attempts: default_retry_attempts(),
            node_locked_retry_interval: default_retry_interval(),
            step_priority_overrides: HashMap::new(),
            hash_partition_exponent: default_partition_exponent(),
            hash_distribution_replicas: default_replicas(),
            hash_ring_reset_interval: default_ring_reset_interval(),
            max_history_entries: default_max_history(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_api_bind() -> String {
    "127.0.0.1:6385".to_string()
}

fn default_hardware_type() -> String {
    "fake-hardware".to_string()
}

fn default_enabled_interfaces() -> Vec<StepInterface> {
    StepInterface::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_callback_timeout() -> u64 {
    1800
}

fn default_sync_interval() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    1
}

fn default_partition_exponent() -> u32 {
    5
}

fn default_replicas() -> usize {
    1
}

fn default_ring_reset_interval() -> u64 {
    15
}

fn default_max_history() -> usize {
    300
}
