//! Node provisioning state.
//!
//! This module provides:
//! - The provisioning state transition table
//! - Helpers that apply transitions to node records and emit events

pub mod machine;
pub mod node;

pub use machine::{is_deletable, next_state, target_for, ProvisionEvent};
