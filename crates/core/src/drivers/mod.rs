//! Driver abstraction and management.
//!
//! This module provides the `DriverInterface` and `PowerInterface` traits,
//! the simulated `fake-hardware` implementations, and the `DriverRegistry`
//! the conductor queries for steps.

pub mod base;
pub mod factory;
pub mod fake;
pub mod registry;

pub use base::{DriverError, DriverInterface, DriverResult, PowerInterface, StepOutcome};
pub use factory::DriverFactory;
pub use fake::{FakeBehavior, FakeInterface, FakePower};
pub use registry::DriverRegistry;
