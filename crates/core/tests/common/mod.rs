//! Common test utilities shared by the integration tests.
//!
//! This module provides:
//! - A conductor wired to fake hardware and an in-memory store
//! - Step and request builders
//! - Event collection helpers

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;
