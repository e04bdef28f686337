//! # mk-protocol
//!
//! Core protocol definitions and data models for metal-kit.
//!
//! This crate defines all shared data structures used for:
//! - Node records and the provisioning state vocabulary
//! - Step, runbook and deploy template definitions
//! - Conductor configuration (`conductor.toml`)
//! - REST request/response bodies and the conductor event stream
//!
//! ## Modules
//!
//! - [`node_models`]: Nodes, provisioning states, history
//! - [`step_models`]: Steps, step specs, phases and interfaces
//! - [`runbook_models`]: Runbooks and deploy templates
//! - [`config_models`]: Conductor configuration
//! - [`api_models`]: REST bodies
//! - [`ipc`]: Events published by the conductor
//!
//! ## Design Principles
//!
//! - Minimal dependencies: Only serde, ts-rs, chrono and uuid
//! - TypeScript generation: All types derive `TS` for client compatibility
//! - Independent compilation: No dependencies on other metal-kit crates

pub mod api_models;
pub mod config_models;
pub mod ipc;
pub mod node_models;
pub mod runbook_models;
pub mod step_models;

// Re-export all public types for convenience
pub use api_models::*;
pub use config_models::*;
pub use ipc::*;
pub use node_models::*;
pub use runbook_models::*;
pub use step_models::*;
