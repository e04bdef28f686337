//! # mk-core
//!
//! Conductor core for metal-kit.
//!
//! This crate provides:
//! - Configuration loading from `.metal-kit/` directory
//! - The provision state machine and node records
//! - Driver interfaces and the step collector that validates their steps
//! - The step executor and the conductor that drives user verbs
//! - Node reservations and the conductor hash ring
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`conductor`]: Verb handling, heartbeats and callback timeouts
//! - [`drivers`]: Driver interface traits and the fake hardware type
//! - [`engine`]: Step execution
//! - [`lock`]: Node reservations and conductor mapping
//! - [`state`]: Provision state machine
//! - [`steps`]: Step collection and ordering
//! - [`store`]: Node persistence

pub mod conductor;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod init;
pub mod lock;
pub mod state;
pub mod steps;
pub mod store;

pub use conductor::Conductor;
pub use error::{ConductorError, ConductorResult};
