//! Conductor service coordinating locks, steps and node state.

pub mod manager;

pub use manager::Conductor;
