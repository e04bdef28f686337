//! Configuration loading and management.
//!
//! This module loads the `.metal-kit/` directory: conductor settings,
//! runbooks and deploy templates, and checks their steps against the
//! driver catalog.

pub mod error;
pub mod loader;
pub mod models;
pub mod validate;
