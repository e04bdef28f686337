//! Sample `.metal-kit/` generation for `metal init`.
//!
//! Writes `conductor.toml` with every option at its default, two runbooks
//! and two deploy templates, all embedded in the binary.
//!
//! # Example
//!
//! ```no_run
//! use mk_core::init::{InitOptions, generate_metal_kit_structure};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! generate_metal_kit_structure(InitOptions {
//!     target_dir: PathBuf::from("/srv/conductor"),
//!     force: true,
//!     minimal: true,
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod generator;
pub mod templates;

pub use error::{InitError, InitResult};
pub use generator::{generate_metal_kit_structure, InitOptions};
pub use templates::{get_template, list_templates};
