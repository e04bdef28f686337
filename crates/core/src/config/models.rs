//! Configuration models that aggregate all settings.
//!
//! This module provides the unified `AppConfig` structure that combines
//! the conductor settings, runbooks and deploy templates into a single
//! configuration object.

use mk_protocol::config_models::ConductorConfig;
use mk_protocol::runbook_models::{DeployTemplate, Runbook};

/// Unified application configuration loaded from `.metal-kit/` directory.
///
/// This structure aggregates all configuration sources:
/// - `conductor.toml`: Conductor settings
/// - `runbooks/*.md`: Runbook definitions
/// - `deploy-templates/*.yaml`: Deploy template definitions
///
/// # Example
///
/// ```rust,no_run
/// use mk_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Loaded {} runbooks and {} deploy templates",
///          config.runbooks.len(),
///          config.deploy_templates.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Conductor settings from `conductor.toml`.
    pub conductor: ConductorConfig,

    /// Runbooks loaded from `runbooks/*.md`, sorted by file name.
    pub runbooks: Vec<Runbook>,

    /// Deploy templates loaded from `deploy-templates/*.yaml`.
    pub deploy_templates: Vec<DeployTemplate>,
}
