//! `metal validate`

use color_eyre::eyre::{bail, eyre};
use colored::Colorize;
use mk_core::config::loader::load_config;
use mk_core::config::validate::validate_definitions;
use mk_core::drivers::DriverFactory;
use std::path::Path;

pub async fn handle(dir: &Path) -> color_eyre::Result<()> {
    let config = load_config(dir).await?;
    let registry = DriverFactory::create(&config.conductor).map_err(|e| eyre!(e))?;

    let issues = validate_definitions(&config, &registry);
    if issues.is_empty() {
        println!(
            "{} {} runbooks and {} deploy templates are valid",
            "✓".green().bold(),
            config.runbooks.len(),
            config.deploy_templates.len()
        );
        return Ok(());
    }

    for issue in &issues {
        println!("{} {issue}", "✗".red().bold());
    }
    bail!("{} invalid definitions", issues.len())
}
