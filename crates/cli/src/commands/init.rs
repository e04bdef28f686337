//! `metal init`

use colored::Colorize;
use mk_core::init::{generate_metal_kit_structure, InitOptions};
use std::path::PathBuf;

pub async fn handle(dir: PathBuf, force: bool, minimal: bool) -> color_eyre::Result<()> {
    let target = dir.join(mk_core::config::loader::CONFIG_DIR);
    generate_metal_kit_structure(InitOptions {
        target_dir: dir,
        force,
        minimal,
    })
    .await?;

    println!(
        "{} Created {}",
        "✓".green().bold(),
        target.display().to_string().cyan()
    );
    println!("\nNext steps:");
    println!("  {} metal validate", "$".bright_black());
    println!("  {} metal serve", "$".bright_black());
    Ok(())
}
