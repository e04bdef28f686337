//! Embedded template files for .metal-kit initialization.
//!
//! `rust-embed` bakes the workspace `templates/` directory into the binary,
//! so `metal init` works without any files next to the executable.

use rust_embed::RustEmbed;

/// Embedded template files from the workspace `templates/` directory.
///
/// `CARGO_MANIFEST_DIR` is `crates/core`, so `../../templates` is the
/// workspace root's `templates/`.
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../templates"]
pub struct TemplateAssets;

/// Get template file content by path.
///
/// # Arguments
/// * `path` - Relative path from templates root (e.g., "conductor.toml", "runbooks/bios-reset.md")
///
/// # Example
/// ```
/// use mk_core::init::templates::get_template;
///
/// let config = get_template("conductor.toml").expect("conductor.toml should exist");
/// assert!(config.contains("automated_clean"));
/// ```
pub fn get_template(path: &str) -> Option<String> {
    TemplateAssets::get(path).map(|file| String::from_utf8_lossy(file.data.as_ref()).to_string())
}

/// List all template files under a directory prefix, sorted.
pub fn list_templates(prefix: &str) -> Vec<String> {
    let mut paths: Vec<String> = TemplateAssets::iter()
        .filter(|path| path.starts_with(prefix))
        .map(|path| path.to_string())
        .collect();
    paths.sort();
    paths
}
