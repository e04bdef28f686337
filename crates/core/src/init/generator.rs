//! Directory structure and file generation for .metal-kit initialization.

use super::error::{InitError, InitResult};
use super::templates::{get_template, list_templates};
use crate::config::loader::CONFIG_DIR;
use std::fs;
use std::path::{Path, PathBuf};

/// Options for initializing a .metal-kit directory.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Target directory where .metal-kit will be created.
    pub target_dir: PathBuf,

    /// Overwrite existing .metal-kit directory if it exists.
    pub force: bool,

    /// Create minimal template (only 1 runbook and 1 deploy template).
    pub minimal: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            target_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            force: false,
            minimal: false,
        }
    }
}

const MINIMAL_RUNBOOK: &str = "runbooks/bios-reset.md";
const MINIMAL_DEPLOY_TEMPLATE: &str = "deploy-templates/raid1.yaml";

/// Generate a complete .metal-kit directory structure with templates.
///
/// This function creates the following structure:
/// ```text
/// .metal-kit/
/// ├── conductor.toml
/// ├── runbooks/
/// │   ├── bios-reset.md
/// │   └── firmware-settings.md (unless minimal)
/// └── deploy-templates/
///     ├── raid1.yaml
///     └── bios-performance.yaml (unless minimal)
/// ```
///
/// # Errors
///
/// Returns an `InitError` if:
/// - The .metal-kit directory already exists (without force flag)
/// - A template file cannot be found
/// - File system operations fail
pub async fn generate_metal_kit_structure(options: InitOptions) -> InitResult<()> {
    let mk_dir = options.target_dir.join(CONFIG_DIR);

    if mk_dir.exists() && !options.force {
        return Err(InitError::DirectoryExists(mk_dir));
    }

    for sub in ["runbooks", "deploy-templates"] {
        let path = mk_dir.join(sub);
        fs::create_dir_all(&path).map_err(|source| InitError::DirectoryCreate { path, source })?;
    }

    write_template_file(&mk_dir, "conductor.toml")?;

    if options.minimal {
        write_template_file(&mk_dir, MINIMAL_RUNBOOK)?;
        write_template_file(&mk_dir, MINIMAL_DEPLOY_TEMPLATE)?;
    } else {
        for path in list_templates("runbooks/")
            .into_iter()
            .chain(list_templates("deploy-templates/"))
        {
            write_template_file(&mk_dir, &path)?;
        }
    }

    tracing::info!(path = %mk_dir.display(), minimal = options.minimal, "initialized .metal-kit");
    Ok(())
}

/// Write one embedded template below `mk_dir`, creating parent directories.
fn write_template_file(mk_dir: &Path, template_path: &str) -> InitResult<()> {
    let content = get_template(template_path)
        .ok_or_else(|| InitError::TemplateNotFound(template_path.to_string()))?;

    let target_path = mk_dir.join(template_path);

    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|source| InitError::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(&target_path, content).map_err(|source| InitError::FileWrite {
        path: target_path,
        source,
    })?;

    Ok(())
}
