//! Configuration file loader for `.metal-kit/` directory structure.
//!
//! This module provides functionality to load and parse all configuration files
//! from the `.metal-kit/` directory, including:
//! - `conductor.toml`: Conductor settings
//! - `runbooks/*.md`: Runbooks with YAML front matter
//! - `deploy-templates/*.yaml`: Deploy templates

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use gray_matter::engine::YAML;
use gray_matter::Matter;
use mk_protocol::config_models::ConductorConfig;
use mk_protocol::runbook_models::{DeployTemplate, Runbook};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the configuration directory.
pub const CONFIG_DIR: &str = ".metal-kit";

const MAX_TRAIT_LENGTH: usize = 255;

/// Loads all configuration from the `.metal-kit/` directory.
///
/// # Arguments
///
/// * `root` - Root directory containing the `.metal-kit/` folder
///
/// # Returns
///
/// An `AppConfig` containing all loaded configuration. Missing files or
/// directories fall back to defaults rather than an error.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - Files exist but cannot be read
/// - Files have invalid syntax (TOML, YAML, or Markdown front matter)
/// - A runbook or deploy template name is not a `CUSTOM_` trait, or is
///   used twice
///
/// # Example
///
/// ```rust,no_run
/// use mk_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Conductor host: {}", config.conductor.host);
/// # Ok(())
/// # }
/// ```
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let mk_dir = root.join(CONFIG_DIR);

    if !mk_dir.exists() {
        return Ok(AppConfig::default());
    }

    let conductor = load_conductor_config(&mk_dir)?;
    let runbooks = load_runbooks(&mk_dir)?;
    let deploy_templates = load_deploy_templates(&mk_dir)?;

    tracing::debug!(
        path = %mk_dir.display(),
        runbooks = runbooks.len(),
        deploy_templates = deploy_templates.len(),
        "configuration loaded"
    );

    Ok(AppConfig {
        conductor,
        runbooks,
        deploy_templates,
    })
}

/// Whether `name` is a custom trait usable as a runbook or template name.
pub fn is_custom_trait(name: &str) -> bool {
    name.len() <= MAX_TRAIT_LENGTH
        && name.strip_prefix("CUSTOM_").is_some_and(|rest| {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        })
}

/// Loads conductor settings from `conductor.toml`.
fn load_conductor_config(mk_dir: &Path) -> ConfigResult<ConductorConfig> {
    let config_path = mk_dir.join("conductor.toml");

    if !config_path.exists() {
        return Ok(ConductorConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let config: ConductorConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    if config.host.trim().is_empty() {
        return Err(ConfigError::InvalidConfig {
            path: config_path,
            reason: "host must not be empty".to_string(),
        });
    }

    Ok(config)
}

/// Files directly inside `dir` with one of `extensions`, sorted by name.
fn list_files(dir: &Path, extensions: &[&str]) -> ConfigResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = entry.path();
        let ext = path.extension().and_then(|s| s.to_str());
        if ext.is_some_and(|ext| extensions.contains(&ext)) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn check_name(path: &Path, kind: &'static str, name: &str, seen: &mut HashSet<String>) -> ConfigResult<()> {
    if !is_custom_trait(name) {
        return Err(ConfigError::InvalidTraitName {
            path: path.to_path_buf(),
            name: name.to_string(),
        });
    }
    if !seen.insert(name.to_string()) {
        return Err(ConfigError::DuplicateName {
            path: path.to_path_buf(),
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Loads all runbooks from `runbooks/*.md`.
///
/// Steps without an `order` are numbered after the highest explicit order,
/// in file order.
fn load_runbooks(mk_dir: &Path) -> ConfigResult<Vec<Runbook>> {
    let mut runbooks = Vec::new();
    let mut seen = HashSet::new();

    for path in list_files(&mk_dir.join("runbooks"), &["md"])? {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let matter = Matter::<YAML>::new();
        let result = matter.parse(&content);

        let mut runbook: Runbook = result
            .data
            .ok_or_else(|| ConfigError::MarkdownParse {
                path: path.clone(),
                reason: "Missing YAML front matter".to_string(),
            })?
            .deserialize()
            .map_err(|e| ConfigError::MarkdownParse {
                path: path.clone(),
                reason: format!("Failed to deserialize front matter: {e}"),
            })?;

        check_name(&path, "runbook", &runbook.name, &mut seen)?;
        if runbook.steps.is_empty() {
            return Err(ConfigError::InvalidConfig {
                path,
                reason: format!("runbook {} has no steps", runbook.name),
            });
        }

        let mut next = runbook.steps.iter().filter_map(|s| s.order).max().unwrap_or(0);
        for step in runbook.steps.iter_mut().filter(|s| s.order.is_none()) {
            next += 1;
            step.order = Some(next);
        }

        runbook.description = result.content.trim().to_string();
        runbooks.push(runbook);
    }

    Ok(runbooks)
}

/// Loads all deploy templates from `deploy-templates/*.yaml` and `*.yml`.
fn load_deploy_templates(mk_dir: &Path) -> ConfigResult<Vec<DeployTemplate>> {
    let mut templates = Vec::new();
    let mut seen = HashSet::new();

    for path in list_files(&mk_dir.join("deploy-templates"), &["yaml", "yml"])? {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::FileRead {
            path: path.clone(),
            source,
        })?;

        let template: DeployTemplate =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.clone(),
                source,
            })?;

        check_name(&path, "deploy template", &template.name, &mut seen)?;
        templates.push(template);
    }

    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mk_protocol::StepInterface;
    use std::fs;
    use tempfile::tempdir;

    fn metal_kit_dir(root: &Path) -> PathBuf {
        let mk_dir = root.join(CONFIG_DIR);
        fs::create_dir_all(mk_dir.join("runbooks")).expect("Failed to create runbooks dir");
        fs::create_dir_all(mk_dir.join("deploy-templates"))
            .expect("Failed to create deploy-templates dir");
        mk_dir
    }

    #[tokio::test]
    async fn test_load_config_acceptance() {
        let dir = tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        let mk_dir = metal_kit_dir(root);

        let conductor_toml = r#"host = "conductor-1"
automated_clean = false
clean_callback_timeout = 600
enabled_interfaces = ["power", "management", "deploy"]

[step_priority_overrides]
"deploy.erase_devices" = 0
"#;
        fs::write(mk_dir.join("conductor.toml"), conductor_toml)
            .expect("Failed to write conductor.toml");

        let runbook_md = r#"---
name: CUSTOM_BIOS_RESET
public: true
steps:
  - interface: bios
    step: factory_reset
    order: 1
  - interface: power
    step: reboot
    order: 2
---

Reset BIOS settings to factory defaults and reboot."#;
        fs::write(mk_dir.join("runbooks/bios-reset.md"), runbook_md)
            .expect("Failed to write runbook");

        let template_yaml = r#"name: CUSTOM_RAID1
steps:
  - interface: raid
    step: apply_configuration
    priority: 90
    args:
      raid_config:
        logical_disks:
          - size_gb: MAX
            raid_level: "1"
"#;
        fs::write(mk_dir.join("deploy-templates/raid1.yaml"), template_yaml)
            .expect("Failed to write deploy template");

        let config = load_config(root).await.expect("Failed to load config");

        assert_eq!(config.conductor.host, "conductor-1");
        assert!(!config.conductor.automated_clean);
        assert_eq!(config.conductor.clean_callback_timeout, 600);
        assert_eq!(config.conductor.enabled_interfaces.len(), 3);
        assert_eq!(
            config.conductor.step_priority_overrides.get("deploy.erase_devices"),
            Some(&0)
        );
        // Unset values keep their defaults
        assert_eq!(config.conductor.deploy_callback_timeout, 1800);

        assert_eq!(config.runbooks.len(), 1);
        let runbook = &config.runbooks[0];
        assert_eq!(runbook.name, "CUSTOM_BIOS_RESET");
        assert!(runbook.public);
        assert_eq!(runbook.steps.len(), 2);
        assert_eq!(runbook.steps[0].interface, StepInterface::Bios);
        assert!(runbook.description.contains("factory defaults"));

        assert_eq!(config.deploy_templates.len(), 1);
        let template = &config.deploy_templates[0];
        assert_eq!(template.name, "CUSTOM_RAID1");
        assert_eq!(template.steps[0].priority, Some(90));
        assert!(template.steps[0].args.contains_key("raid_config"));
    }

    #[tokio::test]
    async fn test_load_config_empty_directory() {
        let dir = tempdir().expect("Failed to create temp dir");

        let config = load_config(dir.path())
            .await
            .expect("Should handle missing .metal-kit");

        assert_eq!(config.conductor, ConductorConfig::default());
        assert!(config.runbooks.is_empty());
        assert!(config.deploy_templates.is_empty());
    }

    #[tokio::test]
    async fn test_load_config_partial() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&mk_dir).expect("Failed to create .metal-kit");
        fs::write(mk_dir.join("conductor.toml"), "sync_interval = 5")
            .expect("Failed to write conductor.toml");

        let config = load_config(dir.path())
            .await
            .expect("Should handle partial config");

        assert_eq!(config.conductor.sync_interval, 5);
        assert!(config.runbooks.is_empty());
    }

    #[tokio::test]
    async fn test_load_config_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&mk_dir).expect("Failed to create .metal-kit");
        fs::write(mk_dir.join("conductor.toml"), "host = [invalid toml")
            .expect("Failed to write conductor.toml");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::TomlParse { path, .. }) = result {
            assert!(path.ends_with("conductor.toml"));
        } else {
            panic!("Expected TomlParse error");
        }
    }

    #[tokio::test]
    async fn test_load_config_empty_host() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&mk_dir).expect("Failed to create .metal-kit");
        fs::write(mk_dir.join("conductor.toml"), "host = \"  \"")
            .expect("Failed to write conductor.toml");

        let result = load_config(dir.path()).await;
        assert!(matches!(result, Err(ConfigError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_load_config_invalid_yaml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        fs::write(
            mk_dir.join("deploy-templates/broken.yaml"),
            "name: CUSTOM_X\n  steps: [yaml",
        )
        .expect("Failed to write template");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::YamlParse { path, .. }) = result {
            assert!(path.ends_with("broken.yaml"));
        } else {
            panic!("Expected YamlParse error");
        }
    }

    #[tokio::test]
    async fn test_runbook_without_front_matter() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        fs::write(mk_dir.join("runbooks/plain.md"), "Just plain markdown content")
            .expect("Failed to write runbook");

        let result = load_config(dir.path()).await;

        if let Err(ConfigError::MarkdownParse { path, reason }) = result {
            assert!(path.ends_with("plain.md"));
            assert!(reason.contains("Missing YAML front matter"));
        } else {
            panic!("Expected MarkdownParse error");
        }
    }

    #[tokio::test]
    async fn test_runbook_name_must_be_custom_trait() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        let runbook_md = r#"---
name: bios-reset
steps:
  - interface: bios
    step: factory_reset
---
"#;
        fs::write(mk_dir.join("runbooks/bad.md"), runbook_md).expect("Failed to write runbook");

        let result = load_config(dir.path()).await;
        assert!(matches!(
            result,
            Err(ConfigError::InvalidTraitName { name, .. }) if name == "bios-reset"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_template_names() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        let template = "name: CUSTOM_RAID1\nsteps: []\n";
        fs::write(mk_dir.join("deploy-templates/a.yaml"), template).expect("write");
        fs::write(mk_dir.join("deploy-templates/b.yml"), template).expect("write");

        let result = load_config(dir.path()).await;
        assert!(matches!(result, Err(ConfigError::DuplicateName { .. })));
    }

    #[tokio::test]
    async fn test_missing_orders_are_assigned() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        let runbook_md = r#"---
name: CUSTOM_MIXED
steps:
  - interface: bios
    step: factory_reset
  - interface: power
    step: reboot
    order: 5
  - interface: deploy
    step: wait
---
"#;
        fs::write(mk_dir.join("runbooks/mixed.md"), runbook_md).expect("write");

        let config = load_config(dir.path()).await.expect("load");
        let orders: Vec<Option<u32>> = config.runbooks[0].steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![Some(6), Some(5), Some(7)]);
    }

    #[tokio::test]
    async fn test_load_config_ignores_non_matching_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mk_dir = metal_kit_dir(dir.path());
        fs::write(mk_dir.join("runbooks/readme.txt"), "Not a markdown file").expect("write");
        fs::write(mk_dir.join("deploy-templates/notes.txt"), "Not a yaml file").expect("write");

        let config = load_config(dir.path())
            .await
            .expect("Should ignore non-matching files");

        assert!(config.runbooks.is_empty());
        assert!(config.deploy_templates.is_empty());
    }

    #[test]
    fn test_is_custom_trait() {
        assert!(is_custom_trait("CUSTOM_RAID1"));
        assert!(is_custom_trait("CUSTOM_BIOS_RESET_2"));
        assert!(!is_custom_trait("CUSTOM_"));
        assert!(!is_custom_trait("custom_raid"));
        assert!(!is_custom_trait("CUSTOM_raid"));
        assert!(!is_custom_trait("HW_CPU_X86_AVX2"));
    }
}
