//! Error types for configuration loading.
//!
//! This module defines all errors that can occur while reading
//! `conductor.toml`, runbooks and deploy templates.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk.
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse `conductor.toml`.
    #[error("Failed to parse TOML file at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Failed to parse a deploy template.
    #[error("Failed to parse YAML file at {path}: {source}")]
    YamlParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Failed to parse runbook front matter.
    #[error("Failed to parse Markdown front matter in {path}: {reason}")]
    MarkdownParse { path: PathBuf, reason: String },

    #[error("Failed to traverse directory {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// A runbook or deploy template name is not a custom trait.
    #[error("Invalid name '{name}' in {path}: names must match CUSTOM_[A-Z0-9_]+")]
    InvalidTraitName { path: PathBuf, name: String },

    /// Two runbooks or two deploy templates share a name.
    #[error("Duplicate {kind} name '{name}' in {path}")]
    DuplicateName {
        path: PathBuf,
        kind: &'static str,
        name: String,
    },

    /// Invalid configuration structure or values.
    #[error("Invalid configuration in {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },
}

/// Type alias for Result with ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
