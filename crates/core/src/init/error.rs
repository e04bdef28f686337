//! Errors from `metal init`.

use std::path::PathBuf;
use thiserror::Error;

pub type InitResult<T> = Result<T, InitError>;

#[derive(Debug, Error)]
pub enum InitError {
    /// `.metal-kit/` is already present and `force` is off.
    #[error("{} already exists, pass --force to overwrite it", .0.display())]
    DirectoryExists(PathBuf),

    /// Embedded template missing from the binary.
    #[error("No embedded template named {0}")]
    TemplateNotFound(String),

    #[error("Cannot create {}: {source}", .path.display())]
    DirectoryCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write {}: {source}", .path.display())]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}
