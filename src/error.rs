//! Domain failures of a sandbox launch.
//!
//! Everything else travels as `anyhow::Error` with context attached.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// The folder to mount as `/src` is missing or not a directory.
    #[error("source folder '{}' does not exist", .0.display())]
    SourceFolderMissing(PathBuf),

    /// The container runtime binary is not on PATH.
    #[error("container runtime '{0}' not found on PATH")]
    RuntimeNotFound(String),

    /// The readiness check found no running instance of the image.
    #[error("no running container for image '{image}' after startup\n--- container logs ---\n{logs}")]
    ContainerNotRunning { image: String, logs: String },

    /// The configuration file is unreadable or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
