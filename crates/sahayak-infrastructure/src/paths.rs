//! Unified path management for Sahayak data files.
//!
//! All configuration and session data live under the platform config
//! directory (e.g. `~/.config/sahayak` on Linux).

use std::path::PathBuf;

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Unified path management for Sahayak.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/sahayak/           # Config directory
/// ├── config.toml              # Pipeline configuration
/// └── sessions/                # One JSON file per session
///     └── session-<id>.json
/// ```
pub struct SahayakPaths;

impl SahayakPaths {
    /// Returns the Sahayak configuration directory.
    ///
    /// # Returns
    ///
    /// - `Ok(PathBuf)`: Path to the config directory (e.g. `~/.config/sahayak/`)
    /// - `Err(PathError::HomeDirNotFound)`: Could not determine the directory
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join("sahayak"))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the path to the pipeline configuration file.
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Returns the path to the sessions directory.
    pub fn sessions_dir() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("sessions"))
    }
}
