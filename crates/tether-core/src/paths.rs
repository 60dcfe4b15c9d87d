//! State directory layout.
//!
//! Keeps the device list and per-notebook records in one place so the
//! kernel and the CLI management commands agree on paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Name of the state directory under the user's home.
pub const STATE_DIR_NAME: &str = ".tether";

/// Directory structure for tether state.
///
/// ```text
/// ~/.tether/
/// ├── devices.json      # Registered devices
/// └── connect_rc.json   # Per-notebook key/value records
/// ```
#[derive(Debug, Clone)]
pub struct TetherDirs {
    /// The state directory itself.
    pub root: PathBuf,

    /// Persisted device list.
    pub devices_file: PathBuf,

    /// Per-notebook records (default device, working directory).
    pub connect_rc_file: PathBuf,
}

impl TetherDirs {
    /// Layout rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_root(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            devices_file: root.join("devices.json"),
            connect_rc_file: root.join("connect_rc.json"),
        })
    }

    /// Layout rooted at `override_root` if given, else `~/.tether`.
    pub fn resolve(override_root: Option<&Path>) -> Result<Self> {
        match override_root {
            Some(root) => Self::from_root(root),
            None => {
                let home = dirs::home_dir().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "cannot determine home directory")
                })?;
                Self::from_root(&home.join(STATE_DIR_NAME))
            }
        }
    }
}
