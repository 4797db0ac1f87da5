// Configuration: data file location and sync timings

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name used when no explicit data file is configured
pub const DEFAULT_FILE_NAME: &str = "students.txt";

/// Timer settings for a sync session, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Quiet period after the last mutation before auto-saving
    pub debounce_ms: u64,
    /// How often the file's modification time is checked
    pub poll_interval_ms: u64,
    /// Modification times this close after our own save count as our own write
    pub guard_window_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            poll_interval_ms: 1500,
            guard_window_ms: 400,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn guard_window(&self) -> Duration {
        Duration::from_millis(self.guard_window_ms)
    }
}

/// Application configuration, usually read from a YAML file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Roster file; resolved with `default_data_file()` when absent
    pub data_file: Option<PathBuf>,
    pub sync: SyncSettings,
}

impl Config {
    /// Read configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))?;
        debug!(file = ?path, ?config, "Loaded config");
        Ok(config)
    }

    /// The configured data file, or the default location
    pub fn resolve_data_file(&self) -> PathBuf {
        match &self.data_file {
            Some(path) => path.clone(),
            None => default_data_file(),
        }
    }
}

/// `students.txt` in the working directory
///
/// Older releases kept the file in the home directory. When only that copy
/// exists it is copied into the working directory first (best-effort).
pub fn default_data_file() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    default_data_file_in(&cwd, dirs::home_dir().as_deref())
}

fn default_data_file_in(cwd: &Path, home: Option<&Path>) -> PathBuf {
    let target = cwd.join(DEFAULT_FILE_NAME);
    if target.exists() {
        return target;
    }

    if let Some(home) = home {
        let old = home.join(DEFAULT_FILE_NAME);
        if old.exists() && old != target {
            match fs::copy(&old, &target) {
                Ok(_) => info!(from = ?old, to = ?target, "Copied roster file from home directory"),
                Err(e) => warn!(
                    from = ?old,
                    to = ?target,
                    error = ?e,
                    "Failed to copy roster file from home directory"
                ),
            }
        }
    }

    target
}
