//! Centralized application directory paths for TaskMaster.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | Windows | Linux |
//! |---------|---------|-------|
//! | App data | `%APPDATA%\TaskMaster\` | `~/.local/share/taskmaster/` |
//! | Config | `%APPDATA%\TaskMaster\` | `~/.config/taskmaster/` |
//!
//! # Environment Overrides
//!
//! - `TASKMASTER_DATA_DIR` overrides [`data_dir`]
//! - `TASKMASTER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

#[cfg(target_os = "windows")]
const APP_DIR_NAME: &str = "TaskMaster";
#[cfg(not(target_os = "windows"))]
const APP_DIR_NAME: &str = "taskmaster";

/// Application data root directory (task data, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKMASTER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join("taskmaster-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TASKMASTER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join("taskmaster-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
