//! Configuration types for the updater.
//!
//! The config file is optional and read-only from the updater's point of
//! view: a missing file means defaults.

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// GitHub endpoint listing the latest published TaskMaster release.
pub const DEFAULT_FEED_URL: &str =
    "https://api.github.com/repos/elementary1997/taskmaster/releases/latest";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMasterConfig {
    /// Self-update settings.
    pub update: UpdateConfig,
}

/// Self-update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Whether background update checks run at all.
    pub enabled: bool,
    /// Release feed endpoint (GitHub `releases/latest` schema).
    pub feed_url: String,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Timeout for the release check request, in seconds.
    pub check_timeout_secs: u64,
    /// Delay between startup and the first background check, in seconds.
    pub startup_delay_secs: u64,
    /// Minimum spacing between background checks, in minutes.
    ///
    /// User-initiated checks ignore this.
    pub min_check_interval_mins: u64,
    /// Minimum spacing between download progress events, in milliseconds.
    pub progress_interval_ms: u64,
    /// Abort a download when no bytes arrive for this many seconds.
    pub stall_timeout_secs: u64,
    /// Release asset to install. `None` uses the platform default name.
    pub asset_name: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_url: DEFAULT_FEED_URL.to_owned(),
            user_agent: "TaskMaster".to_owned(),
            check_timeout_secs: 5,
            startup_delay_secs: 3,
            min_check_interval_mins: 60,
            progress_interval_ms: 250,
            stall_timeout_secs: 60,
            asset_name: None,
        }
    }
}

impl UpdateConfig {
    /// Release check timeout.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Delay before the first background check.
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Minimum spacing between background checks.
    pub fn min_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_check_interval_mins.saturating_mul(60))
    }

    /// Minimum spacing between progress events.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Read stall guard for downloads.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    /// Validate values that would otherwise fail deep inside a worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the feed URL is not an absolute
    /// http(s) URL or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.feed_url)
            .map_err(|e| UpdateError::Config(format!("invalid feed_url {:?}: {e}", self.feed_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpdateError::Config(format!(
                "feed_url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.check_timeout_secs == 0 {
            return Err(UpdateError::Config("check_timeout_secs must be > 0".to_owned()));
        }
        if self.stall_timeout_secs == 0 {
            return Err(UpdateError::Config("stall_timeout_secs must be > 0".to_owned()));
        }
        Ok(())
    }
}

impl TaskMasterConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))
    }

    /// Load the config file if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }
}
