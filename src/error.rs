//! Error types for the TaskMaster self-update core.

use std::path::PathBuf;

/// Top-level error type for release checks, downloads, and the executable swap.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Transport failure or unexpected HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// The release feed has no published release (HTTP 404).
    #[error("no release published")]
    NotFound,

    /// The latest release carries no asset for this platform.
    #[error("release {version} has no asset named {expected}")]
    NoMatchingAsset {
        /// Version of the release that was inspected.
        version: String,
        /// Asset name that was looked for.
        expected: String,
    },

    /// Malformed release descriptor or version tag.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem failure other than a permission problem.
    #[error("disk error: {0}")]
    Disk(String),

    /// Permission denied or file in use.
    #[error("permission error: {0}")]
    Permission(String),

    /// Downloaded artifact is empty, truncated, or fails its checksum.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The host application could not pause its own writes before the swap.
    #[error("application not ready for update: {0}")]
    HostNotReady(String),

    /// The swap failed after the executable was moved aside and the backup
    /// could not be put back. The installation may not be launchable.
    #[error(
        "update failed and the previous executable could not be restored: {reason}; \
         rename {} back to {} or reinstall",
        .backup.display(),
        .executable.display()
    )]
    RollbackFailed {
        /// Canonical executable path that is now missing.
        executable: PathBuf,
        /// Backup path holding the previous executable.
        backup: PathBuf,
        /// Description of the swap and restore failures.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Returns `true` for outcomes that mean "nothing to update" rather than
    /// a failure: no release published, or no asset for this platform.
    pub fn is_nothing_to_update(&self) -> bool {
        matches!(self, Self::NotFound | Self::NoMatchingAsset { .. })
    }

    /// Returns `true` for the one class of error that must be shown loudly:
    /// the installation may have been left without a launchable executable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Classify a filesystem error as [`UpdateError::Permission`] or
    /// [`UpdateError::Disk`].
    ///
    /// Windows reports a locked file as a sharing violation (32) or lock
    /// violation (33) rather than `PermissionDenied`.
    pub(crate) fn from_fs(context: impl std::fmt::Display, err: &std::io::Error) -> Self {
        let locked = cfg!(target_os = "windows") && matches!(err.raw_os_error(), Some(32 | 33));
        if err.kind() == std::io::ErrorKind::PermissionDenied || locked {
            Self::Permission(format!("{context}: {err}"))
        } else {
            Self::Disk(format!("{context}: {err}"))
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, UpdateError>;
