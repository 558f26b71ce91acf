//! Sibling paths used while replacing the executable.
//!
//! Every update artifact lives next to the executable and is named
//! `<exe-file-name><suffix>`, so downloads and swaps stay on one volume and
//! the reaper can recognise leftovers without touching anything else.

use crate::error::{Result, UpdateError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Suffix of the rollback copy of the previous executable.
pub const BACKUP_SUFFIX: &str = ".bak";
/// Suffix of a fully downloaded, verified, not yet installed executable.
pub const STAGED_SUFFIX: &str = ".new";
/// Suffix of an in-progress download.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Update artifact paths derived from one executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePaths {
    /// The installed executable (`TaskMaster.exe`).
    pub executable: PathBuf,
    /// Verified download waiting to be swapped in (`TaskMaster.exe.new`).
    pub staged: PathBuf,
    /// Rollback copy of the previous executable (`TaskMaster.exe.bak`).
    pub backup: PathBuf,
}

impl UpdatePaths {
    /// Derive the artifact paths for `executable`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the path has no file name.
    pub fn for_executable(executable: &Path) -> Result<Self> {
        if executable.file_name().is_none() {
            return Err(UpdateError::Config(format!(
                "executable path {} has no file name",
                executable.display()
            )));
        }
        Ok(Self {
            executable: executable.to_owned(),
            staged: with_suffix(executable, STAGED_SUFFIX),
            backup: with_suffix(executable, BACKUP_SUFFIX),
        })
    }

    /// Paths for the running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable path cannot be determined.
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            UpdateError::Disk(format!("cannot determine current executable path: {e}"))
        })?;
        Self::for_executable(&exe)
    }

    /// Directory holding the executable and all artifacts.
    pub fn dir(&self) -> &Path {
        self.executable.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Swap plan for installing the staged download.
    pub fn swap_plan(&self) -> SwapPlan {
        SwapPlan {
            current_executable: self.executable.clone(),
            new_executable: self.staged.clone(),
            backup: self.backup.clone(),
        }
    }
}

/// The three paths involved in one executable swap.
///
/// At every observable point exactly one of `current_executable` and
/// `backup` holds a complete executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub current_executable: PathBuf,
    pub new_executable: PathBuf,
    pub backup: PathBuf,
}

/// Append `suffix` to the full file name (`a.exe` becomes `a.exe.bak`).
///
/// Unlike [`Path::with_extension`] this never replaces an existing extension,
/// so `TaskMaster.exe.bak` cannot collide with an unrelated `TaskMaster.bak`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsStr::to_owned).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Partial download path for a destination (`TaskMaster.exe.new.part`).
pub fn partial_path(destination: &Path) -> PathBuf {
    with_suffix(destination, PARTIAL_SUFFIX)
}
