//! Executable replacement.
//!
//! The running executable is renamed to a backup, then the verified download
//! is renamed into its place. Both renames stay inside one directory, so each
//! is atomic and there is never a moment where neither path holds a complete
//! executable. The backup is left for the reaper on the next start.
//!
//! Renaming a running executable is allowed on both Linux and Windows;
//! deleting it is not on Windows, which is why cleanup is deferred.

use crate::error::{Result, UpdateError};
use crate::update::paths::{BACKUP_SUFFIX, SwapPlan, with_suffix};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Filesystem operations used by the swap.
pub trait SwapFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`SwapFs`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl SwapFs for StdFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// A successful swap. The caller exits the current process and calls
/// [`ScheduledRestart::launch`] (or the reverse order on platforms that need it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRestart {
    /// The newly installed executable.
    pub executable: PathBuf,
    /// Rollback copy of the previous executable.
    pub backup: PathBuf,
    /// Arguments to pass to the new process.
    pub args: Vec<OsString>,
}

impl ScheduledRestart {
    /// Start the new executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn launch(&self) -> Result<std::process::Child> {
        info!(path = %self.executable.display(), "launching updated executable");
        std::process::Command::new(&self.executable)
            .args(&self.args)
            .spawn()
            .map_err(|e| {
                UpdateError::from_fs(format!("cannot launch {}", self.executable.display()), &e)
            })
    }
}

/// Swap the staged download into place using the real filesystem.
///
/// # Errors
///
/// See [`apply_with`].
pub fn apply(plan: &SwapPlan) -> Result<ScheduledRestart> {
    apply_with(&StdFs, plan)
}

/// Swap `plan.new_executable` into `plan.current_executable`.
///
/// 1. Move the current executable to the backup path.
/// 2. Move the new executable to the current path.
///
/// # Errors
///
/// - [`UpdateError::Integrity`] if the new executable is missing or empty
/// - [`UpdateError::Disk`] if the current executable is missing or empty
/// - [`UpdateError::Permission`] / [`UpdateError::Disk`] if step 1 fails
///   (nothing was changed) or step 2 fails and the backup was restored
/// - [`UpdateError::RollbackFailed`] if step 2 fails and the backup could not
///   be restored. The previous executable is at the backup path.
pub fn apply_with(fs: &impl SwapFs, plan: &SwapPlan) -> Result<ScheduledRestart> {
    let new_len = std::fs::metadata(&plan.new_executable)
        .map_err(|e| {
            UpdateError::Integrity(format!(
                "staged update {} is unavailable: {e}",
                plan.new_executable.display()
            ))
        })?
        .len();
    if new_len == 0 {
        return Err(UpdateError::Integrity(format!(
            "staged update {} is empty",
            plan.new_executable.display()
        )));
    }
    // After a failed rollback the backup is the only launchable copy; it
    // must not be replaced.
    let current_ok = std::fs::metadata(&plan.current_executable)
        .is_ok_and(|m| m.is_file() && m.len() > 0);
    if !current_ok {
        return Err(UpdateError::Disk(format!(
            "current executable {} is missing or empty, restore it from {} before updating",
            plan.current_executable.display(),
            plan.backup.display()
        )));
    }

    set_executable(&plan.new_executable)?;

    let backup = free_backup_path(fs, plan);

    // Step 1.
    fs.rename(&plan.current_executable, &backup).map_err(|e| {
        warn!(
            from = %plan.current_executable.display(),
            to = %backup.display(),
            error = %e,
            "cannot move current executable aside, update aborted"
        );
        UpdateError::from_fs(
            format!(
                "cannot back up {} to {}",
                plan.current_executable.display(),
                backup.display()
            ),
            &e,
        )
    })?;

    // Step 2.
    if let Err(install_err) = fs.rename(&plan.new_executable, &plan.current_executable) {
        let failure = UpdateError::from_fs(
            format!(
                "cannot install {} to {}",
                plan.new_executable.display(),
                plan.current_executable.display()
            ),
            &install_err,
        );

        return match fs.rename(&backup, &plan.current_executable) {
            Ok(()) => {
                warn!(
                    path = %plan.current_executable.display(),
                    error = %install_err,
                    "update install failed, previous executable restored"
                );
                Err(failure)
            }
            Err(restore_err) => {
                error!(
                    executable = %plan.current_executable.display(),
                    backup = %backup.display(),
                    install_error = %install_err,
                    restore_error = %restore_err,
                    "update failed and previous executable could not be restored"
                );
                Err(UpdateError::RollbackFailed {
                    executable: plan.current_executable.clone(),
                    backup,
                    reason: format!("install failed: {install_err}; restore failed: {restore_err}"),
                })
            }
        };
    }

    info!(
        path = %plan.current_executable.display(),
        backup = %backup.display(),
        "executable updated, restart required"
    );
    Ok(ScheduledRestart {
        executable: plan.current_executable.clone(),
        backup,
        args: std::env::args_os().skip(1).collect(),
    })
}

/// Returns a backup path that does not exist yet.
///
/// A backup left by an earlier update that the reaper could not delete is
/// removed first; if that fails too, a timestamped name is used instead.
fn free_backup_path(fs: &impl SwapFs, plan: &SwapPlan) -> PathBuf {
    if !plan.backup.exists() {
        return plan.backup.clone();
    }
    match fs.remove_file(&plan.backup) {
        Ok(()) => plan.backup.clone(),
        Err(e) => {
            let alternate = with_suffix(
                &plan.current_executable,
                &format!(".{}{BACKUP_SUFFIX}", chrono::Utc::now().timestamp_millis()),
            );
            warn!(
                stale = %plan.backup.display(),
                alternate = %alternate.display(),
                error = %e,
                "stale backup is locked, using alternate backup path"
            );
            alternate
        }
    }
}

/// Add the execute bits to the staged file, keeping its other mode bits.
#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mark_failed =
        |e: io::Error| UpdateError::from_fs(format!("cannot mark {} executable", path.display()), &e);
    let mut perms = std::fs::metadata(path).map_err(mark_failed)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms).map_err(mark_failed)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
