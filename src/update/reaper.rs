//! Startup cleanup of update leftovers.
//!
//! Removes the rollback copy kept by the last successful swap, plus staged or
//! partial downloads abandoned by an earlier run. Only files named after the
//! executable with one of the update suffixes are considered.

use crate::update::paths::{BACKUP_SUFFIX, PARTIAL_SUFFIX, STAGED_SUFFIX};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a reaper run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    /// Artifacts deleted.
    pub removed: Vec<PathBuf>,
    /// Artifacts that could not be deleted, with the reason. Retried next launch.
    pub failed: Vec<(PathBuf, String)>,
    /// Artifacts deliberately kept because the executable itself is missing.
    pub kept: Vec<PathBuf>,
}

impl ReapReport {
    /// Returns `true` if nothing was found.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.failed.is_empty() && self.kept.is_empty()
    }
}

/// Returns `true` if `candidate` is an update artifact of `exe_name`:
/// `<exe>.bak`, `<exe>.<millis>.bak`, `<exe>.new`, or `<exe>.new.part`.
pub fn is_update_artifact(exe_name: &str, candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(exe_name) else {
        return false;
    };
    if rest == BACKUP_SUFFIX || rest == STAGED_SUFFIX {
        return true;
    }
    if rest == format!("{STAGED_SUFFIX}{PARTIAL_SUFFIX}") {
        return true;
    }
    // Alternate backup name used when the plain one was locked.
    rest.strip_prefix('.')
        .and_then(|r| r.strip_suffix(BACKUP_SUFFIX))
        .is_some_and(|stamp| !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit()))
}

/// Delete update leftovers next to `executable`.
///
/// Never fails: every problem is logged and reported. If the executable is
/// missing or empty the leftovers are kept, since a backup may then be the
/// only launchable copy.
pub fn cleanup_on_startup(executable: &Path) -> ReapReport {
    let mut report = ReapReport::default();

    let Some(exe_name) = executable.file_name().and_then(|n| n.to_str()) else {
        warn!(path = %executable.display(), "reaper: executable has no usable file name");
        return report;
    };
    let dir = executable.parent().unwrap_or_else(|| Path::new("."));

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "reaper: cannot scan executable directory");
            return report;
        }
    };

    let artifacts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| is_update_artifact(exe_name, name))
        })
        .map(|entry| entry.path())
        .collect();

    if artifacts.is_empty() {
        debug!(dir = %dir.display(), "reaper: nothing to clean");
        return report;
    }

    let executable_ok = std::fs::metadata(executable).is_ok_and(|m| m.is_file() && m.len() > 0);
    if !executable_ok {
        warn!(
            path = %executable.display(),
            "reaper: executable missing or empty, keeping update artifacts for recovery"
        );
        report.kept = artifacts;
        return report;
    }

    for path in artifacts {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "reaper: removed update leftover");
                report.removed.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reaper: cannot remove update leftover");
                report.failed.push((path, e.to_string()));
            }
        }
    }

    report
}
