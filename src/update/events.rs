//! Events delivered to the update presenter (the GUI).
//!
//! Emitted from worker threads over a channel; the UI thread drains them.
//! No variant requires the presenter to block.

use crate::update::checker::ReleaseInfo;
use crate::update::controller::PendingUpdate;
use crate::update::download::DownloadProgress;
use std::path::PathBuf;

#[derive(Debug)]
pub enum UpdateEvent {
    /// A newer release exists. Show the badge / notice.
    UpdateAvailable(ReleaseInfo),
    /// The running build is current, or the check could not be completed.
    /// Check failures are deliberately reported this way.
    NoUpdateAvailable,
    /// Throttled download progress.
    DownloadProgress(DownloadProgress),
    /// Download verified and staged. Call [`PendingUpdate::apply`] once the
    /// user confirms the restart.
    UpdateReady(PendingUpdate),
    /// The user cancelled the download; nothing was left behind.
    DownloadCancelled,
    /// The download failed. Retryable, shown as a dismissible notice.
    UpdateCheckFailed { reason: String },
    /// The swap failed and the previous executable could not be restored.
    /// Must be shown prominently: the user may have to rename `backup` back
    /// to `executable` or reinstall.
    ManualRecoveryRequired {
        executable: PathBuf,
        backup: PathBuf,
        reason: String,
    },
}

impl UpdateEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateAvailable(_) => "update_available",
            Self::NoUpdateAvailable => "no_update_available",
            Self::DownloadProgress(_) => "download_progress",
            Self::UpdateReady(_) => "update_ready",
            Self::DownloadCancelled => "download_cancelled",
            Self::UpdateCheckFailed { .. } => "update_check_failed",
            Self::ManualRecoveryRequired { .. } => "manual_recovery_required",
        }
    }
}
