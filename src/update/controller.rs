//! Background orchestration of the update flow.
//!
//! The controller owns the per-run [`UpdateSession`], runs network and disk
//! work on named worker threads, and reports to the GUI only through
//! [`UpdateEvent`]s. It never touches UI state directly.
//!
//! Flow: [`UpdateController::start`] reaps leftovers and schedules a check,
//! `UpdateAvailable` → user consents → [`UpdateController::spawn_download`] →
//! `UpdateReady` → user confirms restart → [`PendingUpdate::apply`].

use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use crate::update::applier::{self, ScheduledRestart, StdFs, SwapFs};
use crate::update::checker::{ReleaseClient, ReleaseInfo};
use crate::update::download::{
    CancelToken, CompletedDownload, DownloadManager, DownloadOutcome, ExpectedAsset, sha256_file,
};
use crate::update::events::UpdateEvent;
use crate::update::paths::{SwapPlan, UpdatePaths};
use crate::update::reaper::{self, ReapReport};
use crate::update::state::UpdateSession;
use crate::update::version::{SemanticVersion, is_newer};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Host hook run right before the executable swap.
///
/// Implementations stop background work and finish any write to the task
/// data file. Returning an error aborts the apply with nothing changed.
pub trait ApplyBarrier {
    fn quiesce(&self) -> std::result::Result<(), String>;
}

/// Barrier for hosts with nothing to pause.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBarrier;

impl ApplyBarrier for NoopBarrier {
    fn quiesce(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// What a single release check concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// A newer release was announced.
    Announced(SemanticVersion),
    /// Newer release exists but was already announced, declined, or applied.
    Suppressed(SemanticVersion),
    /// Running the newest release, or nothing published for this platform.
    UpToDate,
    /// The check failed; reported to the presenter as "no update".
    Unavailable(String),
    /// Not run: disabled, too soon, or another check/download is busy.
    Skipped,
}

#[derive(Debug)]
struct Inner {
    config: UpdateConfig,
    client: ReleaseClient,
    downloader: DownloadManager,
    paths: UpdatePaths,
    session: Mutex<UpdateSession>,
    events: Sender<UpdateEvent>,
    check_in_flight: AtomicBool,
    active_download: Mutex<Option<CancelToken>>,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, UpdateSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_download(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.active_download.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: UpdateEvent) {
        let kind = event.kind();
        debug!(event = kind, "update event");
        if self.events.send(event).is_err() {
            debug!(event = kind, "no presenter listening, update event dropped");
        }
    }
}

/// Exclusive use of the staged-update path. Released on drop.
struct StagingClaim {
    inner: Arc<Inner>,
}

impl StagingClaim {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        if inner.session().try_claim_staging() {
            Some(Self {
                inner: Arc::clone(inner),
            })
        } else {
            None
        }
    }
}

impl Drop for StagingClaim {
    fn drop(&mut self) {
        self.inner.session().release_staging();
    }
}

/// Entry point for the host application.
///
/// Events are queued without bound until the presenter drains
/// [`UpdateController::events`]. Queued events are dropped once the last
/// controller handle and receiver are gone.
#[derive(Debug, Clone)]
pub struct UpdateController {
    inner: Arc<Inner>,
    receiver: Receiver<UpdateEvent>,
}

impl UpdateController {
    /// Create a controller for an explicit executable and version.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the config fails validation.
    pub fn new(
        config: UpdateConfig,
        current_version: SemanticVersion,
        paths: UpdatePaths,
    ) -> Result<Self> {
        config.validate()?;
        let (events, receiver) = crossbeam_channel::unbounded();
        Ok(Self {
            inner: Arc::new(Inner {
                client: ReleaseClient::new(&config),
                downloader: DownloadManager::new(&config),
                config,
                paths,
                session: Mutex::new(UpdateSession::new(current_version)),
                events,
                check_in_flight: AtomicBool::new(false),
                active_download: Mutex::new(None),
            }),
            receiver,
        })
    }

    /// Create a controller for the running process and build version.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the executable path
    /// cannot be determined.
    pub fn for_current_process(config: UpdateConfig) -> Result<Self> {
        Self::new(config, SemanticVersion::current(), UpdatePaths::current()?)
    }

    /// Receiver for presenter events. Drain it on the UI thread.
    pub fn events(&self) -> Receiver<UpdateEvent> {
        self.receiver.clone()
    }

    /// Snapshot of the session state.
    pub fn session(&self) -> UpdateSession {
        self.inner.session().clone()
    }

    pub fn paths(&self) -> &UpdatePaths {
        &self.inner.paths
    }

    /// Delete leftovers of earlier updates. Call once, early, before any check.
    pub fn reap_stale_files(&self) -> ReapReport {
        let report = reaper::cleanup_on_startup(&self.inner.paths.executable);
        if !report.is_noop() {
            info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                kept = report.kept.len(),
                "startup update cleanup finished"
            );
        }
        report
    }

    /// Startup sequence: reap leftovers, then schedule a background check
    /// after the configured delay.
    ///
    /// Returns the check thread handle, or `None` if checks are disabled.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        self.reap_stale_files();
        if !self.inner.config.enabled {
            info!("update checks disabled");
            return None;
        }
        let this = self.clone();
        let delay = self.inner.config.startup_delay();
        spawn_named("taskmaster-update-startup", move || {
            std::thread::sleep(delay);
            this.check(false);
        })
    }

    /// Run a check on a worker thread. `forced` marks a user-initiated
    /// check, which bypasses the interval and re-announces a known release.
    pub fn spawn_check(&self, forced: bool) -> Option<JoinHandle<()>> {
        let this = self.clone();
        spawn_named("taskmaster-update-check", move || {
            this.check(forced);
        })
    }

    /// Query the feed and emit `UpdateAvailable` or `NoUpdateAvailable`.
    ///
    /// Blocks for at most the configured check timeout. Check failures never
    /// produce `UpdateCheckFailed`.
    pub fn check(&self, forced: bool) -> CheckOutcome {
        let inner = &self.inner;
        if !forced && !inner.config.enabled {
            return CheckOutcome::Skipped;
        }
        {
            let session = inner.session();
            if session.staging_busy() {
                debug!("update check ignored, download or apply in progress");
                return CheckOutcome::Skipped;
            }
            if !forced
                && !session.check_is_stale(inner.config.min_check_interval(), chrono::Utc::now())
            {
                debug!("update check skipped, checked recently");
                return CheckOutcome::Skipped;
            }
        }
        if inner.check_in_flight.swap(true, Ordering::SeqCst) {
            debug!("update check already running");
            return CheckOutcome::Skipped;
        }

        let result = inner
            .client
            .fetch_latest_release(inner.config.check_timeout());
        inner.check_in_flight.store(false, Ordering::SeqCst);

        let mut session = inner.session();
        session.mark_checked(chrono::Utc::now());
        let current = session.current_version;

        match result {
            Ok(release) if session.should_announce(release.version, forced) => {
                let version = release.version;
                session.mark_announced(version);
                drop(session);
                info!(%current, available = %version, "update available");
                inner.emit(UpdateEvent::UpdateAvailable(release));
                CheckOutcome::Announced(version)
            }
            Ok(release) if is_newer(release.version, current) => {
                drop(session);
                debug!(available = %release.version, "update already announced or declined");
                // A user-initiated check always gets an answer.
                if forced {
                    inner.emit(UpdateEvent::NoUpdateAvailable);
                }
                CheckOutcome::Suppressed(release.version)
            }
            Ok(release) => {
                drop(session);
                info!(%current, latest = %release.version, "running the latest release");
                inner.emit(UpdateEvent::NoUpdateAvailable);
                CheckOutcome::UpToDate
            }
            Err(e) if e.is_nothing_to_update() => {
                drop(session);
                info!(%current, reason = %e, "no installable release");
                inner.emit(UpdateEvent::NoUpdateAvailable);
                CheckOutcome::UpToDate
            }
            Err(e) => {
                drop(session);
                warn!(error = %e, "update check failed, skipping for this run");
                inner.emit(UpdateEvent::NoUpdateAvailable);
                CheckOutcome::Unavailable(e.to_string())
            }
        }
    }

    /// The user dismissed `version`; do not announce it again this run.
    pub fn decline(&self, version: SemanticVersion) {
        info!(%version, "update declined");
        self.inner.session().mark_declined(version);
    }

    /// Download `release` on a worker thread.
    ///
    /// Ignored (returns `None`) while another download or an apply holds the
    /// staged-update path.
    pub fn spawn_download(&self, release: ReleaseInfo) -> Option<JoinHandle<()>> {
        let Some(claim) = StagingClaim::acquire(&self.inner) else {
            debug!(version = %release.version, "download request ignored, one is already running");
            return None;
        };
        let inner = Arc::clone(&self.inner);
        spawn_named("taskmaster-update-download", move || {
            run_download(&inner, claim, release);
        })
    }

    /// Download `release` on the calling thread. Returns `false` if another
    /// download or apply is in progress.
    pub fn download(&self, release: ReleaseInfo) -> bool {
        let Some(claim) = StagingClaim::acquire(&self.inner) else {
            return false;
        };
        run_download(&self.inner, claim, release);
        true
    }

    /// Cancel the running download, if any.
    pub fn cancel_download(&self) -> bool {
        match self.inner.active_download().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn run_download(inner: &Arc<Inner>, claim: StagingClaim, release: ReleaseInfo) {
    let cancel = CancelToken::new();
    *inner.active_download() = Some(cancel.clone());

    info!(version = %release.version, url = %release.asset.url, "downloading update");
    let result = inner.downloader.download(
        &release.asset.url,
        &inner.paths.staged,
        &ExpectedAsset::from(&release.asset),
        &cancel,
        |progress| inner.emit(UpdateEvent::DownloadProgress(progress)),
    );

    *inner.active_download() = None;
    // Release before announcing so the presenter can apply right away.
    drop(claim);

    match result {
        Ok(DownloadOutcome::Completed(download)) => {
            inner.emit(UpdateEvent::UpdateReady(PendingUpdate {
                plan: inner.paths.swap_plan(),
                release,
                download,
                inner: Arc::clone(inner),
            }));
        }
        Ok(DownloadOutcome::Cancelled) => inner.emit(UpdateEvent::DownloadCancelled),
        Err(e) => inner.emit(UpdateEvent::UpdateCheckFailed {
            reason: e.to_string(),
        }),
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> Option<JoinHandle<()>> {
    match std::thread::Builder::new().name(name.to_owned()).spawn(f) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(thread = name, error = %e, "cannot spawn update worker");
            None
        }
    }
}

/// A verified download waiting for the user to confirm the restart.
#[derive(Debug)]
pub struct PendingUpdate {
    pub release: ReleaseInfo,
    pub download: CompletedDownload,
    plan: SwapPlan,
    inner: Arc<Inner>,
}

impl PendingUpdate {
    pub fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    /// Swap the staged executable in and return the restart to perform.
    ///
    /// Runs `barrier` first so the host can stop writing its data file.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::HostNotReady`] if a download is running or the
    ///   barrier refused
    /// - [`UpdateError::Integrity`] if the staged file changed since download
    /// - any applier error; [`UpdateError::RollbackFailed`] is additionally
    ///   emitted as `ManualRecoveryRequired`
    pub fn apply(self, barrier: &dyn ApplyBarrier) -> Result<ScheduledRestart> {
        self.apply_using(&StdFs, barrier)
    }

    fn apply_using(self, fs: &impl SwapFs, barrier: &dyn ApplyBarrier) -> Result<ScheduledRestart> {
        let Some(_claim) = StagingClaim::acquire(&self.inner) else {
            return Err(UpdateError::HostNotReady(
                "another download or update is in progress".to_owned(),
            ));
        };

        barrier.quiesce().map_err(UpdateError::HostNotReady)?;

        let digest = sha256_file(&self.plan.new_executable).map_err(|e| {
            UpdateError::Integrity(format!(
                "cannot read staged update {}: {e}",
                self.plan.new_executable.display()
            ))
        })?;
        if digest != self.download.sha256 {
            return Err(UpdateError::Integrity(
                "staged update changed since it was downloaded".to_owned(),
            ));
        }

        match applier::apply_with(fs, &self.plan) {
            Ok(restart) => {
                self.inner.session().mark_applied(self.release.version);
                Ok(restart)
            }
            Err(UpdateError::RollbackFailed {
                executable,
                backup,
                reason,
            }) => {
                error!(
                    executable = %executable.display(),
                    backup = %backup.display(),
                    "manual recovery required"
                );
                self.inner.emit(UpdateEvent::ManualRecoveryRequired {
                    executable: executable.clone(),
                    backup: backup.clone(),
                    reason: reason.clone(),
                });
                Err(UpdateError::RollbackFailed {
                    executable,
                    backup,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the staged download (the user chose "later").
    pub fn discard(self) {
        let Some(_claim) = StagingClaim::acquire(&self.inner) else {
            return;
        };
        match std::fs::remove_file(&self.plan.new_executable) {
            Ok(()) => debug!(path = %self.plan.new_executable.display(), "staged update discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.plan.new_executable.display(),
                error = %e,
                "cannot discard staged update, reaper will retry"
            ),
        }
    }
}
