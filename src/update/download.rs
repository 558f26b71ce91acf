//! Streaming download of a release asset next to the executable.
//!
//! Bytes are written to `<destination>.part`, verified, flushed to disk, and
//! only then renamed to `destination`. Any failure or cancellation deletes
//! the partial file, so the applier never sees a half-written artifact.

use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use crate::update::checker::ReleaseAsset;
use crate::update::paths::partial_path;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Read buffer size for the response stream.
const CHUNK_SIZE: usize = 64 * 1024;

/// Free space required beyond the asset itself.
const DISK_SPACE_HEADROOM: u64 = 16 * 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Cooperative cancellation flag shared between the UI and a download.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a [`DownloadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// A progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_received: u64,
    /// Total size, if known from the release feed or `Content-Length`.
    pub bytes_total: Option<u64>,
}

impl DownloadProgress {
    /// Completion in `[0.0, 1.0]`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_received as f64 / total as f64).min(1.0)),
        }
    }
}

/// Bookkeeping for one download. Lives only for the duration of one
/// [`DownloadManager::download`] call.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub source_url: String,
    pub destination: PathBuf,
    pub partial_path: PathBuf,
    pub bytes_total: Option<u64>,
    pub bytes_received: u64,
    pub state: DownloadState,
}

impl DownloadTask {
    fn new(source_url: &str, destination: &Path) -> Self {
        Self {
            source_url: source_url.to_owned(),
            destination: destination.to_owned(),
            partial_path: partial_path(destination),
            bytes_total: None,
            bytes_received: 0,
            state: DownloadState::Pending,
        }
    }

    fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            bytes_received: self.bytes_received,
            bytes_total: self.bytes_total,
        }
    }
}

/// Values the finished download must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedAsset {
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 digest.
    pub sha256: Option<String>,
}

impl From<&ReleaseAsset> for ExpectedAsset {
    fn from(asset: &ReleaseAsset) -> Self {
        Self {
            size: asset.size,
            sha256: asset.sha256.clone(),
        }
    }
}

/// A verified download sitting at its destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Terminal outcome of a download that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed(CompletedDownload),
    /// Cancelled by the caller; partial data was removed.
    Cancelled,
}

/// Rate limiter for progress callbacks.
#[derive(Debug)]
struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Downloads release assets over HTTP.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    user_agent: String,
    stall_timeout: Duration,
    progress_interval: Duration,
}

impl DownloadManager {
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            stall_timeout: config.stall_timeout(),
            progress_interval: config.progress_interval(),
        }
    }

    /// Download `url` to `destination`.
    ///
    /// `on_progress` receives an initial snapshot, throttled updates, and a
    /// final snapshot once all bytes are on disk.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::Network`] on HTTP or transport failures
    /// - [`UpdateError::Disk`] / [`UpdateError::Permission`] on write failures
    ///   or insufficient free space
    /// - [`UpdateError::Integrity`] if the result is empty, the wrong size, or
    ///   fails its checksum
    ///
    /// In every error case neither the partial file nor `destination` exist
    /// afterwards.
    pub fn download(
        &self,
        url: &str,
        destination: &Path,
        expected: &ExpectedAsset,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(DownloadProgress),
    ) -> Result<DownloadOutcome> {
        let mut task = DownloadTask::new(url, destination);

        // Leftovers from a crashed earlier attempt.
        remove_if_exists(&task.partial_path)?;
        remove_if_exists(&task.destination)?;

        let result = self.run(&mut task, expected, cancel, &mut on_progress);
        match &result {
            Ok(DownloadOutcome::Completed(done)) => {
                task.state = DownloadState::Completed;
                info!(
                    url,
                    path = %done.path.display(),
                    bytes = done.bytes,
                    state = ?task.state,
                    "update download complete"
                );
            }
            Ok(DownloadOutcome::Cancelled) => {
                task.state = DownloadState::Cancelled;
                discard(&task);
                info!(
                    url,
                    received = task.bytes_received,
                    state = ?task.state,
                    "update download cancelled"
                );
            }
            Err(e) => {
                task.state = DownloadState::Failed;
                discard(&task);
                warn!(
                    url,
                    received = task.bytes_received,
                    state = ?task.state,
                    error = %e,
                    "update download failed"
                );
            }
        }
        result
    }

    fn run(
        &self,
        task: &mut DownloadTask,
        expected: &ExpectedAsset,
        cancel: &CancelToken,
        on_progress: &mut impl FnMut(DownloadProgress),
    ) -> Result<DownloadOutcome> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(self.stall_timeout)
            .user_agent(&self.user_agent)
            .build();

        let resp = agent
            .get(&task.source_url)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    UpdateError::Network(format!("asset download returned HTTP {code}"))
                }
                ureq::Error::Transport(t) => {
                    UpdateError::Network(format!("asset download failed: {t}"))
                }
            })?;

        let content_length = resp
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let (Some(want), Some(got)) = (expected.size, content_length)
            && want != got
        {
            return Err(UpdateError::Integrity(format!(
                "server announced {got} bytes, release lists {want}"
            )));
        }
        task.bytes_total = expected.size.or(content_length);

        if let Some(total) = task.bytes_total {
            let dir = task.destination.parent().unwrap_or_else(|| Path::new("."));
            ensure_disk_space(dir, total)?;
        }

        task.state = DownloadState::InProgress;
        debug!(
            url = %task.source_url,
            total = ?task.bytes_total,
            state = ?task.state,
            "update download started"
        );

        let Some(sha256) = self.stream(resp.into_reader(), task, cancel, on_progress)? else {
            return Ok(DownloadOutcome::Cancelled);
        };

        verify(task, expected, &sha256)?;
        on_progress(task.progress());

        std::fs::rename(&task.partial_path, &task.destination).map_err(|e| {
            UpdateError::from_fs(
                format!(
                    "cannot move {} to {}",
                    task.partial_path.display(),
                    task.destination.display()
                ),
                &e,
            )
        })?;

        Ok(DownloadOutcome::Completed(CompletedDownload {
            path: task.destination.clone(),
            bytes: task.bytes_received,
            sha256,
        }))
    }

    /// Copy the body into the partial file. Returns the hex digest, or `None`
    /// if cancelled.
    fn stream(
        &self,
        mut reader: impl Read,
        task: &mut DownloadTask,
        cancel: &CancelToken,
        on_progress: &mut impl FnMut(DownloadProgress),
    ) -> Result<Option<String>> {
        let mut file = std::fs::File::create(&task.partial_path).map_err(|e| {
            UpdateError::from_fs(format!("cannot create {}", task.partial_path.display()), &e)
        })?;
        let mut hasher = Sha256::new();
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut buf = vec![0u8; CHUNK_SIZE];

        throttle.ready();
        on_progress(task.progress());

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(UpdateError::Network(format!(
                        "download interrupted after {} bytes: {e}",
                        task.bytes_received
                    )));
                }
            };

            file.write_all(&buf[..n]).map_err(|e| {
                UpdateError::from_fs(format!("cannot write {}", task.partial_path.display()), &e)
            })?;
            hasher.update(&buf[..n]);
            task.bytes_received += n as u64;

            if let Some(total) = task.bytes_total
                && task.bytes_received > total
            {
                return Err(UpdateError::Integrity(format!(
                    "received more than the expected {total} bytes"
                )));
            }

            if throttle.ready() {
                on_progress(task.progress());
            }
        }

        file.sync_all().map_err(|e| {
            UpdateError::from_fs(format!("cannot flush {}", task.partial_path.display()), &e)
        })?;

        Ok(Some(format!("{:x}", hasher.finalize())))
    }
}

fn verify(task: &DownloadTask, expected: &ExpectedAsset, sha256: &str) -> Result<()> {
    if task.bytes_received == 0 {
        return Err(UpdateError::Integrity("downloaded file is empty".to_owned()));
    }
    if let Some(total) = task.bytes_total
        && task.bytes_received != total
    {
        return Err(UpdateError::Integrity(format!(
            "downloaded {} of {total} bytes",
            task.bytes_received
        )));
    }
    if let Some(want) = &expected.sha256
        && !want.eq_ignore_ascii_case(sha256)
    {
        return Err(UpdateError::Integrity(format!(
            "sha256 mismatch: expected {want}, got {sha256}"
        )));
    }
    Ok(())
}

/// SHA-256 hex digest of a file, read in chunks.
pub(crate) fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Best-effort removal of everything a failed or cancelled task wrote.
fn discard(task: &DownloadTask) {
    for path in [&task.partial_path, &task.destination] {
        if let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "cannot remove incomplete download");
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale download artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::from_fs(
            format!("cannot remove stale {}", path.display()),
            &e,
        )),
    }
}

fn ensure_disk_space(dir: &Path, required: u64) -> Result<()> {
    let free = available_disk_space(dir)?;
    if free < required.saturating_add(DISK_SPACE_HEADROOM) {
        return Err(UpdateError::Disk(format!(
            "not enough free space in {}: {free} bytes free, {required} needed",
            dir.display()
        )));
    }
    Ok(())
}

/// Bytes an unprivileged process may still write on the filesystem holding
/// `path`. Always `u64::MAX` off Unix, where the check is skipped.
///
/// # Errors
///
/// Returns [`UpdateError::Disk`] if `statvfs` fails for `path`.
#[cfg(unix)]
pub fn available_disk_space(path: &Path) -> Result<u64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        UpdateError::Disk(format!("path {} contains a NUL byte", path.display()))
    })?;

    let mut fs_stats = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `fs_stats` is only read after
    // statvfs reports success, at which point it has been filled in.
    let fs_stats = unsafe {
        if libc::statvfs(c_path.as_ptr(), fs_stats.as_mut_ptr()) != 0 {
            let err = std::io::Error::last_os_error();
            return Err(UpdateError::Disk(format!(
                "cannot query free space on {}: {err}",
                path.display()
            )));
        }
        fs_stats.assume_init()
    };

    let blocks = u64::from(fs_stats.f_bavail);
    let block_size = u64::from(fs_stats.f_frsize);
    Ok(blocks.saturating_mul(block_size))
}

#[cfg(not(unix))]
pub fn available_disk_space(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::net::TcpListener;

    /// Serve one HTTP response announcing `content_length` bytes but sending
    /// `body`, then close the connection.
    fn serve_once(content_length: usize, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });
        format!("http://{addr}/TaskMaster")
    }

    fn manager(progress_interval_ms: u64) -> DownloadManager {
        DownloadManager::new(&UpdateConfig {
            progress_interval_ms,
            stall_timeout_secs: 5,
            ..Default::default()
        })
    }

    fn sha256_of(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    #[test]
    fn completes_and_reports_progress() {
        let body = vec![7u8; 300_000];
        let url = serve_once(body.len(), body.clone());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");

        let mut snapshots = Vec::new();
        let outcome = manager(0)
            .download(
                &url,
                &dest,
                &ExpectedAsset::default(),
                &CancelToken::new(),
                |p| snapshots.push(p),
            )
            .unwrap();

        let DownloadOutcome::Completed(done) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(done.path, dest);
        assert_eq!(done.bytes, body.len() as u64);
        assert_eq!(done.sha256, sha256_of(&body));
        assert_eq!(sha256_file(&dest).unwrap(), done.sha256);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!partial_path(&dest).exists());

        assert_eq!(snapshots.first().unwrap().bytes_received, 0);
        let last = snapshots.last().unwrap();
        assert_eq!(last.bytes_received, body.len() as u64);
        assert_eq!(last.bytes_total, Some(body.len() as u64));
        assert!(snapshots.windows(2).all(|w| w[0].bytes_received <= w[1].bytes_received));
    }

    #[test]
    fn progress_is_throttled() {
        let body = vec![1u8; 512 * 1024];
        let url = serve_once(body.len(), body);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");

        let mut count = 0usize;
        manager(3_600_000)
            .download(
                &url,
                &dest,
                &ExpectedAsset::default(),
                &CancelToken::new(),
                |_| count += 1,
            )
            .unwrap();
        // Initial and final snapshots only.
        assert_eq!(count, 2);
    }

    #[test]
    fn truncated_body_leaves_no_files() {
        let url = serve_once(100_000, vec![9u8; 40_000]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");

        let result = manager(0).download(
            &url,
            &dest,
            &ExpectedAsset::default(),
            &CancelToken::new(),
            |_| {},
        );

        assert!(
            matches!(result, Err(UpdateError::Network(_) | UpdateError::Integrity(_))),
            "unexpected result {result:?}"
        );
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn empty_body_is_integrity_error() {
        let url = serve_once(0, Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");

        let result = manager(0).download(
            &url,
            &dest,
            &ExpectedAsset::default(),
            &CancelToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(UpdateError::Integrity(_))));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn checksum_mismatch_is_integrity_error() {
        let body = b"new executable".to_vec();
        let url = serve_once(body.len(), body);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");
        let expected = ExpectedAsset {
            size: None,
            sha256: Some(sha256_of(b"something else")),
        };

        let result = manager(0).download(&url, &dest, &expected, &CancelToken::new(), |_| {});
        assert!(matches!(result, Err(UpdateError::Integrity(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn size_disagreement_is_rejected_before_writing() {
        let body = vec![3u8; 1000];
        let url = serve_once(body.len(), body);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");
        let expected = ExpectedAsset {
            size: Some(2000),
            sha256: None,
        };

        let result = manager(0).download(&url, &dest, &expected, &CancelToken::new(), |_| {});
        assert!(matches!(result, Err(UpdateError::Integrity(_))));
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn cancellation_cleans_up() {
        let body = vec![5u8; 200_000];
        let url = serve_once(body.len(), body);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");
        let cancel = CancelToken::new();

        let outcome = manager(0)
            .download(&url, &dest, &ExpectedAsset::default(), &cancel, |_| {
                cancel.cancel()
            })
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn stale_partial_is_replaced() {
        let body = b"fresh".to_vec();
        let url = serve_once(body.len(), body.clone());
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");
        std::fs::write(partial_path(&dest), b"stale half download").unwrap();

        manager(0)
            .download(
                &url,
                &dest,
                &ExpectedAsset::default(),
                &CancelToken::new(),
                |_| {},
            )
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[test]
    fn unreachable_server_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("TaskMaster.new");

        let result = manager(0).download(
            &format!("http://{addr}/x"),
            &dest,
            &ExpectedAsset::default(),
            &CancelToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(UpdateError::Network(_))));
    }

    #[test]
    fn throttle_allows_first_then_waits() {
        let mut slow = ProgressThrottle::new(Duration::from_secs(3600));
        assert!(slow.ready());
        assert!(!slow.ready());

        let mut fast = ProgressThrottle::new(Duration::ZERO);
        assert!(fast.ready());
        assert!(fast.ready());
    }

    #[test]
    fn progress_fraction() {
        let half = DownloadProgress {
            bytes_received: 50,
            bytes_total: Some(100),
        };
        assert_eq!(half.fraction(), Some(0.5));
        let unknown = DownloadProgress {
            bytes_received: 50,
            bytes_total: None,
        };
        assert_eq!(unknown.fraction(), None);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn disk_space_is_reported_for_temp_dir() {
        let free = available_disk_space(&std::env::temp_dir()).unwrap();
        assert!(free > 0);
    }
}
