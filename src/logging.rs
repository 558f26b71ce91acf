//! Tracing setup for the host application.
//!
//! Logs go to stderr and to a daily rolling file under the logs directory.
//! The returned guard must be kept alive for the life of the process or
//! buffered file output is lost.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "taskmaster=info,ureq=warn";

/// Log file name prefix; the appender adds the date suffix.
const LOG_FILE_PREFIX: &str = "taskmaster.log";

/// Build the env filter, preferring `RUST_LOG` over [`DEFAULT_FILTER`].
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
///
/// Returns `None` if a global subscriber was already installed (e.g. by a
/// test harness); logging keeps working through the existing one.
pub fn init_logging(logs_dir: &Path) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(logs_dir) {
        eprintln!("cannot create log directory {}: {e}", logs_dir.display());
    }

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(std::io::stderr.and(file_writer))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            logs = %logs_dir.display(),
            "logging initialised"
        );
        Some(guard)
    } else {
        None
    }
}
