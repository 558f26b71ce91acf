//! Self-update system for TaskMaster.
//!
//! Checks the GitHub release feed for a newer version, downloads the asset
//! for this platform next to the executable, and swaps it in with a
//! same-directory rename that rolls back on failure. Leftovers from earlier
//! updates are removed on the next launch.

pub mod applier;
pub mod checker;
pub mod controller;
pub mod download;
pub mod events;
pub mod paths;
pub mod reaper;
pub mod state;
pub mod version;

pub use applier::ScheduledRestart;
pub use checker::{ReleaseAsset, ReleaseClient, ReleaseInfo};
pub use controller::{ApplyBarrier, CheckOutcome, NoopBarrier, PendingUpdate, UpdateController};
pub use download::{CancelToken, DownloadManager, DownloadOutcome, DownloadProgress};
pub use events::UpdateEvent;
pub use paths::{SwapPlan, UpdatePaths};
pub use reaper::ReapReport;
pub use state::UpdateSession;
pub use version::SemanticVersion;
