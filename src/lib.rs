//! TaskMaster: desktop task manager, self-update core.
//!
//! This crate keeps an installed TaskMaster executable current:
//! Release feed → Version check → Download → Verify → Swap → Restart
//!
//! # Architecture
//!
//! - **Release client**: one HTTP request to the release feed via `ureq`
//! - **Download manager**: streams the asset to a `.part` file with progress,
//!   cancellation, and size/checksum verification
//! - **Applier**: renames the running executable to `.bak` and the download
//!   into place, restoring the backup if the second step fails
//! - **Reaper**: deletes update leftovers on the next launch
//! - **Controller**: runs all of the above on worker threads and reports to
//!   the GUI through [`UpdateEvent`]s

pub mod app_dirs;
pub mod config;
pub mod error;
pub mod logging;
pub mod update;

pub use config::{TaskMasterConfig, UpdateConfig};
pub use error::{Result, UpdateError};
pub use update::{UpdateController, UpdateEvent};
