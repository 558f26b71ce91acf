//! Per-run update state.
//!
//! Tracks which release was announced or declined, when the feed was last
//! checked, and whether the staged-update slot is taken. Kept in memory
//! only: a declined release is offered again after the next launch.

use crate::update::version::{SemanticVersion, is_newer};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Update state for one process run.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    /// Version of the running build.
    pub current_version: SemanticVersion,
    /// Newest release already announced to the presenter this run.
    pub announced: Option<SemanticVersion>,
    /// Release the user dismissed this run.
    pub declined: Option<SemanticVersion>,
    /// Release installed this run (waiting for restart).
    pub applied: Option<SemanticVersion>,
    /// Time of the last completed feed check.
    pub last_check: Option<DateTime<Utc>>,
    staging_busy: bool,
}

impl UpdateSession {
    pub fn new(current_version: SemanticVersion) -> Self {
        Self {
            current_version,
            announced: None,
            declined: None,
            applied: None,
            last_check: None,
            staging_busy: false,
        }
    }

    /// Record that a feed check finished at `now`.
    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_check = Some(now);
    }

    /// Returns `true` if no check ran yet or the last one is at least
    /// `interval` old.
    pub fn check_is_stale(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_check else {
            return true;
        };
        // A clock that jumped backwards counts as stale.
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= interval,
            Err(_) => true,
        }
    }

    /// Decide whether `candidate` should be announced.
    ///
    /// A background check announces each release once; a user-initiated
    /// check (`forced`) announces it again. A declined or already applied
    /// release is never announced again this run.
    pub fn should_announce(&self, candidate: SemanticVersion, forced: bool) -> bool {
        if !is_newer(candidate, self.current_version) {
            return false;
        }
        if self.declined == Some(candidate) || self.applied == Some(candidate) {
            return false;
        }
        forced || self.announced != Some(candidate)
    }

    pub fn mark_announced(&mut self, version: SemanticVersion) {
        self.announced = Some(version);
    }

    pub fn mark_declined(&mut self, version: SemanticVersion) {
        self.declined = Some(version);
    }

    pub fn mark_applied(&mut self, version: SemanticVersion) {
        self.applied = Some(version);
    }

    /// Claim exclusive use of the staged-update path, held by a running
    /// download or an apply. Returns `false` if it is already taken.
    pub fn try_claim_staging(&mut self) -> bool {
        if self.staging_busy {
            return false;
        }
        self.staging_busy = true;
        true
    }

    pub fn release_staging(&mut self) {
        self.staging_busy = false;
    }

    pub fn staging_busy(&self) -> bool {
        self.staging_busy
    }
}
