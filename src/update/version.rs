//! Numeric release version ordering.
//!
//! Release tags are compared field by field as integers, so `1.10.0` sorts
//! after `1.9.0`. String comparison is never used.

use crate::error::{Result, UpdateError};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` release version.
///
/// Field order matters: the derived `Ord` compares `major`, then `minor`,
/// then `patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemanticVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of the running build.
    pub fn current() -> Self {
        // CARGO_PKG_VERSION_* are always plain integers.
        Self::new(
            env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        )
    }

    /// Parse a release tag such as `v1.2.3`, `1.2`, or `1.2.3+build.7`.
    ///
    /// Missing trailing components are zero. Pre-release suffixes
    /// (`1.2.3-rc1`) and non-numeric components are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Parse`] if the tag is not a plain numeric version.
    pub fn parse(tag: &str) -> Result<Self> {
        let trimmed = tag.trim();
        let without_prefix = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // semver wants all three components; release tags sometimes omit them.
        let split = without_prefix
            .find(['-', '+'])
            .unwrap_or(without_prefix.len());
        let (core, suffix) = without_prefix.split_at(split);
        let missing = 2usize.saturating_sub(core.matches('.').count());
        let padded = format!("{core}{}{suffix}", ".0".repeat(missing));

        let parsed = semver::Version::parse(&padded)
            .map_err(|e| UpdateError::Parse(format!("invalid version tag {tag:?}: {e}")))?;
        if !parsed.pre.is_empty() {
            return Err(UpdateError::Parse(format!(
                "pre-release tag {tag:?} is not offered as an update"
            )));
        }

        Ok(Self::new(parsed.major, parsed.minor, parsed.patch))
    }
}

impl FromStr for SemanticVersion {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Returns `true` if `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: SemanticVersion, current: SemanticVersion) -> bool {
    candidate > current
}
