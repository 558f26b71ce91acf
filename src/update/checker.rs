//! GitHub release checker for TaskMaster updates.
//!
//! Queries the release feed once per call, extracts the version tag, release
//! notes, and the asset for this platform. Retry cadence belongs to the
//! caller.

use crate::config::UpdateConfig;
use crate::error::{Result, UpdateError};
use crate::update::version::SemanticVersion;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// A published release, as seen by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Release version parsed from the tag.
    pub version: SemanticVersion,
    /// Installable asset for this platform.
    pub asset: ReleaseAsset,
    /// Release notes (markdown). Empty when the release has no body.
    pub notes: String,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Human-facing release page, if the feed provided one.
    pub page_url: Option<String>,
}

/// A single downloadable release asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    /// Asset filename (e.g. `TaskMaster.exe`).
    pub name: String,
    /// Direct download URL.
    pub url: String,
    /// Size in bytes, if the feed reports it.
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 digest, if the feed reports it.
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseWire {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<AssetWire>,
}

#[derive(Debug, Deserialize)]
struct AssetWire {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
    // GitHub reports `sha256:<hex>` for newer uploads.
    #[serde(default)]
    digest: Option<String>,
}

/// Returns the default release asset name for the current OS and architecture.
///
/// Windows builds ship a single `TaskMaster.exe`; Linux builds are suffixed
/// with the architecture.
pub fn platform_asset_name() -> Option<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => Some("TaskMaster.exe"),
        ("linux", "x86_64") => Some("TaskMaster-linux-x86_64"),
        ("linux", "aarch64") => Some("TaskMaster-linux-aarch64"),
        _ => None,
    }
}

/// Client for the remote release feed.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    feed_url: String,
    user_agent: String,
    asset_name: Option<String>,
}

impl ReleaseClient {
    /// Create a client from the update configuration.
    ///
    /// An explicit `asset_name` in the config wins over the platform default.
    pub fn new(config: &UpdateConfig) -> Self {
        Self {
            feed_url: config.feed_url.clone(),
            user_agent: config.user_agent.clone(),
            asset_name: config
                .asset_name
                .clone()
                .or_else(|| platform_asset_name().map(str::to_owned)),
        }
    }

    /// The asset name this client installs, if this platform has one.
    pub fn asset_name(&self) -> Option<&str> {
        self.asset_name.as_deref()
    }

    /// Fetch the latest published release.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::NotFound`] if the feed answers 404 (no releases yet)
    /// - [`UpdateError::NoMatchingAsset`] if the release has nothing for this platform
    /// - [`UpdateError::Network`] on transport failures or other HTTP statuses
    /// - [`UpdateError::Parse`] on a malformed descriptor
    pub fn fetch_latest_release(&self, timeout: Duration) -> Result<ReleaseInfo> {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(&self.user_agent)
            .build();

        tracing::debug!(url = %self.feed_url, "checking release feed");
        let resp = match agent
            .get(&self.feed_url)
            .set("Accept", "application/vnd.github+json")
            .call()
        {
            Ok(resp) => resp,
            Err(ureq::Error::Status(404, _)) => return Err(UpdateError::NotFound),
            Err(ureq::Error::Status(code, resp)) => {
                return Err(UpdateError::Network(format!(
                    "release feed returned HTTP {code} {}",
                    resp.status_text()
                )));
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(UpdateError::Network(format!("release feed unreachable: {t}")));
            }
        };

        let body = resp
            .into_string()
            .map_err(|e| UpdateError::Network(format!("cannot read release feed body: {e}")))?;

        parse_release(&body, self.asset_name.as_deref())
    }
}

/// Parse a GitHub `releases/latest` descriptor and select the asset named
/// `asset_name` (ASCII case-insensitive).
///
/// # Errors
///
/// Returns [`UpdateError::Parse`] for malformed JSON, tags, or timestamps and
/// [`UpdateError::NoMatchingAsset`] when no asset matches.
pub fn parse_release(body: &str, asset_name: Option<&str>) -> Result<ReleaseInfo> {
    let wire: ReleaseWire = serde_json::from_str(body)
        .map_err(|e| UpdateError::Parse(format!("malformed release descriptor: {e}")))?;

    let version = SemanticVersion::parse(&wire.tag_name)?;
    let published_at = wire.published_at.ok_or_else(|| {
        UpdateError::Parse(format!("release {} has no published_at", wire.tag_name))
    })?;

    let Some(expected) = asset_name else {
        return Err(UpdateError::NoMatchingAsset {
            version: version.to_string(),
            expected: format!(
                "<none for {}-{}>",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        });
    };

    let asset = wire
        .assets
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(expected))
        .ok_or_else(|| UpdateError::NoMatchingAsset {
            version: version.to_string(),
            expected: expected.to_owned(),
        })?;

    let sha256 = asset
        .digest
        .as_deref()
        .and_then(|d| d.strip_prefix("sha256:"))
        .map(str::to_ascii_lowercase);

    Ok(ReleaseInfo {
        version,
        asset: ReleaseAsset {
            name: asset.name,
            url: asset.browser_download_url,
            size: asset.size.filter(|&s| s > 0),
            sha256,
        },
        notes: wire.body.unwrap_or_default(),
        published_at,
        page_url: wire.html_url,
    })
}
