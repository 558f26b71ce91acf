//! End-to-end update flow against a mock release feed.
//!
//! Covers the path the GUI drives: check → announce → download → apply, and
//! the cleanup on the following launch. The updater is blocking, so every
//! controller call runs under `spawn_blocking` while wiremock serves on the
//! runtime.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use taskmaster::update::{
    CheckOutcome, NoopBarrier, SemanticVersion, UpdateController, UpdateEvent, UpdatePaths,
};
use taskmaster::{UpdateConfig, UpdateError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ASSET: &str = "TaskMaster-test";
const NEW_BINARY: &[u8] = b"#!/bin/sh\necho taskmaster 1.0.2\n";

fn install(dir: &Path) -> PathBuf {
    let exe = dir.join(ASSET);
    std::fs::write(&exe, b"taskmaster 1.0.1").unwrap();
    exe
}

fn controller(server: &MockServer, exe: &Path) -> UpdateController {
    let config = UpdateConfig {
        feed_url: format!("{}/releases/latest", server.uri()),
        asset_name: Some(ASSET.to_owned()),
        min_check_interval_mins: 0,
        startup_delay_secs: 0,
        ..Default::default()
    };
    UpdateController::new(
        config,
        SemanticVersion::new(1, 0, 1),
        UpdatePaths::for_executable(exe).unwrap(),
    )
    .unwrap()
}

fn release_body(server: &MockServer, tag: &str, digest: &str) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "body": "Faster task search",
        "html_url": "https://github.com/elementary1997/taskmaster/releases/tag/v1.0.2",
        "published_at": "2026-10-01T12:00:00Z",
        "assets": [
            {
                "name": "TaskMaster-other",
                "browser_download_url": format!("{}/download/other", server.uri()),
                "size": 3
            },
            {
                "name": ASSET,
                "browser_download_url": format!("{}/download/{ASSET}", server.uri()),
                "size": NEW_BINARY.len(),
                "digest": digest
            }
        ]
    })
}

fn good_digest() -> String {
    format!("sha256:{:x}", Sha256::digest(NEW_BINARY))
}

async fn mount_feed(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_asset(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/download/{ASSET}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(NEW_BINARY))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn no_published_release_reports_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let outcome = tokio::task::spawn_blocking(move || ctl.check(false))
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::UpToDate);
    let seen: Vec<_> = events.try_iter().collect();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], UpdateEvent::NoUpdateAvailable));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_reported_as_no_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/latest"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let outcome = tokio::task::spawn_blocking(move || ctl.check(false))
        .await
        .unwrap();

    assert!(matches!(outcome, CheckOutcome::Unavailable(_)));
    let seen: Vec<_> = events.try_iter().collect();
    assert!(matches!(seen.as_slice(), [UpdateEvent::NoUpdateAvailable]));
}

#[tokio::test(flavor = "multi_thread")]
async fn current_release_reports_no_update() {
    let server = MockServer::start().await;
    mount_feed(&server, release_body(&server, "v1.0.1", &good_digest())).await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let outcome = tokio::task::spawn_blocking(move || ctl.check(true))
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::UpToDate);
    assert!(matches!(
        events.try_recv().unwrap(),
        UpdateEvent::NoUpdateAvailable
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn release_without_platform_asset_reports_no_update() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        json!({
            "tag_name": "v2.0.0",
            "published_at": "2026-10-01T12:00:00Z",
            "assets": [{"name": "TaskMaster-macos", "browser_download_url": "http://x/y"}]
        }),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let outcome = tokio::task::spawn_blocking(move || ctl.check(true))
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::UpToDate);
    assert!(matches!(
        events.try_recv().unwrap(),
        UpdateEvent::NoUpdateAvailable
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn full_update_cycle_swaps_and_cleans_up() {
    let server = MockServer::start().await;
    mount_feed(&server, release_body(&server, "v1.0.2", &good_digest())).await;
    mount_asset(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let exe = install(dir.path());
    let ctl = controller(&server, &exe);
    let events = ctl.events();

    // Announce once; a second background check stays quiet.
    let check_ctl = ctl.clone();
    let (first, second) = tokio::task::spawn_blocking(move || {
        (check_ctl.check(false), check_ctl.check(false))
    })
    .await
    .unwrap();
    assert_eq!(first, CheckOutcome::Announced(SemanticVersion::new(1, 0, 2)));
    assert_eq!(second, CheckOutcome::Suppressed(SemanticVersion::new(1, 0, 2)));

    let announced: Vec<_> = events.try_iter().collect();
    assert_eq!(announced.len(), 1);
    let UpdateEvent::UpdateAvailable(release) = &announced[0] else {
        panic!("expected UpdateAvailable, got {:?}", announced[0]);
    };
    assert_eq!(release.asset.name, ASSET);
    assert_eq!(release.notes, "Faster task search");
    let release = release.clone();

    // Download on the caller's thread.
    let dl_ctl = ctl.clone();
    assert!(
        tokio::task::spawn_blocking(move || dl_ctl.download(release))
            .await
            .unwrap()
    );

    let mut progress = Vec::new();
    let mut pending = None;
    for event in events.try_iter() {
        match event {
            UpdateEvent::DownloadProgress(p) => progress.push(p),
            UpdateEvent::UpdateReady(p) => pending = Some(p),
            other => panic!("unexpected event {other:?}"),
        }
    }
    let pending = pending.expect("UpdateReady");
    assert!(progress.len() >= 2);
    let last = progress.last().unwrap();
    assert_eq!(last.bytes_received, NEW_BINARY.len() as u64);
    assert_eq!(last.fraction(), Some(1.0));
    assert_eq!(std::fs::read(&ctl.paths().staged).unwrap(), NEW_BINARY);

    // Apply.
    let restart = tokio::task::spawn_blocking(move || pending.apply(&NoopBarrier))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restart.executable, exe);
    assert_eq!(std::fs::read(&exe).unwrap(), NEW_BINARY);
    assert_eq!(
        std::fs::read(&ctl.paths().backup).unwrap(),
        b"taskmaster 1.0.1"
    );
    assert!(!ctl.paths().staged.exists());
    assert_eq!(ctl.session().applied, Some(SemanticVersion::new(1, 0, 2)));

    // An applied release is not offered again this run.
    let recheck = ctl.clone();
    let outcome = tokio::task::spawn_blocking(move || recheck.check(true))
        .await
        .unwrap();
    assert_eq!(outcome, CheckOutcome::Suppressed(SemanticVersion::new(1, 0, 2)));

    // Next launch.
    let relaunched = controller(&server, &exe);
    let report = relaunched.reap_stale_files();
    assert_eq!(report.removed, vec![ctl.paths().backup.clone()]);
    assert!(!ctl.paths().backup.exists());
    assert_eq!(std::fs::read(&exe).unwrap(), NEW_BINARY);
    assert!(relaunched.reap_stale_files().is_noop());
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_check_reannounces_unless_declined() {
    let server = MockServer::start().await;
    mount_feed(&server, release_body(&server, "v1.0.2", &good_digest())).await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let worker = ctl.clone();
    let outcomes = tokio::task::spawn_blocking(move || {
        let background = worker.check(false);
        let forced = worker.check(true);
        worker.decline(SemanticVersion::new(1, 0, 2));
        let after_decline = worker.check(true);
        (background, forced, after_decline)
    })
    .await
    .unwrap();

    let next = SemanticVersion::new(1, 0, 2);
    assert_eq!(outcomes.0, CheckOutcome::Announced(next));
    assert_eq!(outcomes.1, CheckOutcome::Announced(next));
    assert_eq!(outcomes.2, CheckOutcome::Suppressed(next));
    let kinds: Vec<_> = events.try_iter().map(|e| e.kind()).collect();
    // The declined release is not offered again, but the user's check is
    // still answered.
    assert_eq!(
        kinds,
        ["update_available", "update_available", "no_update_available"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_reports_and_leaves_nothing() {
    let server = MockServer::start().await;
    mount_feed(&server, release_body(&server, "v1.0.2", &good_digest())).await;
    Mock::given(method("GET"))
        .and(path(format!("/download/{ASSET}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let exe = install(dir.path());
    let ctl = controller(&server, &exe);
    let events = ctl.events();

    let worker = ctl.clone();
    tokio::task::spawn_blocking(move || {
        worker.check(false);
        let release = match worker.events().try_recv() {
            Ok(UpdateEvent::UpdateAvailable(release)) => release,
            other => panic!("expected UpdateAvailable, got {other:?}"),
        };
        assert!(worker.download(release));
    })
    .await
    .unwrap();

    let failure = events.try_iter().find_map(|e| match e {
        UpdateEvent::UpdateCheckFailed { reason } => Some(reason),
        _ => None,
    });
    assert!(failure.unwrap().contains("500"));
    assert!(!ctl.paths().staged.exists());
    assert!(!ctl.session().staging_busy());
    assert_eq!(std::fs::read(&exe).unwrap(), b"taskmaster 1.0.1");
}

#[tokio::test(flavor = "multi_thread")]
async fn checksum_mismatch_rejects_download() {
    let server = MockServer::start().await;
    let wrong = format!("sha256:{}", "ab".repeat(32));
    mount_feed(&server, release_body(&server, "v1.0.2", &wrong)).await;
    mount_asset(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let worker = ctl.clone();
    tokio::task::spawn_blocking(move || {
        worker.check(false);
        let Ok(UpdateEvent::UpdateAvailable(release)) = worker.events().try_recv() else {
            panic!("expected UpdateAvailable");
        };
        worker.download(release);
    })
    .await
    .unwrap();

    let failure = events.try_iter().find_map(|e| match e {
        UpdateEvent::UpdateCheckFailed { reason } => Some(reason),
        _ => None,
    });
    assert!(failure.unwrap().contains("sha256"));
    assert!(!ctl.paths().staged.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_staged_update_is_not_installed() {
    let server = MockServer::start().await;
    mount_feed(&server, release_body(&server, "v1.0.2", &good_digest())).await;
    mount_asset(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let ctl = controller(&server, &install(dir.path()));
    let events = ctl.events();

    let worker = ctl.clone();
    let pending = tokio::task::spawn_blocking(move || {
        worker.check(false);
        let Ok(UpdateEvent::UpdateAvailable(release)) = worker.events().try_recv() else {
            panic!("expected UpdateAvailable");
        };
        worker.download(release);
        let pending = worker.events().try_iter().find_map(|e| match e {
            UpdateEvent::UpdateReady(p) => Some(p),
            _ => None,
        });
        pending.expect("UpdateReady")
    })
    .await
    .unwrap();
    drop(events);

    // Something rewrote the staged file between download and restart.
    let staged = ctl.paths().staged.clone();
    std::fs::write(&staged, b"tampered").unwrap();
    let err = tokio::task::spawn_blocking(move || pending.apply(&NoopBarrier))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, UpdateError::Integrity(_)));
    assert_eq!(
        std::fs::read(&ctl.paths().executable).unwrap(),
        b"taskmaster 1.0.1"
    );
}
