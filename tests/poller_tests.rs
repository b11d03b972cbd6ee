// Integration tests for the status poller
mod common;

use common::{Harness, MAGNET};
use hydra::core::backend::TorrentState;
use hydra::core::poller::collect_report;
use hydra::{Locator, OrchestratorConfig, SnapshotStatus, StartRequest, StatusPoller};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_poller_publishes_reports() {
    let h = Harness::new();
    h.registry
        .start(
            1,
            StartRequest::new(Locator::single("https://cdn.example.com/game.zip"), "/games"),
        )
        .await
        .unwrap();
    h.http.last().unwrap().set_progress(30, 100, 10);

    let poller = StatusPoller::spawn(h.registry.clone(), Duration::from_millis(500));
    let mut reports = poller.subscribe();
    reports.changed().await.unwrap();

    let report = reports.borrow_and_update().clone();
    let (job_id, snapshot) = report.foreground().unwrap();
    assert_eq!(job_id, 1);
    assert_eq!(snapshot.bytes_downloaded, 30);

    h.http.last().unwrap().set_progress(60, 100, 10);
    reports.changed().await.unwrap();
    assert_eq!(reports.borrow().jobs[&1].bytes_downloaded, 60);
    assert_eq!(poller.latest().jobs[&1].bytes_downloaded, 60);

    poller.stop().await;
    assert!(reports.changed().await.is_err());
}

#[tokio::test]
async fn test_report_separates_seeding_jobs() {
    let h = Harness::new();
    h.register_five_files(Some(Duration::ZERO));
    h.registry.resume_seeding(7, MAGNET, "/games").await.unwrap();
    let seeded = h.torrent.last().unwrap();
    seeded.set_progress(1.0, 0);
    seeded.set_state(TorrentState::Seeding);

    h.registry
        .start(
            8,
            StartRequest::new(Locator::single("https://cdn.example.com/game.zip"), "/games"),
        )
        .await
        .unwrap();

    let report = collect_report(&h.registry).await;
    assert_eq!(report.jobs.len(), 2);
    assert_eq!(report.foreground_job, Some(8));

    let seeding: Vec<_> = report.seeding().collect();
    assert_eq!(seeding.len(), 1);
    assert_eq!(seeding[0].0, 7);
    assert_eq!(seeding[0].1.status, SnapshotStatus::Complete);
}

#[tokio::test]
async fn test_empty_registry_reports_nothing() {
    let h = Harness::new();
    let report = collect_report(&h.registry).await;
    assert!(report.jobs.is_empty());
    assert!(report.foreground().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_poller_uses_configured_interval() {
    let config = OrchestratorConfig::default().with_status_poll_interval(Duration::from_secs(2));
    let h = Harness::with_config(config);
    h.registry
        .start(
            3,
            StartRequest::new(Locator::single("https://cdn.example.com/game.zip"), "/games"),
        )
        .await
        .unwrap();

    let poller = StatusPoller::from_config(h.registry.clone());
    let mut reports = poller.subscribe();
    reports.changed().await.unwrap();
    let first = tokio::time::Instant::now();

    reports.changed().await.unwrap();
    let waited = first.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    assert_eq!(reports.borrow().foreground_job, Some(3));

    poller.stop().await;
}
