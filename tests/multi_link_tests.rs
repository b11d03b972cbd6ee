// Integration tests for multi-link jobs
mod common;

use common::Harness;
use hydra::core::backend::HttpState;
use hydra::{ErrorKind, Locator, OrchestratorConfig, SnapshotStatus, StartRequest};

const PART1: &str = "https://cdn.example.com/Game/part1.rar";
const PART2: &str = "https://cdn.example.com/Game/part2.rar";

fn request(total_size: Option<u64>) -> StartRequest {
    StartRequest::new(
        Locator::MultiUrl {
            urls: vec![PART1.to_string(), PART2.to_string()],
            header: Some("Cookie: session=1".to_string()),
            filename: Some("Game".to_string()),
            total_size,
        },
        "/games",
    )
}

#[tokio::test]
async fn test_aggregates_completed_and_active_parts() {
    let h = Harness::new();
    h.registry.start(1, request(None)).await.unwrap();

    let part1 = h.http.by_url(PART1).unwrap();
    let part2 = h.http.by_url(PART2).unwrap();
    part1.set_name("Game/part1.rar");
    part1.set_progress(100, 100, 0);
    part1.complete();
    part2.set_name("Game/part2.rar");
    part2.set_progress(150, 200, 10);

    let snapshot = h.registry.snapshot(1).await.unwrap();
    assert_eq!(snapshot.bytes_downloaded, 250);
    assert_eq!(snapshot.file_size, 300);
    assert_eq!(snapshot.download_speed, 10);
    assert_eq!(snapshot.folder_name, "Game");
    assert_eq!(snapshot.status, SnapshotStatus::Active);

    // the retired part keeps counting on later polls
    part2.set_progress(160, 200, 10);
    let snapshot = h.registry.snapshot(1).await.unwrap();
    assert_eq!(snapshot.bytes_downloaded, 260);
}

#[tokio::test]
async fn test_completion_is_final() {
    let h = Harness::new();
    h.registry.start(1, request(Some(1000))).await.unwrap();

    let part1 = h.http.by_url(PART1).unwrap();
    let part2 = h.http.by_url(PART2).unwrap();
    part1.set_progress(500, 500, 0);
    part1.complete();
    part2.set_progress(495, 495, 0);
    part2.complete();

    let done = h.registry.snapshot(1).await.unwrap();
    assert_eq!(done.status, SnapshotStatus::Complete);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.file_size, 1000);

    // nothing the engine does afterwards changes the result
    part1.forget();
    part2.forget();
    assert_eq!(h.registry.snapshot(1).await.unwrap(), done);
    assert_eq!(h.registry.snapshot(1).await.unwrap(), done);
}

#[tokio::test]
async fn test_partial_add_failure_is_tolerated() {
    let h = Harness::new();
    h.http.fail_url(PART2);

    h.registry.start(1, request(None)).await.unwrap();

    assert_eq!(h.http.add_count(), 1);
    assert!(h.registry.contains(1));
}

#[tokio::test]
async fn test_every_add_failing_fails_the_start() {
    let h = Harness::new();
    h.http.fail_url(PART1);
    h.http.fail_url(PART2);

    let err = h.registry.start(1, request(None)).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::BackendUnavailable);
    assert!(!h.registry.contains(1));
}

#[tokio::test]
async fn test_vanished_part_is_dropped() {
    let h = Harness::new();
    h.registry.start(1, request(None)).await.unwrap();

    let part1 = h.http.by_url(PART1).unwrap();
    let part2 = h.http.by_url(PART2).unwrap();
    part1.set_progress(40, 100, 4);
    part2.set_progress(10, 100, 1);
    part2.forget();

    let snapshot = h.registry.snapshot(1).await.unwrap();
    assert_eq!(snapshot.bytes_downloaded, 40);
    assert_eq!(snapshot.file_size, 100);
    assert_eq!(snapshot.download_speed, 4);
}

#[tokio::test]
async fn test_pause_and_cancel_reach_every_part() {
    let h = Harness::new();
    h.registry.start(1, request(None)).await.unwrap();
    h.http.by_url(PART1).unwrap().set_progress(1, 10, 1);
    h.http.by_url(PART2).unwrap().set_progress(1, 10, 1);

    h.registry.pause(1).await.unwrap();
    assert!(h
        .http
        .transfers()
        .iter()
        .all(|t| t.state() == HttpState::Paused));
    assert_eq!(
        h.registry.snapshot(1).await.unwrap().status,
        SnapshotStatus::Paused
    );

    h.registry.cancel(1).await;
    assert!(h.http.live().is_empty());
}

#[tokio::test]
async fn test_options_reach_the_engine() {
    let config = OrchestratorConfig::default().with_max_download_rate(4096);
    let h = Harness::with_config(config);

    h.registry.start(1, request(None)).await.unwrap();

    for transfer in h.http.transfers() {
        let options = transfer.options();
        assert_eq!(options.header.as_deref(), Some("Cookie: session=1"));
        assert_eq!(options.max_download_rate, Some(4096));
        assert_eq!(options.dir, std::path::PathBuf::from("/games"));
        assert!(options.out.is_none());
    }
}

#[tokio::test]
async fn test_restart_resumes_existing_parts() {
    let h = Harness::new();
    let urls = [PART1, PART2];
    h.registry.start(1, request(None)).await.unwrap();
    h.registry.pause(1).await.unwrap();

    h.registry.start(1, request(None)).await.unwrap();

    assert_eq!(h.http.live().len(), urls.len());
    assert_eq!(h.http.add_count(), urls.len());
    for url in urls {
        let part = h.http.by_url(url).unwrap();
        assert_eq!(part.state(), HttpState::Active);
        assert_eq!(part.resume_calls(), 1);
    }
}

#[tokio::test]
async fn test_restart_replaces_lost_parts() {
    let h = Harness::new();
    h.registry.start(1, request(None)).await.unwrap();
    h.http.by_url(PART1).unwrap().forget();
    h.http.by_url(PART2).unwrap().forget();

    h.registry.start(1, request(None)).await.unwrap();

    assert_eq!(h.http.live().len(), 2);
    assert_eq!(h.http.add_count(), 4);
}
