// Integration tests for job dispatch and lifecycle
mod common;

use common::{Harness, MAGNET};
use hydra::core::backend::HttpState;
use hydra::{BackendKind, ErrorKind, Locator, SnapshotStatus, StartOptions, StartRequest};
use std::time::Duration;

fn http_request(url: &str) -> StartRequest {
    StartRequest::new(Locator::single(url), "/games")
}

#[tokio::test]
async fn test_dispatch_by_locator_shape() {
    let h = Harness::new();

    h.registry
        .start(1, http_request("https://cdn.example.com/game.zip"))
        .await
        .unwrap();
    h.registry
        .start(
            2,
            StartRequest::new(
                Locator::multi(vec![
                    "https://cdn.example.com/part1.rar".into(),
                    "https://cdn.example.com/part2.rar".into(),
                ]),
                "/games",
            ),
        )
        .await
        .unwrap();
    h.registry
        .start(3, StartRequest::new(Locator::magnet(MAGNET), "/games"))
        .await
        .unwrap();
    h.registry
        .start(
            4,
            StartRequest::new(Locator::magnet(MAGNET), "/games")
                .with_options(StartOptions::default().with_debrid()),
        )
        .await
        .unwrap();

    assert_eq!(h.http.add_count(), 3);
    assert_eq!(h.torrent.add_count(), 1);
    assert_eq!(h.debrid.added_magnets(), vec![MAGNET.to_string()]);

    let kinds: Vec<BackendKind> = job_kinds(&h, &[1, 2, 3, 4]).await;
    assert_eq!(
        kinds,
        vec![
            BackendKind::Http,
            BackendKind::MultiLink,
            BackendKind::Torrent,
            BackendKind::Debrid
        ]
    );
    assert_eq!(h.registry.job_ids(), vec![1, 2, 3, 4]);
}

async fn job_kinds(h: &Harness, ids: &[i64]) -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    for id in ids {
        kinds.push(h.registry.job_info(*id).await.unwrap().kind);
    }
    kinds
}

#[tokio::test]
async fn test_unknown_ids_are_noops() {
    let h = Harness::new();

    h.registry.cancel(99).await;
    h.registry.pause(99).await.unwrap();
    assert!(h.registry.snapshot(99).await.is_none());
    assert!(h.registry.job_info(99).await.is_none());
    assert!(h.registry.torrent_files(99).await.is_none());
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = Harness::new();
    h.registry
        .start(5, http_request("https://cdn.example.com/game.zip"))
        .await
        .unwrap();

    h.registry.cancel(5).await;
    h.registry.cancel(5).await;

    assert!(!h.registry.contains(5));
    assert!(h.http.live().is_empty());
    assert!(h.registry.snapshot(5).await.is_none());
}

#[tokio::test]
async fn test_failed_start_registers_nothing() {
    let h = Harness::new();
    h.http.set_unavailable(true);

    let err = h
        .registry
        .start(1, http_request("https://cdn.example.com/game.zip"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::BackendUnavailable);
    assert!(!h.registry.contains(1));
    assert!(h.registry.job_ids().is_empty());
    assert_eq!(h.registry.foreground(), None);
}

#[tokio::test]
async fn test_invalid_locator_rejected_before_dispatch() {
    let h = Harness::new();

    let err = h
        .registry
        .start(1, http_request("not a link"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidLocator);

    let err = h
        .registry
        .start(2, StartRequest::new(Locator::magnet("magnet:?dn=nothing"), "/games"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidLocator);

    assert_eq!(h.http.add_count(), 0);
    assert_eq!(h.torrent.add_count(), 0);
}

#[tokio::test]
async fn test_debrid_without_account_is_unavailable() {
    let h = Harness::without_debrid();

    let err = h
        .registry
        .start(
            1,
            StartRequest::new(Locator::magnet(MAGNET), "/games")
                .with_options(StartOptions::default().with_debrid()),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::BackendUnavailable);
    assert!(!h.registry.contains(1));
}

#[tokio::test]
async fn test_foreground_follows_start_and_pause() {
    let h = Harness::new();

    h.registry.start(1, http_request("https://a.example.com/1.zip")).await.unwrap();
    assert_eq!(h.registry.foreground(), Some(1));

    h.registry.start(2, http_request("https://a.example.com/2.zip")).await.unwrap();
    assert_eq!(h.registry.foreground(), Some(2));

    // pausing a background job leaves the foreground alone
    h.registry.pause(1).await.unwrap();
    assert_eq!(h.registry.foreground(), Some(2));

    h.registry.pause(2).await.unwrap();
    assert_eq!(h.registry.foreground(), None);

    h.registry.resume_seeding(3, MAGNET, "/games").await.unwrap();
    assert_eq!(h.registry.foreground(), None);

    h.registry.start(1, http_request("https://a.example.com/1.zip")).await.unwrap();
    h.registry.cancel(1).await;
    assert_eq!(h.registry.foreground(), None);
}

#[tokio::test]
async fn test_restart_resumes_existing_transfer() {
    let h = Harness::new();
    let request = http_request("https://cdn.example.com/game.zip");

    h.registry.start(1, request.clone()).await.unwrap();
    h.registry.pause(1).await.unwrap();
    let transfer = h.http.last().unwrap();
    assert_eq!(transfer.state(), HttpState::Paused);
    assert!(h.registry.job_info(1).await.unwrap().is_paused());

    h.registry.start(1, request).await.unwrap();

    assert_eq!(h.http.add_count(), 1);
    assert_eq!(transfer.resume_calls(), 1);
    assert_eq!(transfer.state(), HttpState::Active);
    assert!(!h.registry.job_info(1).await.unwrap().is_paused());
}

#[tokio::test]
async fn test_restart_with_new_link_replaces_transfer() {
    let h = Harness::new();

    h.registry.start(1, http_request("https://a.example.com/old.zip")).await.unwrap();
    h.registry.start(1, http_request("https://a.example.com/new.zip")).await.unwrap();

    assert_eq!(h.http.add_count(), 2);
    assert!(h.http.by_url("https://a.example.com/old.zip").unwrap().is_forgotten());
    assert_eq!(h.http.live().len(), 1);
}

#[tokio::test]
async fn test_backend_change_replaces_controller() {
    let h = Harness::new();

    h.registry.start(1, http_request("https://a.example.com/game.zip")).await.unwrap();
    h.registry
        .start(1, StartRequest::new(Locator::magnet(MAGNET), "/games"))
        .await
        .unwrap();

    assert!(h.http.live().is_empty());
    assert_eq!(h.torrent.live().len(), 1);
    assert_eq!(h.registry.job_info(1).await.unwrap().kind, BackendKind::Torrent);
}

#[tokio::test]
async fn test_snapshots_of_all_jobs() {
    let h = Harness::new();

    h.registry.start(1, http_request("https://a.example.com/1.zip")).await.unwrap();
    h.registry.start(2, http_request("https://a.example.com/2.zip")).await.unwrap();
    h.http.by_url("https://a.example.com/1.zip").unwrap().set_progress(100, 100, 0);
    h.http.by_url("https://a.example.com/1.zip").unwrap().complete();
    h.http.by_url("https://a.example.com/2.zip").unwrap().set_progress(10, 100, 5);

    let all = h.registry.all_snapshots().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[&1].status, SnapshotStatus::Complete);
    assert_eq!(all[&2].status, SnapshotStatus::Active);

    let seeds = h.registry.seed_snapshots().await;
    assert_eq!(seeds.len(), 1);
    assert_eq!(seeds[0].0, 1);

    let (foreground, snapshot) = h.registry.foreground_snapshot().await.unwrap();
    assert_eq!(foreground, 2);
    assert_eq!(snapshot.bytes_downloaded, 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_pending_start() {
    let h = Harness::new();
    h.register_five_files(None);

    let registry = h.registry.clone();
    let start = tokio::spawn(async move {
        let request = StartRequest::new(Locator::magnet(MAGNET), "/games")
            .with_options(StartOptions::default().with_file_indices(vec![1]));
        registry.start(1, request).await
    });

    // the start is parked in the metadata wait and holds the job
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.torrent.live().len(), 1);
    assert!(h.registry.snapshot(1).await.is_none());

    let before = tokio::time::Instant::now();
    h.registry.cancel(1).await;
    assert!(before.elapsed() < Duration::from_secs(1));

    let err = start.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(h.torrent.live().is_empty());
    assert!(!h.registry.contains(1));
}

#[tokio::test(start_paused = true)]
async fn test_pending_start_is_not_listed() {
    let h = Harness::new();
    h.register_five_files(None);
    h.registry
        .start(2, http_request("https://a.example.com/2.zip"))
        .await
        .unwrap();

    let registry = h.registry.clone();
    let start = tokio::spawn(async move {
        let request = StartRequest::new(Locator::magnet(MAGNET), "/games")
            .with_options(StartOptions::default().with_file_indices(vec![0]));
        registry.start(1, request).await
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.registry.job_ids(), vec![2]);
    assert!(!h.registry.contains(1));
    assert_eq!(h.registry.all_snapshots().await.len(), 1);

    let before = tokio::time::Instant::now();
    assert!(h.registry.torrent_files(1).await.is_none());
    assert!(before.elapsed() <= h.registry.config().snapshot_timeout());

    // shutdown also reaches the start that is still in flight
    h.registry.shutdown().await;
    assert_eq!(start.await.unwrap().unwrap_err().kind, ErrorKind::Cancelled);
    assert!(h.registry.job_ids().is_empty());
    assert!(h.torrent.live().is_empty());
    assert!(h.http.live().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_every_job() {
    let h = Harness::new();
    h.registry.start(1, http_request("https://a.example.com/1.zip")).await.unwrap();
    h.registry
        .start(2, StartRequest::new(Locator::magnet(MAGNET), "/games"))
        .await
        .unwrap();

    h.registry.shutdown().await;

    assert!(h.registry.job_ids().is_empty());
    assert!(h.http.live().is_empty());
    assert!(h.torrent.live().is_empty());
    assert_eq!(h.registry.foreground(), None);
}

#[tokio::test]
async fn test_bootstrap_restores_download_and_seeds() {
    let h = Harness::new();
    let download = urlencoding::encode(
        r#"{"game_id": 12, "url": "https://cdn.example.com/game.zip", "save_path": "/games", "out": "game.zip"}"#,
    )
    .into_owned();
    let seeds = urlencoding::encode(&format!(
        r#"[{{"game_id": 7, "url": "{}", "save_path": "/games/seeded"}}, {{"game_id": 8, "url": ["https://x/1"], "save_path": "/x"}}]"#,
        MAGNET
    ))
    .into_owned();

    let started = h.registry.bootstrap(Some(&download), Some(&seeds)).await;

    assert_eq!(started, 2);
    assert_eq!(h.registry.foreground(), Some(12));
    assert_eq!(h.http.last().unwrap().options().out.as_deref(), Some("game.zip"));
    let seeded = h.torrent.last().unwrap();
    assert!(seeded.params().flags.upload_mode);
    assert_eq!(h.registry.job_ids(), vec![7, 12]);
}

#[tokio::test]
async fn test_bootstrap_skips_garbage() {
    let h = Harness::new();
    assert_eq!(h.registry.bootstrap(Some("%7Bnot-json"), Some("")).await, 0);
    assert!(h.registry.job_ids().is_empty());
}
