// Shared setup for the integration tests
#![allow(dead_code)]

use hydra::core::backend::{DebridService, HttpSession, TorrentSession};
use hydra::{Backends, JobRegistry, OrchestratorConfig};
use hydra_testkit::{FakeDebridService, FakeHttpSession, FakeTorrentSession};
use std::sync::Arc;

pub const MAGNET: &str = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Game";

pub struct Harness {
    pub torrent: Arc<FakeTorrentSession>,
    pub http: Arc<FakeHttpSession>,
    pub debrid: Arc<FakeDebridService>,
    pub registry: Arc<JobRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let torrent = Arc::new(FakeTorrentSession::new());
        let http = Arc::new(FakeHttpSession::new());
        let debrid = Arc::new(FakeDebridService::new());

        let torrent_session: Arc<dyn TorrentSession> = torrent.clone();
        let http_session: Arc<dyn HttpSession> = http.clone();
        let debrid_service: Arc<dyn DebridService> = debrid.clone();
        let backends = Backends::new(torrent_session, http_session).with_debrid(debrid_service);

        Self {
            torrent,
            http,
            debrid,
            registry: Arc::new(JobRegistry::new(backends, config)),
        }
    }

    /// Registry without a debrid account
    pub fn without_debrid() -> Self {
        let harness = Self::new();
        let torrent_session: Arc<dyn TorrentSession> = harness.torrent.clone();
        let http_session: Arc<dyn HttpSession> = harness.http.clone();
        let registry = JobRegistry::new(
            Backends::new(torrent_session, http_session),
            OrchestratorConfig::default(),
        );
        Self {
            registry: Arc::new(registry),
            ..harness
        }
    }

    /// Five files of 10, 20, 30, 40 and 50 bytes
    pub fn register_five_files(&self, metadata_after: Option<std::time::Duration>) {
        self.torrent.register(
            MAGNET,
            hydra_testkit::torrent_info(
                "Game",
                &[
                    ("Game/a.bin", 10),
                    ("Game/b.bin", 20),
                    ("Game/c.bin", 30),
                    ("Game/d.bin", 40),
                    ("Game/e.bin", 50),
                ],
            ),
            metadata_after,
        );
    }
}
