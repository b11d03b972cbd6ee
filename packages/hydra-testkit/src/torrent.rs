//! Fake torrent engine

use async_trait::async_trait;
use hydra_core::backend::{
    AddTorrentParams, FilePriority, TorrentHandle, TorrentInfo, TorrentSession, TorrentState,
    TorrentStatus,
};
use hydra_core::error::{DownloadError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct TorrentData {
    info: Option<TorrentInfo>,
    metadata_after: Option<Duration>,
    priorities: Vec<FilePriority>,
    paused: bool,
    auto_managed: bool,
    progress: f64,
    download_rate: u64,
    upload_rate: u64,
    num_peers: u32,
    num_seeds: u32,
    state: Option<TorrentState>,
    total_wanted_done: u64,
    removed: bool,
}

/// One torrent living in a [`FakeTorrentSession`]
#[derive(Debug)]
pub struct FakeTorrent {
    id: String,
    params: AddTorrentParams,
    added_at: Instant,
    data: Mutex<TorrentData>,
}

impl FakeTorrent {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parameters the torrent was added with
    pub fn params(&self) -> &AddTorrentParams {
        &self.params
    }

    pub fn has_metadata(&self) -> bool {
        let data = self.data.lock();
        data.info.is_some()
            && data
                .metadata_after
                .map_or(false, |after| Instant::now() >= self.added_at + after)
    }

    /// Make metadata available right away
    pub fn publish_metadata(&self) {
        self.data.lock().metadata_after = Some(Duration::ZERO);
    }

    pub fn priorities(&self) -> Vec<FilePriority> {
        self.data.lock().priorities.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.data.lock().paused
    }

    pub fn is_auto_managed(&self) -> bool {
        self.data.lock().auto_managed
    }

    pub fn is_removed(&self) -> bool {
        self.data.lock().removed
    }

    pub fn set_progress(&self, progress: f64, download_rate: u64) {
        let mut data = self.data.lock();
        data.progress = progress;
        data.download_rate = download_rate;
    }

    pub fn set_upload(&self, upload_rate: u64, num_peers: u32, num_seeds: u32) {
        let mut data = self.data.lock();
        data.upload_rate = upload_rate;
        data.num_peers = num_peers;
        data.num_seeds = num_seeds;
    }

    pub fn set_state(&self, state: TorrentState) {
        self.data.lock().state = Some(state);
    }

    /// Make the engine lose track of the torrent
    pub fn forget(&self) {
        self.data.lock().removed = true;
    }

    pub fn set_total_wanted_done(&self, bytes: u64) {
        self.data.lock().total_wanted_done = bytes;
    }

    fn status(&self) -> Result<TorrentStatus> {
        let has_metadata = self.has_metadata();
        let data = self.data.lock();
        if data.removed {
            return Err(DownloadError::handle_not_found(&self.id));
        }
        let state = data.state.unwrap_or(if has_metadata {
            TorrentState::Downloading
        } else {
            TorrentState::DownloadingMetadata
        });
        Ok(TorrentStatus {
            progress: data.progress,
            download_rate: data.download_rate,
            upload_rate: data.upload_rate,
            num_peers: data.num_peers,
            num_seeds: data.num_seeds,
            state,
            total_wanted_done: data.total_wanted_done,
            has_metadata,
            paused: data.paused,
        })
    }

    fn with_live<T>(&self, f: impl FnOnce(&mut TorrentData) -> Result<T>) -> Result<T> {
        let mut data = self.data.lock();
        if data.removed {
            return Err(DownloadError::handle_not_found(&self.id));
        }
        f(&mut data)
    }
}

struct FakeTorrentHandle(Arc<FakeTorrent>);

#[async_trait]
impl TorrentHandle for FakeTorrentHandle {
    fn id(&self) -> &str {
        &self.0.id
    }

    async fn status(&self) -> Result<TorrentStatus> {
        self.0.status()
    }

    async fn torrent_info(&self) -> Result<Option<TorrentInfo>> {
        let has_metadata = self.0.has_metadata();
        self.0
            .with_live(|data| Ok(data.info.clone().filter(|_| has_metadata)))
    }

    async fn file_priority(&self, index: usize) -> Result<FilePriority> {
        self.0.with_live(|data| {
            data.priorities
                .get(index)
                .copied()
                .ok_or_else(|| DownloadError::invalid_input(format!("No file {}", index)))
        })
    }

    async fn set_file_priority(&self, index: usize, priority: FilePriority) -> Result<()> {
        self.0.with_live(|data| match data.priorities.get_mut(index) {
            Some(slot) => {
                *slot = priority;
                Ok(())
            }
            None => Err(DownloadError::invalid_input(format!("No file {}", index))),
        })
    }

    async fn pause(&self) -> Result<()> {
        self.0.with_live(|data| {
            data.paused = true;
            Ok(())
        })
    }

    async fn resume(&self) -> Result<()> {
        self.0.with_live(|data| {
            data.paused = false;
            Ok(())
        })
    }

    async fn set_auto_managed(&self, enabled: bool) -> Result<()> {
        self.0.with_live(|data| {
            data.auto_managed = enabled;
            Ok(())
        })
    }
}

/// Torrent engine keeping everything in memory
///
/// Magnets registered with [`FakeTorrentSession::register`] get their
/// metadata after the given delay (measured on the tokio clock). Unknown
/// magnets never produce metadata.
#[derive(Default)]
pub struct FakeTorrentSession {
    catalog: Mutex<HashMap<String, (TorrentInfo, Option<Duration>)>>,
    torrents: Mutex<Vec<Arc<FakeTorrent>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl FakeTorrentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the torrent behind `magnet`, `metadata_after = None` means never
    pub fn register(&self, magnet: &str, info: TorrentInfo, metadata_after: Option<Duration>) {
        self.catalog
            .lock()
            .insert(magnet.to_string(), (info, metadata_after));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every torrent ever added, in order
    pub fn torrents(&self) -> Vec<Arc<FakeTorrent>> {
        self.torrents.lock().clone()
    }

    /// Torrents not removed yet
    pub fn live(&self) -> Vec<Arc<FakeTorrent>> {
        self.torrents
            .lock()
            .iter()
            .filter(|t| !t.is_removed())
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<Arc<FakeTorrent>> {
        self.torrents.lock().last().cloned()
    }

    pub fn add_count(&self) -> usize {
        self.torrents.lock().len()
    }
}

#[async_trait]
impl TorrentSession for FakeTorrentSession {
    async fn add_torrent(&self, params: AddTorrentParams) -> Result<Box<dyn TorrentHandle>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DownloadError::backend_unavailable("Torrent session is down"));
        }

        let (info, metadata_after) = self
            .catalog
            .lock()
            .get(&params.source)
            .cloned()
            .map_or((None, None), |(info, after)| (Some(info), after));
        let priorities = info
            .as_ref()
            .map(|i| vec![FilePriority::Normal; i.files.len()])
            .unwrap_or_default();

        let id = format!("torrent-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let torrent = Arc::new(FakeTorrent {
            id,
            added_at: Instant::now(),
            data: Mutex::new(TorrentData {
                info,
                metadata_after,
                priorities,
                paused: params.flags.paused,
                auto_managed: params.flags.auto_managed,
                progress: 0.0,
                download_rate: 0,
                upload_rate: 0,
                num_peers: 0,
                num_seeds: 0,
                state: None,
                total_wanted_done: 0,
                removed: false,
            }),
            params,
        });
        self.torrents.lock().push(torrent.clone());
        Ok(Box::new(FakeTorrentHandle(torrent)))
    }

    async fn remove_torrent(&self, handle: &dyn TorrentHandle) -> Result<()> {
        let torrents = self.torrents.lock();
        let torrent = torrents
            .iter()
            .find(|t| t.id == handle.id())
            .ok_or_else(|| DownloadError::handle_not_found(handle.id()))?;
        torrent.data.lock().removed = true;
        Ok(())
    }
}
