//! Torrent jobs with optional file selection

use super::Controller;
use crate::backend::{
    AddTorrentParams, FilePriority, TorrentFlags, TorrentHandle, TorrentInfo, TorrentSession,
    TorrentState, TorrentStatus,
};
use crate::config::OrchestratorConfig;
use crate::error::{DownloadError, ErrorKind, Result};
use crate::locator::{BackendKind, Locator, StartRequest};
use crate::state::{SnapshotStatus, StatusSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One row of a torrent's file table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFileEntry {
    pub index: usize,
    pub name: String,
    pub size: u64,
    pub priority: FilePriority,
}

/// What the current handle was added for
#[derive(Debug, Clone, PartialEq, Eq)]
struct AddedTorrent {
    magnet: String,
    save_path: String,
    selection: Option<Vec<usize>>,
    seed_only: bool,
}

/// Drives one torrent on the shared torrent session
pub struct TorrentController {
    session: Arc<dyn TorrentSession>,
    config: Arc<OrchestratorConfig>,
    handle: Option<Box<dyn TorrentHandle>>,
    added: Option<AddedTorrent>,
    /// Logical size, memoized once computed from metadata
    wanted_size: Option<u64>,
}

impl TorrentController {
    pub fn new(session: Arc<dyn TorrentSession>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            session,
            config,
            handle: None,
            added: None,
            wanted_size: None,
        }
    }

    /// Engine id of the current torrent
    pub fn handle_id(&self) -> Option<&str> {
        self.handle.as_deref().map(|h| h.id())
    }

    async fn remove_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.session.remove_torrent(handle.as_ref()).await {
                warn!(torrent = handle.id(), error = %e, "failed to remove torrent");
            }
        }
        self.added = None;
        self.wanted_size = None;
    }

    async fn logical_size(&mut self, info: Option<&TorrentInfo>) -> u64 {
        if let Some(size) = self.wanted_size.filter(|size| *size > 0) {
            return size;
        }
        let (Some(handle), Some(info)) = (self.handle.as_deref(), info) else {
            return 0;
        };

        let mut wanted = 0u64;
        for (index, file) in info.files.iter().enumerate() {
            match handle.file_priority(index).await {
                Ok(priority) if priority.is_wanted() => wanted += file.size,
                Ok(_) => {}
                Err(e) => debug!(index, error = %e, "no file priority"),
            }
        }
        let size = resolve_file_size(None, wanted, info.total_size);
        self.wanted_size = Some(size);
        size
    }
}

#[async_trait]
impl Controller for TorrentController {
    fn kind(&self) -> BackendKind {
        BackendKind::Torrent
    }

    async fn start(&mut self, request: &StartRequest, cancel: &CancellationToken) -> Result<()> {
        let Locator::Magnet { uri } = &request.locator else {
            return Err(DownloadError::invalid_locator("Torrent jobs need a magnet URI"));
        };

        let seed_only = request.options.seed_only;
        let wanted = AddedTorrent {
            magnet: uri.clone(),
            save_path: request.save_path.clone(),
            selection: request
                .options
                .selected_files()
                .filter(|_| !seed_only)
                .map(<[usize]>::to_vec),
            seed_only,
        };

        if self.added.as_ref() == Some(&wanted) {
            if let Some(handle) = self.handle.as_deref() {
                match handle.resume().await {
                    Ok(()) => {
                        if !seed_only {
                            handle.set_auto_managed(true).await?;
                        }
                        debug!(torrent = handle.id(), "resumed torrent");
                        return Ok(());
                    }
                    Err(e) if e.is_handle_not_found() => {
                        debug!(torrent = handle.id(), "torrent vanished, adding it again");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.remove_handle().await;

        let flags = if wanted.seed_only {
            TorrentFlags::upload_mode()
        } else if wanted.selection.is_some() {
            TorrentFlags::paused_auto_managed()
        } else {
            TorrentFlags::auto_managed()
        };
        let handle = self
            .session
            .add_torrent(AddTorrentParams {
                source: uri.clone(),
                save_path: PathBuf::from(&request.save_path),
                flags,
                trackers: self.config.trackers.clone(),
            })
            .await?;
        info!(torrent = handle.id(), ?flags, "torrent added");

        let mut wanted_size = None;
        if let Some(indices) = &wanted.selection {
            let waited = wait_for_metadata(
                handle.as_ref(),
                self.config.metadata_poll_interval(),
                self.config.metadata_timeout(),
                cancel,
            )
            .await;

            let selected = match waited {
                Ok(()) => apply_file_selection(handle.as_ref(), indices).await,
                Err(e) => Err(e),
            };
            let resumed = match selected {
                Ok(size) => {
                    wanted_size = Some(size);
                    handle.resume().await
                }
                Err(e) if e.kind == ErrorKind::MetadataTimeout => {
                    warn!(torrent = handle.id(), error = %e, "downloading every file");
                    handle.resume().await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = resumed {
                debug!(torrent = handle.id(), error = %e, "start abandoned");
                if let Err(remove_err) = self.session.remove_torrent(handle.as_ref()).await {
                    warn!(torrent = handle.id(), error = %remove_err, "failed to remove torrent");
                }
                return Err(e);
            }
        }

        self.handle = Some(handle);
        self.added = Some(wanted);
        self.wanted_size = wanted_size;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_deref() else {
            return Ok(());
        };
        // auto-managed torrents get resumed by the engine's queue
        match handle.pause().await {
            Err(e) if !e.is_handle_not_found() => return Err(e),
            _ => {}
        }
        match handle.set_auto_managed(false).await {
            Err(e) if !e.is_handle_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.as_deref() {
            match handle.pause().await {
                Err(e) if e.is_handle_not_found() => {
                    debug!(torrent = handle.id(), "torrent already gone");
                }
                Err(e) => warn!(torrent = handle.id(), error = %e, "failed to pause torrent"),
                Ok(()) => {}
            }
        }
        self.remove_handle().await;
        Ok(())
    }

    async fn snapshot(&mut self) -> Option<StatusSnapshot> {
        let handle = self.handle.as_deref()?;
        let status = match handle.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!(torrent = handle.id(), error = %e, "no torrent status");
                return None;
            }
        };
        let info = handle.torrent_info().await.ok().flatten();

        let file_size = self.logical_size(info.as_ref()).await;
        // progress * size is an approximation when only some files are wanted
        let bytes_downloaded = if info.is_some() {
            (status.progress.clamp(0.0, 1.0) * file_size as f64) as u64
        } else {
            status.total_wanted_done
        };
        let folder_name = info.map(|i| i.name).unwrap_or_default();

        Some(
            StatusSnapshot::new(folder_name, file_size, bytes_downloaded, map_torrent_state(&status))
                .with_speed(status.download_rate, status.upload_rate)
                .with_peers(status.num_peers, status.num_seeds),
        )
    }

    async fn files(&self) -> Option<Vec<TorrentFileEntry>> {
        let handle = self.handle.as_deref()?;
        let info = handle.torrent_info().await.ok().flatten()?;
        Some(file_table(handle, &info).await)
    }
}

/// Translate engine status into the normalized status
pub fn map_torrent_state(status: &TorrentStatus) -> SnapshotStatus {
    match status.state {
        TorrentState::Finished | TorrentState::Seeding => SnapshotStatus::Complete,
        _ if status.paused => SnapshotStatus::Paused,
        TorrentState::Downloading => SnapshotStatus::Active,
        TorrentState::CheckingFiles
        | TorrentState::DownloadingMetadata
        | TorrentState::CheckingResumeData => SnapshotStatus::Waiting,
    }
}

/// Pick the logical size of a torrent job
///
/// A cached selection size wins, then the sum of files with a non-zero
/// priority, then the whole torrent.
pub fn resolve_file_size(cached: Option<u64>, wanted_sum: u64, total_size: u64) -> u64 {
    match cached {
        Some(size) if size > 0 => size,
        _ if wanted_sum > 0 => wanted_sum,
        _ => total_size,
    }
}

/// Poll until the handle reports metadata
///
/// # Returns
/// * `Err(MetadataTimeout)` - Nothing arrived within `timeout`
/// * `Err(Cancelled)` - `cancel` fired while waiting
pub async fn wait_for_metadata(
    handle: &dyn TorrentHandle,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled("Metadata wait cancelled"));
        }
        if handle.status().await?.has_metadata {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(DownloadError::metadata_timeout(timeout));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DownloadError::cancelled("Metadata wait cancelled"));
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Skip every file, then mark the requested indices wanted
///
/// Out-of-range indices are ignored. Returns the summed size of the files
/// that were selected.
pub async fn apply_file_selection(handle: &dyn TorrentHandle, indices: &[usize]) -> Result<u64> {
    let info = handle
        .torrent_info()
        .await?
        .ok_or_else(|| DownloadError::new(ErrorKind::MetadataTimeout, "Metadata not loaded"))?;

    for index in 0..info.files.len() {
        handle.set_file_priority(index, FilePriority::Skip).await?;
    }

    let mut selected = 0u64;
    let unique: BTreeSet<usize> = indices.iter().copied().collect();
    for index in unique {
        match info.files.get(index) {
            Some(file) => {
                handle.set_file_priority(index, FilePriority::Normal).await?;
                selected += file.size;
            }
            None => warn!(index, files = info.files.len(), "file index out of range"),
        }
    }
    Ok(selected)
}

/// File table with the handle's current priorities
pub async fn file_table(handle: &dyn TorrentHandle, info: &TorrentInfo) -> Vec<TorrentFileEntry> {
    let mut entries = Vec::with_capacity(info.files.len());
    for (index, file) in info.files.iter().enumerate() {
        let priority = handle
            .file_priority(index)
            .await
            .unwrap_or(FilePriority::Normal);
        entries.push(TorrentFileEntry {
            index,
            name: file.path.clone(),
            size: file.size,
            priority,
        });
    }
    entries
}
