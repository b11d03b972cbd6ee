//! Several HTTP links presented as one job

use super::http::map_http_state;
use super::Controller;
use crate::backend::{HttpHandle, HttpOptions, HttpSession, HttpState, HttpStatus};
use crate::error::{DownloadError, Result};
use crate::locator::{BackendKind, Locator, StartRequest};
use crate::state::{SnapshotStatus, StatusSnapshot};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fraction of the logical size at which the aggregate counts as complete
pub const COMPLETION_RATIO: f64 = 0.99;

/// A sub-transfer that finished and was retired from the active set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub name: String,
    pub size: u64,
}

/// Links and options the current sub-transfers were added with
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkSet {
    urls: Vec<String>,
    options: HttpOptions,
}

/// Drives a group of HTTP transfers and reports them as one
pub struct MultiLinkController {
    session: Arc<dyn HttpSession>,
    default_rate: Option<u64>,
    links: Option<LinkSet>,
    active: Vec<Box<dyn HttpHandle>>,
    completed: Vec<CompletedTransfer>,
    declared_total: Option<u64>,
    fallback_name: Option<String>,
    /// Snapshot returned unchanged once the group completed
    finished: Option<StatusSnapshot>,
}

impl MultiLinkController {
    pub fn new(session: Arc<dyn HttpSession>, default_rate: Option<u64>) -> Self {
        Self {
            session,
            default_rate,
            links: None,
            active: Vec::new(),
            completed: Vec::new(),
            declared_total: None,
            fallback_name: None,
            finished: None,
        }
    }

    async fn remove_all(&mut self) {
        for handle in self.active.drain(..) {
            if let Err(e) = handle.remove().await {
                if !e.is_handle_not_found() {
                    warn!(gid = handle.gid(), error = %e, "failed to remove sub-transfer");
                }
            }
        }
        self.completed.clear();
        self.finished = None;
        self.links = None;
    }

    /// Resume every tracked sub-transfer, dropping the ones the engine lost
    async fn resume_active(&mut self) {
        let mut kept = Vec::with_capacity(self.active.len());
        for handle in self.active.drain(..) {
            match handle.resume().await {
                Ok(()) => kept.push(handle),
                Err(e) if e.is_handle_not_found() => {
                    debug!(gid = handle.gid(), "sub-transfer vanished");
                }
                Err(e) => {
                    warn!(gid = handle.gid(), error = %e, "failed to resume sub-transfer");
                    kept.push(handle);
                }
            }
        }
        self.active = kept;
    }
}

#[async_trait]
impl Controller for MultiLinkController {
    fn kind(&self) -> BackendKind {
        BackendKind::MultiLink
    }

    async fn start(&mut self, request: &StartRequest, _cancel: &CancellationToken) -> Result<()> {
        let Locator::MultiUrl {
            urls,
            header,
            filename,
            total_size,
        } = &request.locator
        else {
            return Err(DownloadError::invalid_locator(
                "Multi-link jobs need a list of links",
            ));
        };

        let links = LinkSet {
            urls: urls.clone(),
            options: HttpOptions {
                header: header.clone(),
                dir: PathBuf::from(&request.save_path),
                out: None,
                max_download_rate: request.options.max_download_rate.or(self.default_rate),
            },
        };
        self.declared_total = *total_size;
        self.fallback_name = filename.clone();

        if self.links.as_ref() == Some(&links) {
            if self.finished.is_some() {
                return Ok(());
            }
            self.resume_active().await;
            if !self.active.is_empty() || !self.completed.is_empty() {
                debug!(active = self.active.len(), "multi-link job resumed");
                return Ok(());
            }
            debug!("every sub-transfer vanished, adding them again");
        }

        // replaced sub-transfers resume from their partial files on the engine side
        self.remove_all().await;
        let options = &links.options;

        let mut last_error = None;
        for url in urls {
            match self.session.add(url, options).await {
                Ok(handle) => {
                    debug!(gid = handle.gid(), url = url.as_str(), "sub-transfer added");
                    self.active.push(handle);
                }
                Err(e) => {
                    warn!(url = url.as_str(), error = %e, "failed to add sub-transfer");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if self.active.is_empty() => Err(e),
            _ => {
                self.links = Some(links);
                info!(links = urls.len(), added = self.active.len(), "multi-link job started");
                Ok(())
            }
        }
    }

    async fn pause(&mut self) -> Result<()> {
        for handle in &self.active {
            if let Err(e) = handle.pause().await {
                if !e.is_handle_not_found() {
                    warn!(gid = handle.gid(), error = %e, "failed to pause sub-transfer");
                }
            }
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.remove_all().await;
        self.declared_total = None;
        Ok(())
    }

    async fn snapshot(&mut self) -> Option<StatusSnapshot> {
        if let Some(done) = &self.finished {
            return Some(done.clone());
        }

        // collect everything first so a dropped poll leaves the sets intact
        let mut polled = Vec::with_capacity(self.active.len());
        for handle in &self.active {
            polled.push(handle.status().await);
        }

        let mut still_active = Vec::with_capacity(self.active.len());
        let mut running = Vec::new();
        let mut unresolved = 0usize;
        for (handle, status) in self.active.drain(..).zip(polled) {
            match status {
                Ok(status) if status.state == HttpState::Complete => {
                    self.completed.push(CompletedTransfer {
                        name: status.name,
                        size: status.total_length,
                    });
                }
                Ok(status) if status.state == HttpState::Removed => {
                    debug!(gid = handle.gid(), "sub-transfer removed on the engine");
                }
                Ok(status) => {
                    running.push(status);
                    still_active.push(handle);
                }
                Err(e) if e.is_handle_not_found() => {
                    debug!(gid = handle.gid(), "sub-transfer vanished");
                }
                Err(e) => {
                    debug!(gid = handle.gid(), error = %e, "no sub-transfer status");
                    unresolved += 1;
                    still_active.push(handle);
                }
            }
        }
        self.active = still_active;

        if running.is_empty()
            && unresolved == 0
            && self.completed.is_empty()
            && self.declared_total.is_none()
        {
            return None;
        }

        let snapshot = aggregate(
            &running,
            &self.completed,
            self.declared_total,
            unresolved == 0,
            self.fallback_name.as_deref(),
        );
        if snapshot.status == SnapshotStatus::Complete {
            info!(folder = %snapshot.folder_name, "multi-link job complete");
            self.completed.clear();
            self.finished = Some(snapshot.clone());
        }
        Some(snapshot)
    }
}

/// Merge sub-transfer statuses into one snapshot
///
/// The declared total wins over the summed sub-transfer sizes when it is
/// non-zero. The group is complete once nothing is active (and every
/// sub-transfer answered) and at least [`COMPLETION_RATIO`] of the size is
/// on disk.
pub fn aggregate(
    running: &[HttpStatus],
    completed: &[CompletedTransfer],
    declared_total: Option<u64>,
    all_answered: bool,
    fallback_name: Option<&str>,
) -> StatusSnapshot {
    let completed_bytes: u64 = completed.iter().map(|c| c.size).sum();
    let running_bytes: u64 = running.iter().map(|s| s.completed_length).sum();
    let bytes_downloaded = completed_bytes + running_bytes;
    let download_speed: u64 = running.iter().map(|s| s.download_speed).sum();

    let summed_size = completed_bytes + running.iter().map(|s| s.total_length).sum::<u64>();
    let file_size = declared_total
        .filter(|total| *total > 0)
        .unwrap_or(summed_size);

    let is_complete = running.is_empty()
        && all_answered
        && bytes_downloaded as f64 >= file_size as f64 * COMPLETION_RATIO;

    let status = if is_complete {
        SnapshotStatus::Complete
    } else if !running.is_empty() && running.iter().all(|s| s.state == HttpState::Paused) {
        SnapshotStatus::Paused
    } else if running.iter().any(|s| s.state == HttpState::Error) {
        SnapshotStatus::Error
    } else if running.iter().any(|s| s.state == HttpState::Active) {
        SnapshotStatus::Active
    } else {
        running
            .first()
            .map(|s| map_http_state(s.state))
            .unwrap_or(SnapshotStatus::Active)
    };

    let name = running
        .first()
        .map(|s| s.name.as_str())
        .or_else(|| completed.first().map(|c| c.name.as_str()))
        .or(fallback_name)
        .unwrap_or_default();

    StatusSnapshot::new(folder_name(name), file_size, bytes_downloaded, status)
        .with_speed(download_speed, 0)
}

/// Top-level directory of a (possibly nested) file name
pub fn folder_name(name: &str) -> String {
    name.split(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}
