//! Magnets fetched through a debrid caching service
//!
//! The magnet is submitted to the remote service, which caches the torrent
//! on its own servers. A background task polls the caching job and, once the
//! service reports the torrent as downloaded, exchanges the first hoster link
//! for a direct URL and hands it to an [`HttpController`].

use super::http::HttpController;
use super::Controller;
use crate::backend::{DebridService, HttpOptions, HttpSession};
use crate::config::OrchestratorConfig;
use crate::error::{DownloadError, ErrorKind, Result};
use crate::locator::{BackendKind, Locator, StartRequest};
use crate::state::{SnapshotStatus, StatusSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a caching attempt stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebridCacheState {
    /// Nothing submitted yet
    Idle,
    /// The service is caching the torrent
    Caching { progress: u8 },
    /// Cached and handed to the HTTP engine
    Delegated { direct_url: String },
    /// The service gave up on the torrent
    Failed { reason: String },
    /// Stopped before the transfer was delegated
    Cancelled,
}

/// One submission of the magnet to the service
struct CachingAttempt {
    state: parking_lot::Mutex<DebridCacheState>,
    delegate: tokio::sync::Mutex<Option<HttpController>>,
    token: CancellationToken,
    display_name: String,
}

impl CachingAttempt {
    fn new(token: CancellationToken, display_name: String) -> Self {
        Self {
            state: parking_lot::Mutex::new(DebridCacheState::Idle),
            delegate: tokio::sync::Mutex::new(None),
            token,
            display_name,
        }
    }

    fn set_state(&self, state: DebridCacheState) {
        *self.state.lock() = state;
    }

    fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "debrid caching failed");
        self.set_state(DebridCacheState::Failed { reason });
    }

    async fn teardown(&self) {
        self.token.cancel();
        if let Some(mut delegate) = self.delegate.lock().await.take() {
            let _ = delegate.cancel().await;
        }
    }
}

/// Everything the polling task needs, moved into it
struct CachingJob {
    attempt: Arc<CachingAttempt>,
    service: Arc<dyn DebridService>,
    http: Arc<dyn HttpSession>,
    torrent_id: String,
    save_path: String,
    rate: Option<u64>,
    interval: Duration,
}

/// Drives a magnet through the debrid service and then the HTTP engine
pub struct DebridController {
    service: Arc<dyn DebridService>,
    http: Arc<dyn HttpSession>,
    config: Arc<OrchestratorConfig>,
    attempt: Option<Arc<CachingAttempt>>,
    worker: Option<JoinHandle<()>>,
    paused: bool,
}

impl DebridController {
    pub fn new(
        service: Arc<dyn DebridService>,
        http: Arc<dyn HttpSession>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            service,
            http,
            config,
            attempt: None,
            worker: None,
            paused: false,
        }
    }

    /// State of the current caching attempt
    pub fn cache_state(&self) -> DebridCacheState {
        self.attempt
            .as_ref()
            .map(|a| a.state.lock().clone())
            .unwrap_or(DebridCacheState::Idle)
    }

    /// True once the background caching task has exited
    pub fn worker_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the current attempt and wait for its worker to exit
    ///
    /// A worker caught inside an engine call removes whatever that call
    /// created before it returns, so no transfer outlives the attempt.
    async fn abandon_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.teardown().await;
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "debrid worker ended abnormally");
            }
        }
    }
}

#[async_trait]
impl Controller for DebridController {
    fn kind(&self) -> BackendKind {
        BackendKind::Debrid
    }

    async fn start(&mut self, request: &StartRequest, cancel: &CancellationToken) -> Result<()> {
        let Locator::Magnet { uri } = &request.locator else {
            return Err(DownloadError::invalid_locator("Debrid jobs need a magnet URI"));
        };
        self.paused = false;

        // a cached torrent is only resumed on the HTTP engine
        if let Some(attempt) = self.attempt.clone() {
            let delegated = matches!(*attempt.state.lock(), DebridCacheState::Delegated { .. });
            if delegated {
                if let Some(delegate) = attempt.delegate.lock().await.as_mut() {
                    return delegate.resume().await;
                }
            }
            debug!("restarting debrid caching");
        }
        self.abandon_attempt().await;

        let attempt = Arc::new(CachingAttempt::new(
            cancel.child_token(),
            magnet_display_name(uri).unwrap_or_default(),
        ));
        self.attempt = Some(attempt.clone());

        let user = match self.service.user_info().await {
            Ok(user) => user,
            Err(e) => return absorb(&attempt, e),
        };
        debug!(user = %user.username, premium = user.premium, "debrid account validated");

        let torrent_id = match self.service.add_magnet(uri).await {
            Ok(id) => id,
            Err(e) => return absorb(&attempt, e),
        };
        if let Err(e) = self.service.select_all_files(&torrent_id).await {
            return absorb(&attempt, e);
        }
        info!(torrent_id = %torrent_id, "magnet submitted to debrid service");

        attempt.set_state(DebridCacheState::Caching { progress: 0 });
        let job = CachingJob {
            attempt,
            service: self.service.clone(),
            http: self.http.clone(),
            torrent_id,
            save_path: request.save_path.clone(),
            rate: request
                .options
                .max_download_rate
                .or(self.config.max_download_rate),
            interval: self.config.debrid_poll_interval(),
        };
        self.worker = Some(tokio::spawn(job.run()));
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        let Some(attempt) = &self.attempt else {
            return Ok(());
        };
        self.paused = true;
        let mut delegate = attempt.delegate.lock().await;
        match delegate.as_mut() {
            Some(delegate) => delegate.pause().await,
            None => {
                attempt.token.cancel();
                Ok(())
            }
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.abandon_attempt().await;
        Ok(())
    }

    async fn snapshot(&mut self) -> Option<StatusSnapshot> {
        let attempt = self.attempt.as_ref()?;
        let state = attempt.state.lock().clone();
        let name = attempt.display_name.as_str();

        match state {
            DebridCacheState::Idle => None,
            DebridCacheState::Caching { progress } => Some(
                StatusSnapshot::new(name, 0, 0, SnapshotStatus::CachingRemote)
                    .with_debrid(progress, false),
            ),
            DebridCacheState::Delegated { .. } => {
                let mut delegate = attempt.delegate.lock().await;
                let snapshot = delegate.as_mut()?.snapshot().await?;
                Some(snapshot.with_debrid(100, false))
            }
            // failure shares the Complete code and is told apart by the flag
            DebridCacheState::Failed { .. } => Some(
                StatusSnapshot::new(name, 0, 0, SnapshotStatus::Complete).with_debrid(0, true),
            ),
            DebridCacheState::Cancelled => {
                let status = if self.paused {
                    SnapshotStatus::Paused
                } else {
                    SnapshotStatus::Cancelled
                };
                Some(StatusSnapshot::new(name, 0, 0, status).with_debrid(0, false))
            }
        }
    }
}

impl Drop for DebridController {
    fn drop(&mut self) {
        if let Some(attempt) = &self.attempt {
            attempt.token.cancel();
        }
    }
}

impl CachingJob {
    async fn run(self) {
        let attempt = self.attempt.clone();
        if let Err(e) = self.poll_until_delegated().await {
            match e.kind {
                ErrorKind::Cancelled => {
                    debug!("debrid caching stopped");
                    attempt.set_state(DebridCacheState::Cancelled);
                }
                _ => attempt.fail(e.message),
            }
        }
    }

    async fn poll_until_delegated(self) -> Result<()> {
        let token = &self.attempt.token;
        let info = loop {
            checkpoint(token)?;
            let polled = tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::cancelled("Debrid caching cancelled")),
                polled = self.service.torrent_info(&self.torrent_id) => polled,
            };
            match polled {
                Ok(info) => {
                    checkpoint(token)?;
                    if info.status.is_failure() {
                        return Err(DownloadError::remote_caching_failed(format!(
                            "Remote torrent reported {:?}",
                            info.status
                        )));
                    }
                    if info.is_cached() {
                        break info;
                    }
                    self.attempt.set_state(DebridCacheState::Caching {
                        progress: info.progress.min(100),
                    });
                }
                Err(e) => warn!(torrent_id = %self.torrent_id, error = %e, "debrid status poll failed"),
            }

            tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::cancelled("Debrid caching cancelled")),
                _ = tokio::time::sleep(self.interval) => {}
            }
        };

        let link = info.links.first().ok_or_else(|| {
            DownloadError::remote_caching_failed("Cached torrent has no download links")
        })?;
        let direct_url = self.service.unrestrict_link(link).await?;
        let direct_url = urlencoding::decode(&direct_url)
            .map(|decoded| decoded.into_owned())
            .unwrap_or(direct_url);
        checkpoint(token)?;

        let options = HttpOptions {
            header: None,
            dir: delegate_dir(Path::new(&self.save_path), &direct_url),
            out: None,
            max_download_rate: self.rate,
        };
        let mut delegate = HttpController::new(self.http.clone(), self.rate);
        delegate.start_transfer(&direct_url, options).await?;

        let mut slot = self.attempt.delegate.lock().await;
        if token.is_cancelled() {
            let _ = delegate.cancel().await;
            return Err(DownloadError::cancelled("Debrid caching cancelled"));
        }
        *slot = Some(delegate);
        self.attempt
            .set_state(DebridCacheState::Delegated { direct_url: direct_url.clone() });
        info!(url = %direct_url, "debrid transfer delegated to http engine");
        Ok(())
    }
}

fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(DownloadError::cancelled("Debrid caching cancelled"));
    }
    Ok(())
}

/// Errors that mean the service itself is unreachable are returned to the
/// caller, anything else fails the attempt and is reported by snapshots
fn absorb(attempt: &CachingAttempt, error: DownloadError) -> Result<()> {
    if error.kind == ErrorKind::BackendUnavailable {
        attempt.token.cancel();
        return Err(error);
    }
    attempt.fail(error.message);
    Ok(())
}

/// `save_path/<file stem>/` for the decoded direct URL
pub fn delegate_dir(save_path: &Path, direct_url: &str) -> PathBuf {
    let without_query = direct_url.split(['?', '#']).next().unwrap_or_default();
    let file_name = without_query.rsplit('/').next().unwrap_or_default();
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty());

    match stem {
        Some(stem) => save_path.join(stem),
        None => save_path.to_path_buf(),
    }
}

/// Decoded `dn=` parameter of a magnet URI
pub fn magnet_display_name(magnet: &str) -> Option<String> {
    let query = magnet.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "dn")
        .map(|(_, value)| {
            let value = value.replace('+', " ");
            urlencoding::decode(&value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegate_dir_uses_stem() {
        let dir = delegate_dir(
            Path::new("/games"),
            "https://cdn.example.com/d/ABC/My Game v1.2.zip?token=1",
        );
        assert_eq!(dir, PathBuf::from("/games/My Game v1.2"));
    }

    #[test]
    fn test_delegate_dir_without_file_name() {
        let dir = delegate_dir(Path::new("/games"), "https://cdn.example.com/");
        assert_eq!(dir, PathBuf::from("/games"));
    }

    #[test]
    fn test_magnet_display_name() {
        let magnet = "magnet:?xt=urn:btih:abc&dn=Some%20Game+Deluxe&tr=udp://t";
        assert_eq!(magnet_display_name(magnet).as_deref(), Some("Some Game Deluxe"));
        assert_eq!(magnet_display_name("magnet:?xt=urn:btih:abc"), None);
    }
}
