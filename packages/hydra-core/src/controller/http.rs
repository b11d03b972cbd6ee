//! Single-link HTTP jobs

use super::Controller;
use crate::backend::{HttpHandle, HttpOptions, HttpSession, HttpState};
use crate::error::{DownloadError, Result};
use crate::locator::{BackendKind, Locator, StartRequest};
use crate::state::{SnapshotStatus, StatusSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest output filename handed to the engine, in bytes
pub const MAX_FILENAME_BYTES: usize = 200;

struct ActiveTransfer {
    handle: Box<dyn HttpHandle>,
    url: String,
    options: HttpOptions,
}

/// Drives one transfer on the HTTP engine
pub struct HttpController {
    session: Arc<dyn HttpSession>,
    default_rate: Option<u64>,
    transfer: Option<ActiveTransfer>,
}

impl HttpController {
    pub fn new(session: Arc<dyn HttpSession>, default_rate: Option<u64>) -> Self {
        Self {
            session,
            default_rate,
            transfer: None,
        }
    }

    /// Engine id of the current transfer
    pub fn gid(&self) -> Option<&str> {
        self.transfer.as_ref().map(|t| t.handle.gid())
    }

    /// Start `url`, resuming the current transfer if it targets the same
    /// link with the same options
    pub async fn start_transfer(&mut self, url: &str, options: HttpOptions) -> Result<()> {
        if let Some(current) = &self.transfer {
            if current.url == url && current.options == options {
                match current.handle.resume().await {
                    Ok(()) => {
                        debug!(gid = current.handle.gid(), "resumed http transfer");
                        return Ok(());
                    }
                    Err(e) if e.is_handle_not_found() => {
                        debug!(gid = current.handle.gid(), "transfer vanished, adding it again");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.drop_transfer().await;

        let handle = self.session.add(url, &options).await?;
        info!(gid = handle.gid(), url, dir = %options.dir.display(), "http transfer added");
        self.transfer = Some(ActiveTransfer {
            handle,
            url: url.to_string(),
            options,
        });
        Ok(())
    }

    /// Resume the current transfer, adding it again if the engine lost it
    pub async fn resume(&mut self) -> Result<()> {
        let Some(current) = &self.transfer else {
            return Err(DownloadError::handle_not_found("no http transfer"));
        };
        let (url, options) = (current.url.clone(), current.options.clone());
        self.start_transfer(&url, options).await
    }

    async fn drop_transfer(&mut self) {
        if let Some(old) = self.transfer.take() {
            if let Err(e) = old.handle.remove().await {
                if !e.is_handle_not_found() {
                    warn!(gid = old.handle.gid(), error = %e, "failed to remove http transfer");
                }
            }
        }
    }
}

#[async_trait]
impl Controller for HttpController {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn start(&mut self, request: &StartRequest, _cancel: &CancellationToken) -> Result<()> {
        let Locator::SingleUrl {
            url,
            header,
            filename,
        } = &request.locator
        else {
            return Err(DownloadError::invalid_locator(
                "HTTP jobs need a single download link",
            ));
        };

        let options = HttpOptions {
            header: header.clone(),
            dir: PathBuf::from(&request.save_path),
            out: filename.as_deref().map(truncate_filename),
            max_download_rate: request.options.max_download_rate.or(self.default_rate),
        };
        self.start_transfer(url, options).await
    }

    async fn pause(&mut self) -> Result<()> {
        let Some(transfer) = &self.transfer else {
            return Ok(());
        };
        match transfer.handle.pause().await {
            Err(e) if !e.is_handle_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        self.drop_transfer().await;
        Ok(())
    }

    async fn snapshot(&mut self) -> Option<StatusSnapshot> {
        let transfer = self.transfer.as_ref()?;
        let status = match transfer.handle.status().await {
            Ok(status) => status,
            Err(e) => {
                debug!(gid = transfer.handle.gid(), error = %e, "no http status");
                return None;
            }
        };

        Some(
            StatusSnapshot::new(
                status.name,
                status.total_length,
                status.completed_length,
                map_http_state(status.state),
            )
            .with_speed(status.download_speed, 0),
        )
    }
}

/// Translate an engine transfer state into the normalized status
pub fn map_http_state(state: HttpState) -> SnapshotStatus {
    match state {
        HttpState::Active => SnapshotStatus::Active,
        HttpState::Waiting => SnapshotStatus::Waiting,
        HttpState::Paused => SnapshotStatus::Paused,
        HttpState::Error => SnapshotStatus::Error,
        HttpState::Complete => SnapshotStatus::Complete,
        HttpState::Removed => SnapshotStatus::Cancelled,
    }
}

/// Shorten an output filename to [`MAX_FILENAME_BYTES`], keeping its extension
pub fn truncate_filename(filename: &str) -> String {
    if filename.len() <= MAX_FILENAME_BYTES {
        return filename.to_string();
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .filter(|e| e.len() < MAX_FILENAME_BYTES)
        .unwrap_or_default();
    let stem = &filename[..filename.len() - extension.len()];

    let mut budget = MAX_FILENAME_BYTES - extension.len();
    while !stem.is_char_boundary(budget) {
        budget -= 1;
    }
    format!("{}{}", &stem[..budget], extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_untouched() {
        assert_eq!(truncate_filename("game.zip"), "game.zip");
    }

    #[test]
    fn test_long_name_keeps_extension() {
        let name = format!("{}.tar.gz", "a".repeat(300));
        let truncated = truncate_filename(&name);
        assert_eq!(truncated.len(), MAX_FILENAME_BYTES);
        assert!(truncated.ends_with(".gz"));
        assert!(truncated.starts_with("aaa"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let name = format!("{}.iso", "é".repeat(150));
        let truncated = truncate_filename(&name);
        assert!(truncated.len() <= MAX_FILENAME_BYTES);
        assert!(truncated.ends_with(".iso"));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_http_state(HttpState::Complete), SnapshotStatus::Complete);
        assert_eq!(map_http_state(HttpState::Removed), SnapshotStatus::Cancelled);
        assert_eq!(map_http_state(HttpState::Waiting), SnapshotStatus::Waiting);
    }
}
