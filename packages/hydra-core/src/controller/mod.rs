//! Per-job controllers
//!
//! Every registered job owns exactly one controller. The controller wraps the
//! engine handles of its backend family and turns their raw status into a
//! [`StatusSnapshot`].

pub mod debrid;
pub mod http;
pub mod multi_link;
pub mod torrent;

pub use debrid::{DebridCacheState, DebridController};
pub use http::{truncate_filename, HttpController};
pub use multi_link::{CompletedTransfer, MultiLinkController};
pub use torrent::{TorrentController, TorrentFileEntry};

use crate::error::Result;
use crate::locator::{BackendKind, StartRequest};
use crate::state::StatusSnapshot;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Lifecycle shared by all backend families
#[async_trait]
pub trait Controller: Send + Sync {
    /// Backend family this controller drives
    fn kind(&self) -> BackendKind;

    /// Start the job, or restart it in place when it was started before
    ///
    /// # Arguments
    /// * `request` - Locator, destination and per-job options
    /// * `cancel` - Fires when the registry cancels the job while this call runs
    ///
    /// # Returns
    /// * `Ok(())` - The transfer is running (or scheduled on the engine)
    /// * `Err(DownloadError)` - The transfer could not be created
    async fn start(&mut self, request: &StartRequest, cancel: &CancellationToken) -> Result<()>;

    /// Stop transferring data, keeping everything needed to resume
    async fn pause(&mut self) -> Result<()>;

    /// Tear the transfer down and drop its engine handles
    async fn cancel(&mut self) -> Result<()>;

    /// Current normalized status, `None` when there is nothing to report
    async fn snapshot(&mut self) -> Option<StatusSnapshot>;

    /// File table of the job, torrents only
    async fn files(&self) -> Option<Vec<TorrentFileEntry>> {
        None
    }
}
