//! Contracts consumed from the download engines
//!
//! The core never speaks a wire protocol itself. A torrent engine, an HTTP
//! download engine and a debrid service are plugged in through these traits,
//! and their raw status codes are translated into the enums below exactly once,
//! inside the adapter.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Torrent engine
// ---------------------------------------------------------------------------

/// Torrent state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    CheckingResumeData,
}

impl TorrentState {
    /// Translate the engine's numeric state
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TorrentState::CheckingFiles),
            2 => Some(TorrentState::DownloadingMetadata),
            3 => Some(TorrentState::Downloading),
            4 => Some(TorrentState::Finished),
            5 => Some(TorrentState::Seeding),
            7 => Some(TorrentState::CheckingResumeData),
            _ => None,
        }
    }
}

/// Per-file download priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePriority {
    Skip,
    Low,
    Normal,
    Top,
}

impl FilePriority {
    /// Engine priority level
    pub fn level(&self) -> u8 {
        match self {
            FilePriority::Skip => 0,
            FilePriority::Low => 1,
            FilePriority::Normal => 4,
            FilePriority::Top => 7,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            0 => FilePriority::Skip,
            1..=3 => FilePriority::Low,
            4..=6 => FilePriority::Normal,
            _ => FilePriority::Top,
        }
    }

    pub fn is_wanted(&self) -> bool {
        *self != FilePriority::Skip
    }
}

/// Flags applied when a torrent is added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TorrentFlags {
    /// Start paused
    pub paused: bool,
    /// Let the engine queue and resume the torrent on its own
    pub auto_managed: bool,
    /// Only upload, never request pieces
    pub upload_mode: bool,
}

impl TorrentFlags {
    pub fn auto_managed() -> Self {
        Self {
            auto_managed: true,
            ..Self::default()
        }
    }

    pub fn paused_auto_managed() -> Self {
        Self {
            paused: true,
            auto_managed: true,
            ..Self::default()
        }
    }

    pub fn upload_mode() -> Self {
        Self {
            upload_mode: true,
            ..Self::default()
        }
    }
}

/// Parameters for adding a torrent to the session
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    /// Magnet URI
    pub source: String,
    pub save_path: PathBuf,
    pub flags: TorrentFlags,
    pub trackers: Vec<String>,
}

/// Live status of one torrent
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentStatus {
    /// Engine progress ratio in [0, 1]
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub num_peers: u32,
    pub num_seeds: u32,
    pub state: TorrentState,
    /// Bytes of wanted pieces already verified
    pub total_wanted_done: u64,
    pub has_metadata: bool,
    pub paused: bool,
}

/// One entry of a torrent's file table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub path: String,
    pub size: u64,
}

/// Torrent metadata, available once fetched from peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub name: String,
    pub total_size: u64,
    pub files: Vec<TorrentFile>,
}

/// Handle to one torrent inside a [`TorrentSession`]
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Stable identifier (usually the info hash)
    fn id(&self) -> &str;

    /// Current status
    ///
    /// # Returns
    /// * `Err(HandleNotFound)` - The torrent is no longer part of the session
    async fn status(&self) -> Result<TorrentStatus>;

    /// Metadata, `None` until the file table is known
    async fn torrent_info(&self) -> Result<Option<TorrentInfo>>;

    async fn file_priority(&self, index: usize) -> Result<FilePriority>;

    async fn set_file_priority(&self, index: usize, priority: FilePriority) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn set_auto_managed(&self, enabled: bool) -> Result<()>;
}

/// Long-lived torrent engine session shared by every torrent job
#[async_trait]
pub trait TorrentSession: Send + Sync {
    /// Add a torrent and return its handle
    ///
    /// # Returns
    /// * `Err(BackendUnavailable)` - The engine cannot accept torrents
    /// * `Err(InvalidLocator)` - The engine rejected the magnet
    async fn add_torrent(&self, params: AddTorrentParams) -> Result<Box<dyn TorrentHandle>>;

    /// Remove a torrent, keeping downloaded data on disk
    async fn remove_torrent(&self, handle: &dyn TorrentHandle) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP download engine
// ---------------------------------------------------------------------------

/// Transfer state as reported by the HTTP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpState {
    Active,
    Waiting,
    Paused,
    Error,
    Complete,
    Removed,
}

impl HttpState {
    /// Translate the engine's status string
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(HttpState::Active),
            "waiting" => Some(HttpState::Waiting),
            "paused" => Some(HttpState::Paused),
            "error" => Some(HttpState::Error),
            "complete" => Some(HttpState::Complete),
            "removed" => Some(HttpState::Removed),
            _ => None,
        }
    }
}

/// Options for one HTTP transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpOptions {
    /// Raw request header line, e.g. `Authorization: Bearer ...`
    pub header: Option<String>,
    /// Destination directory
    pub dir: PathBuf,
    /// Output filename (None lets the engine pick one)
    pub out: Option<String>,
    /// Rate cap in bytes per second
    pub max_download_rate: Option<u64>,
}

/// Live status of one HTTP transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatus {
    /// File name, possibly a relative path for multi-file sets
    pub name: String,
    pub total_length: u64,
    pub completed_length: u64,
    pub download_speed: u64,
    pub state: HttpState,
}

/// Handle to one transfer inside an [`HttpSession`]
#[async_trait]
pub trait HttpHandle: Send + Sync {
    /// Engine-assigned transfer id
    fn gid(&self) -> &str;

    /// Current status
    ///
    /// # Returns
    /// * `Err(HandleNotFound)` - The engine no longer knows this transfer
    async fn status(&self) -> Result<HttpStatus>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Stop the transfer and forget it
    async fn remove(&self) -> Result<()>;
}

/// Long-lived HTTP engine session shared by every HTTP job
#[async_trait]
pub trait HttpSession: Send + Sync {
    /// Queue a transfer
    ///
    /// # Returns
    /// * `Err(BackendUnavailable)` - The engine is not running
    async fn add(&self, url: &str, options: &HttpOptions) -> Result<Box<dyn HttpHandle>>;
}

// ---------------------------------------------------------------------------
// Debrid caching service
// ---------------------------------------------------------------------------

/// Remote torrent status as reported by the debrid service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebridTorrentStatus {
    MagnetConversion,
    WaitingFilesSelection,
    Queued,
    Downloading,
    Compressing,
    Uploading,
    Downloaded,
    MagnetError,
    Error,
    Virus,
    Dead,
    #[serde(other)]
    Unknown,
}

impl DebridTorrentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "magnet_conversion" => DebridTorrentStatus::MagnetConversion,
            "waiting_files_selection" => DebridTorrentStatus::WaitingFilesSelection,
            "queued" => DebridTorrentStatus::Queued,
            "downloading" => DebridTorrentStatus::Downloading,
            "compressing" => DebridTorrentStatus::Compressing,
            "uploading" => DebridTorrentStatus::Uploading,
            "downloaded" => DebridTorrentStatus::Downloaded,
            "magnet_error" => DebridTorrentStatus::MagnetError,
            "error" => DebridTorrentStatus::Error,
            "virus" => DebridTorrentStatus::Virus,
            "dead" => DebridTorrentStatus::Dead,
            _ => DebridTorrentStatus::Unknown,
        }
    }

    /// Remote states the caching job never recovers from
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DebridTorrentStatus::MagnetError
                | DebridTorrentStatus::Error
                | DebridTorrentStatus::Virus
                | DebridTorrentStatus::Dead
        )
    }
}

/// Account details returned by the debrid service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebridUser {
    pub username: String,
    pub premium: bool,
}

/// Remote caching job status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebridTorrentInfo {
    pub status: DebridTorrentStatus,
    /// Caching percentage (0-100)
    pub progress: u8,
    /// Hoster links, available once cached
    pub links: Vec<String>,
}

impl DebridTorrentInfo {
    pub fn is_cached(&self) -> bool {
        self.status == DebridTorrentStatus::Downloaded && self.progress >= 100
    }
}

/// Remote caching service that turns a magnet into a direct link
#[async_trait]
pub trait DebridService: Send + Sync {
    /// Validate the configured account
    async fn user_info(&self) -> Result<DebridUser>;

    /// Submit a magnet, returning the remote torrent id
    async fn add_magnet(&self, magnet: &str) -> Result<String>;

    async fn select_all_files(&self, torrent_id: &str) -> Result<()>;

    async fn torrent_info(&self, torrent_id: &str) -> Result<DebridTorrentInfo>;

    /// Exchange a hoster link for a direct download URL
    async fn unrestrict_link(&self, link: &str) -> Result<String>;
}
