//! Normalized job status and lifecycle types

use crate::locator::{BackendKind, JobId, Locator};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Serialize SystemTime as Unix timestamp in milliseconds
fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    serializer.serialize_i64(millis)
}

/// Serialize Option<SystemTime> as Unix timestamp in milliseconds
fn serialize_option_system_time<S>(
    time: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(t) => {
            let millis = t
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            serializer.serialize_some(&millis)
        }
        None => serializer.serialize_none(),
    }
}

/// Deserialize Unix timestamp in milliseconds to SystemTime
fn deserialize_system_time<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    Ok(UNIX_EPOCH + std::time::Duration::from_millis(millis.max(0) as u64))
}

/// Deserialize Unix timestamp in milliseconds to Option<SystemTime>
fn deserialize_option_system_time<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<i64> = Option::deserialize(deserializer)?;
    Ok(opt.map(|millis| UNIX_EPOCH + std::time::Duration::from_millis(millis.max(0) as u64)))
}

/// Backend-agnostic job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotStatus {
    /// Queued, checking files or fetching metadata
    Waiting,
    /// Transferring data
    Active,
    /// Stopped by the user, resumable
    Paused,
    /// All wanted data is present (includes seeding)
    Complete,
    /// The transfer failed and needs a restart
    Error,
    /// The transfer was torn down
    Cancelled,
    /// A debrid service is still caching the torrent remotely
    CachingRemote,
}

impl SnapshotStatus {
    /// Numeric code used by the legacy status channel
    pub fn code(&self) -> u8 {
        match self {
            SnapshotStatus::Waiting => 2,
            SnapshotStatus::Active => 3,
            SnapshotStatus::Paused => 4,
            SnapshotStatus::Complete => 5,
            SnapshotStatus::CachingRemote => 6,
            SnapshotStatus::Error => 7,
            SnapshotStatus::Cancelled => 8,
        }
    }

    /// Check if the job reached a state it will not leave on its own
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SnapshotStatus::Complete | SnapshotStatus::Error | SnapshotStatus::Cancelled
        )
    }

    /// Check if the job is still moving data or about to
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SnapshotStatus::Waiting | SnapshotStatus::Active | SnapshotStatus::CachingRemote
        )
    }
}

/// Normalized progress record for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub folder_name: String,

    /// Logical total of the job in bytes
    pub file_size: u64,

    pub bytes_downloaded: u64,

    /// Ratio in [0, 1]
    pub progress: f64,

    /// Bytes per second
    pub download_speed: u64,

    /// Bytes per second, torrent backends only
    pub upload_speed: u64,

    pub num_peers: u32,
    pub num_seeds: u32,
    pub status: SnapshotStatus,

    /// Estimated seconds left (None if unknown)
    pub eta_seconds: Option<u64>,

    /// Remote caching percentage, debrid jobs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debrid_caching_progress: Option<u8>,

    #[serde(default)]
    pub debrid_caching_failed: bool,
}

impl StatusSnapshot {
    /// Build a snapshot, clamping counters so the progress invariants hold
    ///
    /// `bytes_downloaded` never exceeds a known `file_size`, `progress` is
    /// derived from the two counters, and a `Complete` job reports full progress.
    pub fn new(
        folder_name: impl Into<String>,
        file_size: u64,
        bytes_downloaded: u64,
        status: SnapshotStatus,
    ) -> Self {
        let (bytes_downloaded, progress) = if file_size > 0 {
            let bytes = if status == SnapshotStatus::Complete {
                file_size
            } else {
                bytes_downloaded.min(file_size)
            };
            (bytes, bytes as f64 / file_size as f64)
        } else if status == SnapshotStatus::Complete {
            (bytes_downloaded, 1.0)
        } else {
            (bytes_downloaded, 0.0)
        };

        Self {
            folder_name: folder_name.into(),
            file_size,
            bytes_downloaded,
            progress,
            download_speed: 0,
            upload_speed: 0,
            num_peers: 0,
            num_seeds: 0,
            status,
            eta_seconds: None,
            debrid_caching_progress: None,
            debrid_caching_failed: false,
        }
    }

    /// Attach transfer rates and derive the ETA from the download rate
    pub fn with_speed(mut self, download_speed: u64, upload_speed: u64) -> Self {
        self.download_speed = download_speed;
        self.upload_speed = upload_speed;
        self.eta_seconds = if download_speed > 0 && self.file_size > self.bytes_downloaded {
            Some((self.file_size - self.bytes_downloaded) / download_speed)
        } else {
            None
        };
        self
    }

    pub fn with_peers(mut self, num_peers: u32, num_seeds: u32) -> Self {
        self.num_peers = num_peers;
        self.num_seeds = num_seeds;
        self
    }

    pub fn with_debrid(mut self, caching_progress: u8, caching_failed: bool) -> Self {
        self.debrid_caching_progress = Some(caching_progress.min(100));
        self.debrid_caching_failed = caching_failed;
        self
    }

    /// Progress as a percentage (0-100)
    pub fn percentage(&self) -> f64 {
        self.progress * 100.0
    }
}

/// Lifecycle record of a registered job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: JobId,

    pub kind: BackendKind,

    pub locator: Locator,

    pub save_path: String,

    /// Job creation timestamp (Unix timestamp in milliseconds)
    #[serde(
        serialize_with = "serialize_system_time",
        deserialize_with = "deserialize_system_time"
    )]
    pub created_at: SystemTime,

    /// Last (re)start timestamp (Unix timestamp in milliseconds)
    #[serde(
        serialize_with = "serialize_option_system_time",
        deserialize_with = "deserialize_option_system_time"
    )]
    pub started_at: Option<SystemTime>,

    /// Last pause timestamp (Unix timestamp in milliseconds, None while running)
    #[serde(
        serialize_with = "serialize_option_system_time",
        deserialize_with = "deserialize_option_system_time"
    )]
    pub paused_at: Option<SystemTime>,
}

impl JobInfo {
    pub fn new(
        job_id: JobId,
        kind: BackendKind,
        locator: Locator,
        save_path: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            kind,
            locator,
            save_path: save_path.into(),
            created_at: SystemTime::now(),
            started_at: None,
            paused_at: None,
        }
    }

    /// Mark the job as (re)started with a possibly updated locator
    pub fn mark_started(&mut self, locator: Locator, save_path: impl Into<String>) {
        self.locator = locator;
        self.save_path = save_path.into();
        self.started_at = Some(SystemTime::now());
        self.paused_at = None;
    }

    pub fn mark_paused(&mut self) {
        self.paused_at = Some(SystemTime::now());
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }
}
