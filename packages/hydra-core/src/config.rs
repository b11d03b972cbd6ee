//! Configuration for the orchestration core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Public trackers appended to every magnet added to the torrent engine
pub const DEFAULT_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "http://tracker.opentrackr.org:1337/announce",
    "udp://open.tracker.cl:1337/announce",
    "udp://open.demonii.com:1337/announce",
    "udp://open.stealth.si:80/announce",
    "udp://tracker.torrent.eu.org:451/announce",
    "udp://exodus.desync.com:6969/announce",
    "udp://tracker.theoks.net:6969/announce",
    "udp://explodie.org:6969/announce",
    "udp://tracker.tiny-vps.com:6969/announce",
    "udp://bt1.archive.org:6969/announce",
    "udp://bt2.archive.org:6969/announce",
    "https://tracker.renfei.net:443/announce",
    "http://tracker.files.fm:6969/announce",
];

/// Orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between torrent metadata checks
    #[serde(default = "default_metadata_poll_interval_ms")]
    pub metadata_poll_interval_ms: u64,

    /// Upper bound on the torrent metadata wait
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,

    /// Interval between debrid caching status requests
    #[serde(default = "default_debrid_poll_interval_ms")]
    pub debrid_poll_interval_ms: u64,

    /// How long a snapshot request may wait for a busy job before giving up
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Tick of the status poller
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    /// Default HTTP rate cap in bytes per second (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_download_rate: Option<u64>,

    /// Trackers added to every torrent
    #[serde(default = "default_trackers")]
    pub trackers: Vec<String>,

    /// Scratch directory for metadata lookups (None = system temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

fn default_metadata_poll_interval_ms() -> u64 {
    250
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

fn default_debrid_poll_interval_ms() -> u64 {
    1000
}

fn default_snapshot_timeout_ms() -> u64 {
    500
}

fn default_status_poll_interval_ms() -> u64 {
    500
}

fn default_trackers() -> Vec<String> {
    DEFAULT_TRACKERS.iter().map(|t| t.to_string()).collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            metadata_poll_interval_ms: default_metadata_poll_interval_ms(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            debrid_poll_interval_ms: default_debrid_poll_interval_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            max_download_rate: None,
            trackers: default_trackers(),
            scratch_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata_poll_interval(mut self, interval: Duration) -> Self {
        self.metadata_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_debrid_poll_interval(mut self, interval: Duration) -> Self {
        self.debrid_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_status_poll_interval(mut self, interval: Duration) -> Self {
        self.status_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_download_rate(mut self, bytes_per_sec: u64) -> Self {
        self.max_download_rate = Some(bytes_per_sec);
        self
    }

    pub fn with_trackers(mut self, trackers: Vec<String>) -> Self {
        self.trackers = trackers;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn metadata_poll_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_poll_interval_ms.max(1))
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn debrid_poll_interval(&self) -> Duration {
        Duration::from_millis(self.debrid_poll_interval_ms.max(1))
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(1))
    }

    /// Directory under which metadata lookups create their scratch folders
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - HYDRA_METADATA_TIMEOUT: seconds (default: 30)
    /// - HYDRA_METADATA_POLL_MS: milliseconds (default: 250)
    /// - HYDRA_DEBRID_POLL_MS: milliseconds (default: 1000)
    /// - HYDRA_SNAPSHOT_TIMEOUT_MS: milliseconds (default: 500)
    /// - HYDRA_STATUS_POLL_MS: milliseconds (default: 500)
    /// - HYDRA_MAX_DOWNLOAD_RATE: bytes per second (default: unlimited)
    /// - HYDRA_SCRATCH_DIR: path (default: system temp dir)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_number("HYDRA_METADATA_TIMEOUT") {
            config.metadata_timeout_secs = secs;
        }
        if let Some(ms) = env_number("HYDRA_METADATA_POLL_MS") {
            config.metadata_poll_interval_ms = ms;
        }
        if let Some(ms) = env_number("HYDRA_DEBRID_POLL_MS") {
            config.debrid_poll_interval_ms = ms;
        }
        if let Some(ms) = env_number("HYDRA_SNAPSHOT_TIMEOUT_MS") {
            config.snapshot_timeout_ms = ms;
        }
        if let Some(ms) = env_number("HYDRA_STATUS_POLL_MS") {
            config.status_poll_interval_ms = ms;
        }
        if let Some(rate) = env_number("HYDRA_MAX_DOWNLOAD_RATE") {
            config.max_download_rate = Some(rate);
        }
        if let Ok(dir) = std::env::var("HYDRA_SCRATCH_DIR") {
            config.scratch_dir = Some(PathBuf::from(dir));
        }

        config
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize configuration to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn env_number(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.metadata_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.metadata_timeout(), Duration::from_secs(30));
        assert_eq!(config.debrid_poll_interval(), Duration::from_secs(1));
        assert!(config.max_download_rate.is_none());
        assert_eq!(config.trackers.len(), DEFAULT_TRACKERS.len());
    }

    #[test]
    fn test_builder_pattern() {
        let config = OrchestratorConfig::new()
            .with_metadata_timeout(Duration::from_secs(5))
            .with_debrid_poll_interval(Duration::from_millis(100))
            .with_max_download_rate(1024)
            .with_trackers(vec![])
            .with_scratch_dir("/tmp/lookup");

        assert_eq!(config.metadata_timeout_secs, 5);
        assert_eq!(config.debrid_poll_interval_ms, 100);
        assert_eq!(config.max_download_rate, Some(1024));
        assert!(config.trackers.is_empty());
        assert_eq!(config.scratch_root(), PathBuf::from("/tmp/lookup"));
    }

    #[test]
    fn test_from_env() {
        let vars = [
            ("HYDRA_METADATA_TIMEOUT", "12"),
            ("HYDRA_DEBRID_POLL_MS", "2500"),
            ("HYDRA_MAX_DOWNLOAD_RATE", "4096"),
            ("HYDRA_SNAPSHOT_TIMEOUT_MS", "soon"),
            ("HYDRA_SCRATCH_DIR", "/var/tmp/hydra"),
        ];
        for (name, value) in vars {
            std::env::set_var(name, value);
        }

        let config = OrchestratorConfig::from_env();

        for (name, _) in vars {
            std::env::remove_var(name);
        }
        assert_eq!(config.metadata_timeout(), Duration::from_secs(12));
        assert_eq!(config.debrid_poll_interval(), Duration::from_millis(2500));
        assert_eq!(config.max_download_rate, Some(4096));
        // unparsable values keep the default
        assert_eq!(config.snapshot_timeout_ms, 500);
        assert_eq!(config.scratch_root(), PathBuf::from("/var/tmp/hydra"));
        assert_eq!(config.metadata_poll_interval_ms, 250);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OrchestratorConfig::from_json(r#"{"metadata_timeout_secs": 10}"#).unwrap();
        assert_eq!(config.metadata_timeout_secs, 10);
        assert_eq!(config.snapshot_timeout_ms, 500);

        let json = config.to_json().unwrap();
        let back = OrchestratorConfig::from_json(&json).unwrap();
        assert_eq!(back.metadata_timeout_secs, 10);
    }
}
