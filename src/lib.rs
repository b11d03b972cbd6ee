//! Hydra - download orchestration for the game launcher
//!
//! Facade over the orchestration crates.

pub use hydra_core as core;

// Re-export commonly used types for convenience
pub use hydra_core::{
    Backends, BackendKind, DownloadError, ErrorKind, JobId, JobRegistry, Locator,
    OrchestratorConfig, PollReport, SnapshotStatus, StartOptions, StartPayload, StartRequest,
    StatusPoller, StatusSnapshot, TorrentFileEntry,
};
