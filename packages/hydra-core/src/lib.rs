//! Download orchestration core
//!
//! This crate multiplexes game downloads over three kinds of backends:
//! - A BitTorrent engine, with optional per-file selection
//! - An HTTP download engine, for single links and merged link lists
//! - A debrid caching service that turns magnets into direct links
//!
//! Jobs are keyed by an external id, dispatched to a controller by the shape
//! of their locator, and report a backend-agnostic [`StatusSnapshot`].

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod locator;
pub mod poller;
pub mod registry;
pub mod state;

pub use backend::{DebridService, HttpSession, TorrentSession};
pub use config::OrchestratorConfig;
pub use controller::{Controller, TorrentFileEntry};
pub use error::{DownloadError, ErrorKind, Result};
pub use locator::{dispatch_kind, BackendKind, JobId, Locator, StartOptions, StartPayload, StartRequest};
pub use poller::{collect_report, PollReport, StatusPoller};
pub use registry::{Backends, JobRegistry};
pub use state::{JobInfo, SnapshotStatus, StatusSnapshot};
