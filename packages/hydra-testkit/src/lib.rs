//! In-memory download engines
//!
//! Scriptable stand-ins for the torrent engine, the HTTP engine and the
//! debrid service. Tests drive transfer progress by hand and inspect what the
//! orchestration core asked the engines to do.

pub mod debrid;
pub mod http;
pub mod torrent;

pub use debrid::FakeDebridService;
pub use http::{FakeHttpSession, FakeTransfer};
pub use torrent::{FakeTorrent, FakeTorrentSession};

use hydra_core::backend::{TorrentFile, TorrentInfo};

/// Build torrent metadata from `(path, size)` pairs
pub fn torrent_info(name: &str, files: &[(&str, u64)]) -> TorrentInfo {
    let files: Vec<TorrentFile> = files
        .iter()
        .map(|(path, size)| TorrentFile {
            path: path.to_string(),
            size: *size,
        })
        .collect();
    TorrentInfo {
        name: name.to_string(),
        total_size: files.iter().map(|f| f.size).sum(),
        files,
    }
}
