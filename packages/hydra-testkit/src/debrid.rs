//! Fake debrid service

use async_trait::async_trait;
use hydra_core::backend::{DebridService, DebridTorrentInfo, DebridTorrentStatus, DebridUser};
use hydra_core::error::{DownloadError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Debrid service answering from a script
///
/// Each `torrent_info` call consumes the next scripted status; the last one
/// keeps being returned once the script runs out.
#[derive(Default)]
pub struct FakeDebridService {
    user_error: Mutex<Option<DownloadError>>,
    add_error: Mutex<Option<DownloadError>>,
    script: Mutex<VecDeque<DebridTorrentInfo>>,
    direct_links: Mutex<HashMap<String, String>>,
    added_magnets: Mutex<Vec<String>>,
    info_calls: AtomicUsize,
    unrestrict_calls: AtomicUsize,
}

impl FakeDebridService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue remote statuses, in the order `torrent_info` returns them
    pub fn script(&self, statuses: Vec<DebridTorrentInfo>) {
        self.script.lock().extend(statuses);
    }

    /// Make account validation fail with `error`
    pub fn fail_user(&self, error: DownloadError) {
        *self.user_error.lock() = Some(error);
    }

    /// Make magnet submission fail with `error`
    pub fn fail_add(&self, error: DownloadError) {
        *self.add_error.lock() = Some(error);
    }

    pub fn set_direct_link(&self, link: &str, direct_url: &str) {
        self.direct_links
            .lock()
            .insert(link.to_string(), direct_url.to_string());
    }

    pub fn added_magnets(&self) -> Vec<String> {
        self.added_magnets.lock().clone()
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn unrestrict_calls(&self) -> usize {
        self.unrestrict_calls.load(Ordering::SeqCst)
    }

    /// Remote torrent still being cached
    pub fn caching(progress: u8) -> DebridTorrentInfo {
        DebridTorrentInfo {
            status: DebridTorrentStatus::Downloading,
            progress,
            links: vec![],
        }
    }

    /// Remote torrent fully cached with the given hoster links
    pub fn downloaded(links: &[&str]) -> DebridTorrentInfo {
        DebridTorrentInfo {
            status: DebridTorrentStatus::Downloaded,
            progress: 100,
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn failed(status: DebridTorrentStatus) -> DebridTorrentInfo {
        DebridTorrentInfo {
            status,
            progress: 0,
            links: vec![],
        }
    }
}

#[async_trait]
impl DebridService for FakeDebridService {
    async fn user_info(&self) -> Result<DebridUser> {
        if let Some(error) = self.user_error.lock().clone() {
            return Err(error);
        }
        Ok(DebridUser {
            username: "tester".to_string(),
            premium: true,
        })
    }

    async fn add_magnet(&self, magnet: &str) -> Result<String> {
        if let Some(error) = self.add_error.lock().clone() {
            return Err(error);
        }
        let mut added = self.added_magnets.lock();
        added.push(magnet.to_string());
        Ok(format!("remote-{}", added.len()))
    }

    async fn select_all_files(&self, _torrent_id: &str) -> Result<()> {
        Ok(())
    }

    async fn torrent_info(&self, _torrent_id: &str) -> Result<DebridTorrentInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let info = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(info.unwrap_or_else(|| Self::caching(0)))
    }

    async fn unrestrict_link(&self, link: &str) -> Result<String> {
        self.unrestrict_calls.fetch_add(1, Ordering::SeqCst);
        let direct = self.direct_links.lock().get(link).cloned();
        Ok(direct.unwrap_or_else(|| {
            let tail = link.rsplit('/').next().unwrap_or_default();
            format!("https://direct.example.com/{}", tail)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_repeats_last_status() {
        let service = FakeDebridService::new();
        service.script(vec![FakeDebridService::caching(10), FakeDebridService::caching(60)]);

        assert_eq!(service.torrent_info("x").await.unwrap().progress, 10);
        assert_eq!(service.torrent_info("x").await.unwrap().progress, 60);
        assert_eq!(service.torrent_info("x").await.unwrap().progress, 60);
        assert_eq!(service.info_calls(), 3);
    }
}
