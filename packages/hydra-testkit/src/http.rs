//! Fake HTTP download engine

use async_trait::async_trait;
use hydra_core::backend::{HttpHandle, HttpOptions, HttpSession, HttpState, HttpStatus};
use hydra_core::error::{DownloadError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct TransferData {
    name: String,
    total_length: u64,
    completed_length: u64,
    download_speed: u64,
    state: HttpState,
    /// Removed, or dropped by the engine; status calls fail from then on
    forgotten: bool,
    resume_calls: usize,
}

/// One transfer living in a [`FakeHttpSession`]
#[derive(Debug)]
pub struct FakeTransfer {
    gid: String,
    url: String,
    options: HttpOptions,
    data: Mutex<TransferData>,
}

impl FakeTransfer {
    pub fn gid(&self) -> &str {
        &self.gid
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    pub fn state(&self) -> HttpState {
        self.data.lock().state
    }

    pub fn is_forgotten(&self) -> bool {
        self.data.lock().forgotten
    }

    pub fn resume_calls(&self) -> usize {
        self.data.lock().resume_calls
    }

    pub fn set_name(&self, name: &str) {
        self.data.lock().name = name.to_string();
    }

    pub fn set_progress(&self, completed_length: u64, total_length: u64, download_speed: u64) {
        let mut data = self.data.lock();
        data.completed_length = completed_length;
        data.total_length = total_length;
        data.download_speed = download_speed;
        data.state = HttpState::Active;
    }

    pub fn complete(&self) {
        let mut data = self.data.lock();
        data.completed_length = data.total_length;
        data.download_speed = 0;
        data.state = HttpState::Complete;
    }

    pub fn fail(&self) {
        let mut data = self.data.lock();
        data.download_speed = 0;
        data.state = HttpState::Error;
    }

    /// Make the engine lose track of the transfer
    pub fn forget(&self) {
        self.data.lock().forgotten = true;
    }

    fn with_live<T>(&self, f: impl FnOnce(&mut TransferData) -> T) -> Result<T> {
        let mut data = self.data.lock();
        if data.forgotten {
            return Err(DownloadError::handle_not_found(&self.gid));
        }
        Ok(f(&mut data))
    }
}

struct FakeHttpHandle(Arc<FakeTransfer>);

#[async_trait]
impl HttpHandle for FakeHttpHandle {
    fn gid(&self) -> &str {
        &self.0.gid
    }

    async fn status(&self) -> Result<HttpStatus> {
        self.0.with_live(|data| HttpStatus {
            name: data.name.clone(),
            total_length: data.total_length,
            completed_length: data.completed_length,
            download_speed: data.download_speed,
            state: data.state,
        })
    }

    async fn pause(&self) -> Result<()> {
        self.0.with_live(|data| {
            if data.state != HttpState::Complete {
                data.state = HttpState::Paused;
                data.download_speed = 0;
            }
        })
    }

    async fn resume(&self) -> Result<()> {
        self.0.with_live(|data| {
            data.resume_calls += 1;
            if data.state == HttpState::Paused {
                data.state = HttpState::Active;
            }
        })
    }

    async fn remove(&self) -> Result<()> {
        self.0.with_live(|data| {
            data.state = HttpState::Removed;
            data.forgotten = true;
        })
    }
}

/// HTTP engine keeping everything in memory
#[derive(Default)]
pub struct FakeHttpSession {
    transfers: Mutex<Vec<Arc<FakeTransfer>>>,
    failing_urls: Mutex<HashSet<String>>,
    next_gid: AtomicU64,
    unavailable: AtomicBool,
    add_delay: Mutex<Option<Duration>>,
}

impl FakeHttpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future `add` of `url`
    pub fn fail_url(&self, url: &str) {
        self.failing_urls.lock().insert(url.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every `add` take `delay` (tokio clock) before the transfer exists
    pub fn set_add_delay(&self, delay: Duration) {
        *self.add_delay.lock() = Some(delay);
    }

    /// Every transfer ever added, in order
    pub fn transfers(&self) -> Vec<Arc<FakeTransfer>> {
        self.transfers.lock().clone()
    }

    /// Transfers the engine still tracks
    pub fn live(&self) -> Vec<Arc<FakeTransfer>> {
        self.transfers
            .lock()
            .iter()
            .filter(|t| !t.is_forgotten())
            .cloned()
            .collect()
    }

    /// Latest transfer added for `url`
    pub fn by_url(&self, url: &str) -> Option<Arc<FakeTransfer>> {
        self.transfers
            .lock()
            .iter()
            .rev()
            .find(|t| t.url == url)
            .cloned()
    }

    pub fn last(&self) -> Option<Arc<FakeTransfer>> {
        self.transfers.lock().last().cloned()
    }

    pub fn add_count(&self) -> usize {
        self.transfers.lock().len()
    }
}

#[async_trait]
impl HttpSession for FakeHttpSession {
    async fn add(&self, url: &str, options: &HttpOptions) -> Result<Box<dyn HttpHandle>> {
        let delay = *self.add_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DownloadError::backend_unavailable("HTTP engine is down"));
        }
        if self.failing_urls.lock().contains(url) {
            return Err(DownloadError::backend_unavailable(format!("Rejected {}", url)));
        }

        let name = options.out.clone().unwrap_or_else(|| {
            url.rsplit('/')
                .next()
                .unwrap_or_default()
                .split('?')
                .next()
                .unwrap_or_default()
                .to_string()
        });
        let gid = format!("gid-{}", self.next_gid.fetch_add(1, Ordering::SeqCst) + 1);
        let transfer = Arc::new(FakeTransfer {
            gid,
            url: url.to_string(),
            options: options.clone(),
            data: Mutex::new(TransferData {
                name,
                total_length: 0,
                completed_length: 0,
                download_speed: 0,
                state: HttpState::Waiting,
                forgotten: false,
                resume_calls: 0,
            }),
        });
        self.transfers.lock().push(transfer.clone());
        Ok(Box::new(FakeHttpHandle(transfer)))
    }
}
