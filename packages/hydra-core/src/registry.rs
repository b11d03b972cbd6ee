//! Job registry with dispatch, lifecycle and status polling support

use crate::backend::{AddTorrentParams, DebridService, HttpSession, TorrentFlags, TorrentSession};
use crate::config::OrchestratorConfig;
use crate::controller::torrent::{file_table, wait_for_metadata};
use crate::controller::{
    Controller, DebridController, HttpController, MultiLinkController, TorrentController,
    TorrentFileEntry,
};
use crate::error::{DownloadError, Result};
use crate::locator::{BackendKind, JobId, Locator, StartOptions, StartPayload, StartRequest};
use crate::state::{JobInfo, SnapshotStatus, StatusSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engines shared by every job
#[derive(Clone)]
pub struct Backends {
    pub torrent: Arc<dyn TorrentSession>,
    pub http: Arc<dyn HttpSession>,
    /// Debrid service, `None` when no account is configured
    pub debrid: Option<Arc<dyn DebridService>>,
}

impl Backends {
    pub fn new(torrent: Arc<dyn TorrentSession>, http: Arc<dyn HttpSession>) -> Self {
        Self {
            torrent,
            http,
            debrid: None,
        }
    }

    pub fn with_debrid(mut self, service: Arc<dyn DebridService>) -> Self {
        self.debrid = Some(service);
        self
    }
}

struct JobEntry {
    info: JobInfo,
    controller: Box<dyn Controller>,
}

/// Per-job slot
///
/// Lifecycle calls on one job are serialized by the `entry` lock. The cancel
/// token is reachable without that lock so a cancel can interrupt a start that
/// is still waiting on the engine. `registered` mirrors whether `entry` holds
/// a controller, readable without waiting for an in-flight call.
struct JobSlot {
    cancel: Mutex<CancellationToken>,
    registered: AtomicBool,
    entry: tokio::sync::Mutex<Option<JobEntry>>,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            cancel: Mutex::new(CancellationToken::new()),
            registered: AtomicBool::new(false),
            entry: tokio::sync::Mutex::new(None),
        }
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::Release);
    }
}

/// Registry of download jobs
///
/// Maps job ids to their controller, dispatches start requests to the right
/// backend family and tracks the foreground job.
pub struct JobRegistry {
    backends: Backends,
    config: Arc<OrchestratorConfig>,

    /// Job storage: job_id -> slot
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,

    /// Job whose progress the UI shows
    foreground: Mutex<Option<JobId>>,
}

impl JobRegistry {
    /// Create a registry on top of the given engines
    pub fn new(backends: Backends, config: OrchestratorConfig) -> Self {
        Self {
            backends,
            config: Arc::new(config),
            jobs: RwLock::new(HashMap::new()),
            foreground: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn build_controller(&self, kind: BackendKind) -> Result<Box<dyn Controller>> {
        let rate = self.config.max_download_rate;
        Ok(match kind {
            BackendKind::Http => Box::new(HttpController::new(self.backends.http.clone(), rate)),
            BackendKind::MultiLink => {
                Box::new(MultiLinkController::new(self.backends.http.clone(), rate))
            }
            BackendKind::Torrent => Box::new(TorrentController::new(
                self.backends.torrent.clone(),
                self.config.clone(),
            )),
            BackendKind::Debrid => {
                let service = self.backends.debrid.clone().ok_or_else(|| {
                    DownloadError::backend_unavailable("No debrid service configured")
                })?;
                Box::new(DebridController::new(
                    service,
                    self.backends.http.clone(),
                    self.config.clone(),
                ))
            }
        })
    }

    fn slot(&self, job_id: JobId) -> Option<Arc<JobSlot>> {
        self.jobs.read().get(&job_id).cloned()
    }

    fn slot_or_insert(&self, job_id: JobId) -> Arc<JobSlot> {
        self.jobs
            .write()
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobSlot::new()))
            .clone()
    }

    fn is_current(&self, job_id: JobId, slot: &Arc<JobSlot>) -> bool {
        self.jobs
            .read()
            .get(&job_id)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
    }

    fn remove_if_current(&self, job_id: JobId, slot: &Arc<JobSlot>) {
        let mut jobs = self.jobs.write();
        if jobs
            .get(&job_id)
            .map_or(false, |current| Arc::ptr_eq(current, slot))
        {
            jobs.remove(&job_id);
        }
    }

    fn clear_foreground_if(&self, job_id: JobId) {
        let mut foreground = self.foreground.lock();
        if *foreground == Some(job_id) {
            *foreground = None;
        }
    }

    /// Start a job, or restart it in place
    ///
    /// A job already registered with the same backend family is restarted
    /// through its existing controller (which resumes instead of duplicating
    /// the transfer). A job registered with a different family is torn down
    /// and replaced.
    ///
    /// # Arguments
    /// * `job_id` - Caller-chosen job id
    /// * `request` - Locator, destination and options
    ///
    /// # Returns
    /// * `Ok(())` - The job is registered and running
    /// * `Err(DownloadError)` - Nothing was registered for a new job
    pub async fn start(&self, job_id: JobId, request: StartRequest) -> Result<()> {
        request.locator.validate()?;
        let kind = request.backend_kind();

        loop {
            let slot = self.slot_or_insert(job_id);
            let mut entry = slot.entry.lock().await;
            // a cancel may have retired this slot while we waited
            if !self.is_current(job_id, &slot) {
                continue;
            }

            let token = CancellationToken::new();
            *slot.cancel.lock() = token.clone();

            let outcome = self.start_locked(&mut entry, job_id, kind, &request, &token).await;
            slot.set_registered(entry.is_some());
            if entry.is_none() {
                self.remove_if_current(job_id, &slot);
            }
            drop(entry);

            return match outcome {
                Ok(()) => {
                    if !request.options.seed_only {
                        *self.foreground.lock() = Some(job_id);
                    }
                    info!(job_id, ?kind, locator = %request.locator.describe(), "job started");
                    Ok(())
                }
                Err(e) => {
                    warn!(job_id, ?kind, error = %e, "job start failed");
                    Err(e)
                }
            };
        }
    }

    async fn start_locked(
        &self,
        entry: &mut Option<JobEntry>,
        job_id: JobId,
        kind: BackendKind,
        request: &StartRequest,
        token: &CancellationToken,
    ) -> Result<()> {
        if let Some(existing) = entry.as_ref() {
            if existing.controller.kind() != kind {
                debug!(job_id, from = ?existing.info.kind, to = ?kind, "replacing controller");
                if let Some(mut old) = entry.take() {
                    if let Err(e) = old.controller.cancel().await {
                        warn!(job_id, error = %e, "failed to tear down replaced controller");
                    }
                }
            }
        }

        match entry.as_mut() {
            Some(existing) => {
                existing.controller.start(request, token).await?;
                existing
                    .info
                    .mark_started(request.locator.clone(), request.save_path.clone());
            }
            None => {
                let mut controller = self.build_controller(kind)?;
                controller.start(request, token).await?;
                let mut info =
                    JobInfo::new(job_id, kind, request.locator.clone(), request.save_path.clone());
                info.mark_started(request.locator.clone(), request.save_path.clone());
                *entry = Some(JobEntry { info, controller });
            }
        }
        Ok(())
    }

    /// Pause a job, keeping it registered
    ///
    /// Unknown ids are a no-op.
    pub async fn pause(&self, job_id: JobId) -> Result<()> {
        let Some(slot) = self.slot(job_id) else {
            return Ok(());
        };
        let mut entry = slot.entry.lock().await;
        if let Some(job) = entry.as_mut() {
            job.controller.pause().await?;
            job.info.mark_paused();
            info!(job_id, "job paused");
        }
        drop(entry);

        self.clear_foreground_if(job_id);
        Ok(())
    }

    /// Cancel a job and forget it
    ///
    /// Never fails. Unknown ids are a no-op. An in-flight start for the same
    /// job observes the cancellation at its next checkpoint.
    pub async fn cancel(&self, job_id: JobId) {
        let Some(slot) = self.slot(job_id) else {
            return;
        };
        slot.cancel.lock().cancel();

        let mut entry = slot.entry.lock().await;
        slot.set_registered(false);
        if let Some(mut job) = entry.take() {
            if let Err(e) = job.controller.cancel().await {
                warn!(job_id, error = %e, "controller teardown failed");
            }
            info!(job_id, "job cancelled");
        }
        self.remove_if_current(job_id, &slot);
        drop(entry);

        self.clear_foreground_if(job_id);
    }

    /// Current snapshot of a job
    ///
    /// Returns `None` for unknown ids, jobs with nothing to report yet, and
    /// jobs busy for longer than the configured snapshot timeout.
    pub async fn snapshot(&self, job_id: JobId) -> Option<StatusSnapshot> {
        let slot = self.slot(job_id)?;
        let timeout = self.config.snapshot_timeout();
        let polled = tokio::time::timeout(timeout, async {
            let mut entry = slot.entry.lock().await;
            entry.as_mut()?.controller.snapshot().await
        })
        .await;

        match polled {
            Ok(snapshot) => snapshot,
            Err(_) => {
                debug!(job_id, ?timeout, "snapshot timed out");
                None
            }
        }
    }

    /// Snapshot of every job that currently has one, keyed by job id
    pub async fn all_snapshots(&self) -> BTreeMap<JobId, StatusSnapshot> {
        let mut snapshots = BTreeMap::new();
        for job_id in self.job_ids() {
            if let Some(snapshot) = self.snapshot(job_id).await {
                snapshots.insert(job_id, snapshot);
            }
        }
        snapshots
    }

    /// Snapshot of the foreground job
    pub async fn foreground_snapshot(&self) -> Option<(JobId, StatusSnapshot)> {
        let job_id = self.foreground()?;
        self.snapshot(job_id).await.map(|s| (job_id, s))
    }

    /// Completed jobs, which are the ones seeding for torrents
    ///
    /// Failed debrid jobs also report `Complete` and are left out.
    pub async fn seed_snapshots(&self) -> Vec<(JobId, StatusSnapshot)> {
        self.all_snapshots()
            .await
            .into_iter()
            .filter(|(_, s)| s.status == SnapshotStatus::Complete && !s.debrid_caching_failed)
            .collect()
    }

    pub fn foreground(&self) -> Option<JobId> {
        *self.foreground.lock()
    }

    pub fn set_foreground(&self, job_id: Option<JobId>) {
        *self.foreground.lock() = job_id;
    }

    /// Registered job ids in ascending order
    ///
    /// A job whose first start is still running is not listed yet.
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .read()
            .iter()
            .filter(|(_, slot)| slot.is_registered())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Lifecycle record of a job
    pub async fn job_info(&self, job_id: JobId) -> Option<JobInfo> {
        let slot = self.slot(job_id)?;
        let entry =
            tokio::time::timeout(self.config.snapshot_timeout(), slot.entry.lock()).await.ok()?;
        entry.as_ref().map(|job| job.info.clone())
    }

    /// Whether a controller is registered under `job_id`
    pub fn contains(&self, job_id: JobId) -> bool {
        self.slot(job_id).map_or(false, |slot| slot.is_registered())
    }

    /// File table of a registered torrent job
    ///
    /// Returns `None` when the job stays busy past the snapshot timeout.
    pub async fn torrent_files(&self, job_id: JobId) -> Option<Vec<TorrentFileEntry>> {
        let slot = self.slot(job_id)?;
        let timeout = self.config.snapshot_timeout();
        tokio::time::timeout(timeout, async {
            let entry = slot.entry.lock().await;
            entry.as_ref()?.controller.files().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Add a completed torrent back in upload-only mode
    pub async fn resume_seeding(
        &self,
        job_id: JobId,
        magnet: impl Into<String>,
        save_path: impl Into<String>,
    ) -> Result<()> {
        let request = StartRequest::new(Locator::magnet(magnet), save_path)
            .with_options(StartOptions::default().seeding());
        self.start(job_id, request).await
    }

    /// Stop seeding a job and forget it
    pub async fn pause_seeding(&self, job_id: JobId) {
        self.cancel(job_id).await;
    }

    /// Fetch a magnet's file table without downloading any content
    ///
    /// The torrent is added paused into a scratch directory and removed again
    /// whatever the outcome.
    ///
    /// # Returns
    /// * `Err(MetadataTimeout)` - No metadata within `timeout`
    pub async fn list_torrent_files(
        &self,
        magnet: &str,
        timeout: Duration,
    ) -> Result<Vec<TorrentFileEntry>> {
        let locator = Locator::magnet(magnet);
        locator.validate()?;

        let scratch = self
            .config
            .scratch_root()
            .join(format!("hydra-lookup-{}", Uuid::new_v4()));
        let handle = self
            .backends
            .torrent
            .add_torrent(AddTorrentParams {
                source: magnet.to_string(),
                save_path: scratch,
                flags: TorrentFlags {
                    paused: true,
                    ..TorrentFlags::default()
                },
                trackers: self.config.trackers.clone(),
            })
            .await?;

        let listed = async {
            wait_for_metadata(
                handle.as_ref(),
                self.config.metadata_poll_interval(),
                timeout,
                &CancellationToken::new(),
            )
            .await?;
            let info = handle
                .torrent_info()
                .await?
                .ok_or_else(|| DownloadError::metadata_timeout(timeout))?;
            Ok::<_, DownloadError>(file_table(handle.as_ref(), &info).await)
        }
        .await;

        if let Err(e) = self.backends.torrent.remove_torrent(handle.as_ref()).await {
            warn!(torrent = handle.id(), error = %e, "failed to remove lookup torrent");
        }
        listed
    }

    /// Restore the jobs handed over at process start
    ///
    /// `initial_download` is one URL-encoded start payload, `initial_seeding`
    /// a URL-encoded JSON list of payloads for completed torrents. Entries
    /// that fail to parse or start are logged and skipped.
    ///
    /// # Returns
    /// Number of jobs started
    pub async fn bootstrap(
        &self,
        initial_download: Option<&str>,
        initial_seeding: Option<&str>,
    ) -> usize {
        let mut started = 0;

        if let Some(raw) = initial_download.filter(|raw| !raw.is_empty()) {
            let parsed = StartPayload::from_encoded(raw).and_then(StartPayload::into_request);
            match parsed {
                Ok((job_id, request)) => match self.start(job_id, request).await {
                    Ok(()) => started += 1,
                    Err(e) => warn!(job_id, error = %e, "initial download not started"),
                },
                Err(e) => warn!(error = %e, "unreadable initial download payload"),
            }
        }

        if let Some(raw) = initial_seeding.filter(|raw| !raw.is_empty()) {
            match parse_seed_list(raw) {
                Ok(seeds) => {
                    for seed in seeds {
                        let job_id = seed.game_id;
                        let Some(magnet) = seed.url.as_str().map(str::to_string) else {
                            warn!(job_id, "seed entry without a magnet");
                            continue;
                        };
                        match self.resume_seeding(job_id, magnet, seed.save_path).await {
                            Ok(()) => started += 1,
                            Err(e) => warn!(job_id, error = %e, "seeding not resumed"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "unreadable seeding payload"),
            }
        }

        started
    }

    /// Cancel every job, including starts still in flight
    pub async fn shutdown(&self) {
        let job_ids: Vec<JobId> = self.jobs.read().keys().copied().collect();
        info!(jobs = job_ids.len(), "shutting down job registry");
        for job_id in job_ids {
            self.cancel(job_id).await;
        }
        self.set_foreground(None);
    }
}

fn parse_seed_list(raw: &str) -> Result<Vec<StartPayload>> {
    let decoded = urlencoding::decode(raw)
        .map_err(|e| DownloadError::invalid_input(format!("Bad payload encoding: {}", e)))?;
    Ok(serde_json::from_str(&decoded)?)
}
