//! Periodic status collection

use crate::locator::JobId;
use crate::registry::JobRegistry;
use crate::state::{SnapshotStatus, StatusSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything one poller tick observed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    /// Foreground job id, if it produced a snapshot this tick
    pub foreground_job: Option<JobId>,
    pub jobs: BTreeMap<JobId, StatusSnapshot>,
}

impl PollReport {
    pub fn foreground(&self) -> Option<(JobId, &StatusSnapshot)> {
        let job_id = self.foreground_job?;
        self.jobs.get(&job_id).map(|s| (job_id, s))
    }

    /// Completed jobs (seeding, for torrents)
    pub fn seeding(&self) -> impl Iterator<Item = (JobId, &StatusSnapshot)> {
        self.jobs
            .iter()
            .filter(|(_, s)| s.status == SnapshotStatus::Complete && !s.debrid_caching_failed)
            .map(|(id, s)| (*id, s))
    }
}

/// Snapshot every job once
pub async fn collect_report(registry: &JobRegistry) -> PollReport {
    let jobs = registry.all_snapshots().await;
    let foreground_job = registry.foreground().filter(|id| jobs.contains_key(id));
    PollReport {
        foreground_job,
        jobs,
    }
}

/// Background task that snapshots the registry on a fixed interval and
/// publishes the result on a watch channel
pub struct StatusPoller {
    receiver: watch::Receiver<PollReport>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StatusPoller {
    pub fn spawn(registry: Arc<JobRegistry>, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(PollReport::default());
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?interval, "status poller started");

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = collect_report(&registry).await;
                        debug!(jobs = report.jobs.len(), "status poll");
                        if sender.send(report).is_err() {
                            break;
                        }
                    }
                }
            }
            info!("status poller stopped");
        });

        Self {
            receiver,
            cancel,
            task,
        }
    }

    /// Spawn with the interval from the registry's configuration
    pub fn from_config(registry: Arc<JobRegistry>) -> Self {
        let interval = registry.config().status_poll_interval();
        Self::spawn(registry, interval)
    }

    pub fn subscribe(&self) -> watch::Receiver<PollReport> {
        self.receiver.clone()
    }

    /// Most recently published report
    pub fn latest(&self) -> PollReport {
        self.receiver.borrow().clone()
    }

    /// Stop polling and wait for the task to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
