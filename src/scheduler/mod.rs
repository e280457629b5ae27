//! Job table and VPN-gated dispatch.
//!
//! The [`Scheduler`] owns every job. Three kinds of tasks touch it:
//!
//! - the dispatch loop, which admits and starts jobs and runs the kill-switch
//!   sweep before any dispatch whenever the tunnel forbids protected traffic
//! - one supervisor per running job, which follows the provider and
//!   finalizes the job
//! - retry timers, which put failed jobs back in line
//!
//! All of them go through the table's `RwLock`; readers get cloned
//! snapshots.

mod dispatch;
mod job;
mod request;
mod table;

pub use job::{CancelReason, Job, JobState};
pub use request::SubmitRequest;

use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::DownloadsConfig;
use crate::observability::Metrics;
use crate::providers::{Backend, ProviderSet};
use crate::vpn::{VpnState, VpnStatus};
use table::{JobRecord, JobTable};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("VPN is {0}, protected downloads cannot be accepted")]
    VpnUnavailable(VpnState),

    #[error("{0} backend is disabled")]
    BackendDisabled(Backend),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Result of a cancel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cancellation {
    /// The job was live and is now `cancelled`
    Cancelled(Job),
    /// The job had already finished; nothing changed
    AlreadyTerminal(Job),
}

impl Cancellation {
    pub fn job(&self) -> &Job {
        match self {
            Cancellation::Cancelled(job) | Cancellation::AlreadyTerminal(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Cancellation::Cancelled(job) | Cancellation::AlreadyTerminal(job) => job,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub concurrent_jobs: usize,
    pub default_destination: PathBuf,
    /// How long finished jobs stay visible; `None` keeps them forever
    pub retention: Option<Duration>,
}

impl From<&DownloadsConfig> for SchedulerSettings {
    fn from(config: &DownloadsConfig) -> Self {
        Self {
            concurrent_jobs: config.concurrent_jobs,
            default_destination: config.default_destination.clone(),
            retention: (!config.retention.is_zero()).then(|| config.retention.as_duration()),
        }
    }
}

struct Inner {
    table: RwLock<JobTable>,
    providers: ProviderSet,
    settings: SchedulerSettings,
    vpn: watch::Receiver<VpnStatus>,
    wake: Notify,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

/// Handle to the job table; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        providers: ProviderSet,
        settings: SchedulerSettings,
        vpn: watch::Receiver<VpnStatus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(JobTable::default()),
                providers,
                settings,
                vpn,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Start the dispatch loop
    pub fn spawn(&self) -> JoinHandle<()> {
        tokio::spawn(dispatch::run(self.inner.clone()))
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.inner.providers
    }

    /// Accept a job. It starts `pending` and is picked up by the dispatch loop.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Uuid, SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }

        let request = request.validate(&self.inner.settings.default_destination)?;
        let backend = request.backend;

        self.inner
            .providers
            .get(backend)
            .map_err(|_| SchedulerError::BackendDisabled(backend))?;

        let protected = self.inner.providers.is_protected(backend);
        let vpn_state = self.inner.vpn.borrow().state;
        if protected && vpn_state == VpnState::Disconnected {
            return Err(SchedulerError::VpnUnavailable(vpn_state));
        }

        let policy = request
            .retry
            .or_else(|| self.inner.providers.retry_policy(backend));
        let job = Job::new(
            request.url,
            request.destination,
            backend,
            request.priority,
            protected,
        );
        let id = job.id;

        self.inner.table.write().await.insert(job, policy);
        self.inner.metrics.job_submitted();
        info!(job_id = %id, %backend, protected, priority = request.priority, "Job submitted");

        self.inner.wake.notify_one();
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, SchedulerError> {
        let table = self.inner.table.read().await;
        table
            .by_id(&id)
            .map(|record| record.job.clone())
            .ok_or(SchedulerError::JobNotFound(id))
    }

    /// Every retained job in submission order
    pub async fn list(&self) -> Vec<Job> {
        let table = self.inner.table.read().await;
        table.records().map(|record| record.job.clone()).collect()
    }

    /// Cancel a job on behalf of the user.
    ///
    /// A running job is reported `cancelled` only after its provider has
    /// torn the transfer down. Cancelling a finished job changes nothing.
    pub async fn cancel(&self, id: Uuid) -> Result<Cancellation, SchedulerError> {
        self.inner.cancel(id, CancelReason::User).await
    }

    /// Stop dispatching and cancel every live job with reason `shutdown`
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let waiters = {
            let mut table = self.inner.table.write().await;
            let mut waiters = Vec::new();

            for record in table.records_mut() {
                match record.job.state {
                    state if state.is_terminal() => {}
                    JobState::Running => {
                        if let Some(done) = request_cancel(record, CancelReason::Shutdown) {
                            waiters.push(done);
                        }
                    }
                    _ => cancel_idle(record, CancelReason::Shutdown, &self.inner.metrics),
                }
            }
            waiters
        };

        let running = waiters.len();
        join_all(waiters.into_iter().map(wait_done)).await;
        info!(running, "Scheduler stopped");
    }
}

impl Inner {
    async fn cancel(&self, id: Uuid, reason: CancelReason) -> Result<Cancellation, SchedulerError> {
        let done = {
            let mut table = self.table.write().await;
            let record = table
                .key_of(&id)
                .and_then(|key| table.get_mut(key))
                .ok_or(SchedulerError::JobNotFound(id))?;

            if record.job.state.is_terminal() {
                return Ok(Cancellation::AlreadyTerminal(record.job.clone()));
            }

            if record.job.state != JobState::Running {
                cancel_idle(record, reason, &self.metrics);
                return Ok(Cancellation::Cancelled(record.job.clone()));
            }

            request_cancel(record, reason)
        };

        if let Some(done) = done {
            wait_done(done).await;
        }

        let job = self
            .table
            .read()
            .await
            .by_id(&id)
            .map(|record| record.job.clone())
            .ok_or(SchedulerError::JobNotFound(id))?;

        Ok(match job.state {
            JobState::Cancelled => Cancellation::Cancelled(job),
            _ => Cancellation::AlreadyTerminal(job),
        })
    }
}

/// Cancel a job that has no execution in flight
fn cancel_idle(record: &mut JobRecord, reason: CancelReason, metrics: &Metrics) {
    if record.job.transition(JobState::Cancelled) {
        record.job.cancel_reason = Some(reason);
        metrics.job_cancelled();
        info!(job_id = %record.job.id, %reason, "Job cancelled");
    }
}

/// Signal a running job's execution; returns a receiver that flips once the
/// supervisor has finalized it. The first reason recorded wins.
fn request_cancel(record: &mut JobRecord, reason: CancelReason) -> Option<watch::Receiver<bool>> {
    record.cancel_requested.get_or_insert(reason);
    record.execution.as_ref().map(|execution| {
        execution.cancel.cancel();
        execution.done()
    })
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    // A closed channel means the execution record is gone, which only
    // happens after finalization
    let _ = done.wait_for(|finished| *finished).await;
}
