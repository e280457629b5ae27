use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::table::{Execution, JobKey};
use super::{CancelReason, Inner, JobState, wait_done};
use crate::providers::{
    Backend, Failure, FailureCode, Progress, TransferOutcome, TransferRequest,
};
use crate::retry::{self, RetryDecision};
use crate::vpn::VpnState;

/// Minimum spacing between progress writes into the job table
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on the time between retention passes
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Dispatch loop: sweep, then fill free slots, then sleep until something changes
pub(super) async fn run(inner: Arc<Inner>) {
    let mut vpn = inner.vpn.clone();
    let mut vpn_open = true;

    let retention = inner.settings.retention;
    let prune_every = retention.map_or(PRUNE_INTERVAL, |r| r.min(PRUNE_INTERVAL));
    let mut prune = tokio::time::interval_at(Instant::now() + prune_every, prune_every);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        concurrent_jobs = inner.settings.concurrent_jobs,
        "Dispatch loop started"
    );

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        let state = vpn.borrow_and_update().state;
        if let Some(reason) = sweep_reason(state) {
            inner.sweep_protected(reason).await;
        }

        inner.pump().await;

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            changed = vpn.changed(), if vpn_open => {
                if changed.is_err() {
                    warn!("VPN status channel closed, gate frozen at last state");
                    vpn_open = false;
                }
            }
            _ = inner.wake.notified() => {}
            _ = prune.tick(), if retention.is_some() => inner.prune_expired().await,
        }
    }

    info!("Dispatch loop stopped");
}

fn sweep_reason(state: VpnState) -> Option<CancelReason> {
    match state {
        VpnState::Killswitch => Some(CancelReason::VpnKillswitch),
        VpnState::Disconnected | VpnState::Connecting => Some(CancelReason::VpnDisconnected),
        VpnState::Connected | VpnState::Degraded => None,
    }
}

impl Inner {
    /// Cancel every running protected job and wait for all of them to finish
    async fn sweep_protected(&self, reason: CancelReason) {
        let waiters = {
            let mut table = self.table.write().await;
            table
                .records_mut()
                .filter(|record| record.job.state == JobState::Running && record.job.protected)
                .filter_map(|record| super::request_cancel(record, reason))
                .collect::<Vec<_>>()
        };

        if waiters.is_empty() {
            return;
        }

        let count = waiters.len();
        if reason == CancelReason::VpnKillswitch {
            error!(count, "Kill-switch engaged, cancelling protected downloads");
        } else {
            warn!(count, %reason, "VPN down, cancelling protected downloads");
        }

        join_all(waiters.into_iter().map(wait_done)).await;
        self.metrics.killswitch_sweep();
        info!(count, %reason, "Protected downloads stopped");
    }

    /// Admit pending jobs and start as many queued jobs as the cap and the
    /// VPN gate allow
    async fn pump(self: &Arc<Self>) {
        let mut table = self.table.write().await;
        if self.shutdown.is_cancelled() {
            return;
        }

        let admitted = table.admit_pending();
        if admitted > 0 {
            debug!(admitted, "Admitted pending jobs");
        }

        // Re-read under the lock: a transition since the sweep must be swept first
        let vpn_state = self.vpn.borrow().state;
        if vpn_state.forbids_protected_traffic()
            && table
                .records()
                .any(|record| record.job.state == JobState::Running && record.job.protected)
        {
            debug!(vpn = %vpn_state, "Protected jobs still running, holding dispatch");
            return;
        }

        let mut running = table.count_in(JobState::Running);
        while running < self.settings.concurrent_jobs {
            let Some(key) =
                table.pop_ready(|record| !record.job.protected || vpn_state.allows_dispatch())
            else {
                break;
            };

            let Some(record) = table.get_mut(key) else {
                continue;
            };
            if !record.job.transition(JobState::Running) {
                continue;
            }
            record.job.attempt += 1;
            record.job.progress = Progress::default();

            let execution = Execution::new();
            let cancel = execution.cancel.clone();
            record.execution = Some(execution);

            let request = TransferRequest {
                job_id: record.job.id,
                url: record.job.url.clone(),
                destination: record.job.destination.clone(),
            };
            let backend = record.job.backend;

            info!(
                job_id = %request.job_id,
                %backend,
                attempt = record.job.attempt,
                "Dispatching job"
            );

            tokio::spawn(supervise(self.clone(), key, request, backend, cancel));
            running += 1;
        }
    }

    async fn record_progress(&self, key: JobKey, progress: Progress) {
        let mut table = self.table.write().await;
        if let Some(record) = table.get_mut(key) {
            if record.job.state == JobState::Running {
                record.job.progress = progress;
            }
        }
    }

    /// Apply a transfer's outcome to its job and release the slot
    async fn finish(self: &Arc<Self>, key: JobKey, outcome: TransferOutcome, progress: Progress) {
        let mut table = self.table.write().await;
        // Running jobs are never pruned
        let Some(record) = table.get_mut(key) else {
            return;
        };
        let job_id = record.job.id;
        record.job.progress = progress;

        let cancel_requested = record.cancel_requested.take();

        match (outcome, cancel_requested) {
            (TransferOutcome::Completed, _) => {
                if record.job.transition(JobState::Completed) {
                    self.metrics.job_completed();
                    info!(%job_id, attempt = record.job.attempt, "Job completed");
                }
            }
            (TransferOutcome::Cancelled, reason) | (TransferOutcome::Failed(_), reason @ Some(_)) => {
                let reason = reason.unwrap_or(CancelReason::User);
                if record.job.transition(JobState::Cancelled) {
                    record.job.cancel_reason = Some(reason);
                    self.metrics.job_cancelled();
                    info!(%job_id, %reason, "Job cancelled");
                }
            }
            (TransferOutcome::Failed(failure), None) => {
                let retry_index = record.job.attempt.saturating_sub(1);
                match retry::decide(record.policy.as_ref(), retry_index, failure.kind) {
                    RetryDecision::Retry(delay) => {
                        if record.job.transition(JobState::Retrying) {
                            warn!(
                                %job_id,
                                attempt = record.job.attempt,
                                error = %failure,
                                delay = ?delay,
                                "Job failed, retrying"
                            );
                            record.job.last_error = Some(failure);
                            self.metrics.retry_scheduled();
                            self.schedule_requeue(key, delay);
                        }
                    }
                    RetryDecision::GiveUp => {
                        if record.job.transition(JobState::Failed) {
                            error!(
                                %job_id,
                                attempt = record.job.attempt,
                                error = %failure,
                                "Job failed"
                            );
                            record.job.last_error = Some(failure);
                            self.metrics.job_failed();
                        }
                    }
                }
            }
        }

        if let Some(execution) = record.execution.take() {
            execution.done_tx.send_replace(true);
        }
        drop(table);

        self.wake.notify_one();
    }

    /// Put a `retrying` job back in line once `delay` has passed
    fn schedule_requeue(self: &Arc<Self>, key: JobKey, delay: Duration) {
        let inner = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut table = inner.table.write().await;
            let Some(record) = table.get_mut(key) else {
                return;
            };
            if record.job.state != JobState::Retrying {
                return;
            }
            record.job.last_error = None;
            table.enqueue(key);
            drop(table);

            inner.wake.notify_one();
        });
    }

    /// Forget terminal jobs that finished longer than the retention ago
    async fn prune_expired(&self) {
        let Some(retention) = self.settings.retention else {
            return;
        };
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return;
        };

        let mut table = self.table.write().await;
        let pruned = table.prune_terminal(cutoff);
        if pruned > 0 {
            debug!(pruned, remaining = table.len(), "Pruned finished jobs");
        }
    }
}

/// Drive one execution from provider start to finalization
async fn supervise(
    inner: Arc<Inner>,
    key: JobKey,
    request: TransferRequest,
    backend: Backend,
    cancel: CancellationToken,
) {
    let (outcome, progress) = execute(&inner, key, &request, backend, &cancel).await;
    inner.finish(key, outcome, progress).await;
}

async fn execute(
    inner: &Inner,
    key: JobKey,
    request: &TransferRequest,
    backend: Backend,
    cancel: &CancellationToken,
) -> (TransferOutcome, Progress) {
    let provider = match inner.providers.get(backend) {
        Ok(provider) => provider,
        Err(e) => return (TransferOutcome::Failed(e.to_failure()), Progress::default()),
    };

    let handle = match provider.start(request).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(job_id = %request.job_id, error = %e, "Provider refused to start");
            return (TransferOutcome::Failed(e.to_failure()), Progress::default());
        }
    };

    let mut updates = handle.subscribe();
    let mut last_write = Instant::now();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                provider.cancel(&handle).await;
                break TransferOutcome::Cancelled;
            }
            changed = updates.changed() => {
                let status = provider.poll(&handle);
                if let Some(outcome) = status.terminal {
                    break outcome;
                }
                if changed.is_err() {
                    break TransferOutcome::Failed(Failure::new(
                        FailureCode::Unavailable,
                        "transfer ended without reporting an outcome",
                    ));
                }
                if last_write.elapsed() >= PROGRESS_INTERVAL {
                    inner.record_progress(key, status.progress).await;
                    last_write = Instant::now();
                }
            }
        }
    };

    // Joins the transfer task; no-op when it already finished
    provider.cancel(&handle).await;
    (outcome, provider.poll(&handle).progress)
}
