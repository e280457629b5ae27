use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use super::failure::Failure;

/// Parameters a provider needs to begin one transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: Uuid,
    pub url: String,
    pub destination: PathBuf,
}

impl TransferRequest {
    /// Tag used to find this transfer again in external clients
    pub fn tag(&self) -> String {
        format!("mediadl-{}", self.job_id)
    }
}

/// Byte progress of a transfer; `bytes_total` stays `None` until known
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_total {
            Some(0) | None => None,
            Some(total) => Some((self.bytes_downloaded as f64 / total as f64).min(1.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Failed(Failure),
    Cancelled,
}

/// What `Provider::poll` reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatus {
    pub progress: Progress,
    pub terminal: Option<TransferOutcome>,
}

/// Write side of a transfer's status, owned by the transfer task
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<TransferStatus>>,
}

impl ProgressReporter {
    pub fn update(&self, bytes_downloaded: u64, bytes_total: Option<u64>) {
        self.tx.send_if_modified(|status| {
            let next = Progress {
                bytes_downloaded,
                bytes_total,
            };
            if status.progress == next {
                return false;
            }
            status.progress = next;
            true
        });
    }
}

/// Handle to one in-flight transfer.
///
/// Cloning shares the same underlying task; `shutdown` is idempotent.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    job_id: Uuid,
    status: watch::Receiver<TransferStatus>,
    cancel: CancellationToken,
    grace: Duration,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TransferHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn status(&self) -> TransferStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every progress or terminal update
    pub fn subscribe(&self) -> watch::Receiver<TransferStatus> {
        self.status.clone()
    }

    /// Signal cancellation and wait for the transfer task to finish its teardown.
    ///
    /// A task that ignores the signal for longer than the grace period is
    /// aborted. Once this returns no further updates are published.
    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();

        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };

        if tokio::time::timeout(self.grace, &mut task).await.is_err() {
            warn!(job_id = %self.job_id, grace = ?self.grace, "Transfer ignored cancellation, aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

/// Spawn a transfer body on its own task and return the handle to it.
///
/// The body receives the reporter for progress and a token it must observe
/// for cancellation; its return value becomes the terminal status.
pub(crate) fn spawn_transfer<F, Fut>(job_id: Uuid, grace: Duration, body: F) -> TransferHandle
where
    F: FnOnce(ProgressReporter, CancellationToken) -> Fut,
    Fut: Future<Output = TransferOutcome> + Send + 'static,
{
    let (tx, rx) = watch::channel(TransferStatus::default());
    let tx = Arc::new(tx);
    let cancel = CancellationToken::new();

    let reporter = ProgressReporter { tx: tx.clone() };
    let transfer = body(reporter, cancel.clone());

    let task = tokio::spawn(async move {
        let outcome = transfer.await;
        tx.send_modify(|status| status.terminal = Some(outcome));
    });

    TransferHandle {
        job_id,
        status: rx,
        cancel,
        grace,
        task: Arc::new(Mutex::new(Some(task))),
    }
}
