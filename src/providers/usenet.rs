//! Usenet transfers delegated to SABnzbd through its JSON API

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::failure::{Failure, FailureCode, ProviderError};
use super::transfer::{ProgressReporter, TransferHandle, TransferOutcome, TransferRequest, spawn_transfer};
use super::{Backend, prepare_directory, require_scheme};

const MISSING_POLL_LIMIT: u32 = 30;
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct UsenetSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub category: Option<String>,
    pub poll_interval: Duration,
    pub cancel_grace: Duration,
}

/// SABnzbd-backed provider.
///
/// SABnzbd places finished jobs according to its category configuration;
/// the job destination is created up front but the final location is the
/// one SABnzbd reports in its history.
#[derive(Debug, Clone)]
pub struct UsenetProvider {
    api: SabApi,
    settings: UsenetSettings,
}

impl UsenetProvider {
    pub fn new(settings: UsenetSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        let api = SabApi {
            client,
            endpoint: format!("{}/api", settings.url.trim_end_matches('/')),
            api_key: settings.api_key.clone().unwrap_or_default(),
            category: settings.category.clone(),
        };

        Ok(Self { api, settings })
    }

    pub async fn start(&self, request: &TransferRequest) -> Result<TransferHandle, ProviderError> {
        require_scheme(Backend::Usenet, &request.url, &["http", "https"])?;
        prepare_directory(&request.destination).await?;

        let api = self.api.clone();
        let source = request.url.clone();
        let name = request.tag();
        let poll_interval = self.settings.poll_interval;
        let job_id = request.job_id;

        Ok(spawn_transfer(job_id, self.settings.cancel_grace, move |reporter, cancel| async move {
            let mut nzo_id = None;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run(&api, &source, &name, poll_interval, &reporter, &mut nzo_id) => Some(result),
            };

            match result {
                Some(Ok(())) => {
                    info!(%job_id, nzo_id = ?nzo_id, "NZB completed");
                    TransferOutcome::Completed
                }
                Some(Err(failure)) => {
                    warn!(%job_id, nzo_id = ?nzo_id, error = %failure, "NZB failed");
                    api.discard(nzo_id.as_deref(), &name).await;
                    TransferOutcome::Failed(failure)
                }
                None => {
                    debug!(%job_id, nzo_id = ?nzo_id, "NZB cancelled");
                    api.discard(nzo_id.as_deref(), &name).await;
                    TransferOutcome::Cancelled
                }
            }
        }))
    }
}

async fn run(
    api: &SabApi,
    source: &str,
    name: &str,
    poll_interval: Duration,
    reporter: &ProgressReporter,
    nzo_id: &mut Option<String>,
) -> Result<(), Failure> {
    let id = api.add(source, name).await?;
    let id = nzo_id.insert(id).clone();

    let mut interval = tokio::time::interval(poll_interval);
    let mut missing = 0u32;

    loop {
        interval.tick().await;

        if let Some(slot) = api.queue_slot(&id).await? {
            missing = 0;
            let (downloaded, total) = slot.progress();
            reporter.update(downloaded, total);
            continue;
        }

        match api.history_slot(&id).await? {
            Some(slot) => match slot.status.as_str() {
                "Completed" => {
                    if slot.bytes > 0 {
                        reporter.update(slot.bytes, Some(slot.bytes));
                    }
                    debug!(nzo_id = %id, storage = %slot.storage, "SABnzbd finished job");
                    return Ok(());
                }
                "Failed" => {
                    return Err(Failure::new(FailureCode::Rejected, slot.fail_message));
                }
                // Verifying, Repairing, Extracting and friends
                _ => missing = 0,
            },
            None => {
                missing += 1;
                if missing >= MISSING_POLL_LIMIT {
                    return Err(Failure::new(
                        FailureCode::Unavailable,
                        format!("job {id} disappeared from SABnzbd"),
                    ));
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    nzo_ids: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    queue: QueueBody,
}

#[derive(Debug, Deserialize)]
struct QueueBody {
    #[serde(default)]
    slots: Vec<QueueSlot>,
}

#[derive(Debug, Deserialize)]
struct QueueSlot {
    nzo_id: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    mb: String,
    #[serde(default)]
    mbleft: String,
}

impl QueueSlot {
    /// Bytes downloaded and total, from SABnzbd's stringly megabyte counters
    fn progress(&self) -> (u64, Option<u64>) {
        let total = self.mb.trim().parse::<f64>().ok().filter(|mb| *mb > 0.0);
        let left = self.mbleft.trim().parse::<f64>().unwrap_or(0.0);

        match total {
            Some(mb) => {
                let done = (mb - left).max(0.0);
                ((done * MIB) as u64, Some((mb * MIB) as u64))
            }
            None => (0, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: HistoryBody,
}

#[derive(Debug, Deserialize)]
struct HistoryBody {
    #[serde(default)]
    slots: Vec<HistorySlot>,
}

#[derive(Debug, Deserialize)]
struct HistorySlot {
    nzo_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_message: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    storage: String,
}

#[derive(Debug, Clone)]
struct SabApi {
    client: Client,
    endpoint: String,
    api_key: String,
    category: Option<String>,
}

impl SabApi {
    async fn call<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, Failure> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(params)
            .query(&[("apikey", self.api_key.as_str()), ("output", "json")])
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::from_status(status));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            Failure::new(FailureCode::ServerError, format!("malformed SABnzbd response: {e}"))
        })?;

        if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
            if error.to_ascii_lowercase().contains("api key") {
                return Err(Failure::new(FailureCode::AuthRejected, error));
            }
        }

        serde_json::from_value(body).map_err(|e| {
            Failure::new(FailureCode::ServerError, format!("unexpected SABnzbd response: {e}"))
        })
    }

    async fn add(&self, source: &str, name: &str) -> Result<String, Failure> {
        let mut params = vec![("mode", "addurl"), ("name", source), ("nzbname", name)];
        if let Some(category) = &self.category {
            params.push(("cat", category.as_str()));
        }

        let response: AddResponse = self.call(&params).await?;
        if !response.status {
            return Err(Failure::new(
                FailureCode::Rejected,
                response.error.unwrap_or_else(|| "SABnzbd refused the NZB".to_string()),
            ));
        }

        response.nzo_ids.into_iter().next().ok_or_else(|| {
            Failure::new(FailureCode::ServerError, "SABnzbd returned no job id")
        })
    }

    async fn queue_slot(&self, nzo_id: &str) -> Result<Option<QueueSlot>, Failure> {
        let response: QueueResponse = self.call(&[("mode", "queue"), ("nzo_ids", nzo_id)]).await?;
        Ok(response.queue.slots.into_iter().find(|s| s.nzo_id == nzo_id))
    }

    async fn history_slot(&self, nzo_id: &str) -> Result<Option<HistorySlot>, Failure> {
        let response: HistoryResponse = self.call(&[("mode", "history"), ("nzo_ids", nzo_id)]).await?;
        Ok(response.history.slots.into_iter().find(|s| s.nzo_id == nzo_id))
    }

    /// Ids of every queue and history entry named `name`
    async fn find_by_name(&self, name: &str) -> Result<Vec<String>, Failure> {
        let queue: QueueResponse = self.call(&[("mode", "queue"), ("search", name)]).await?;
        let history: HistoryResponse = self.call(&[("mode", "history"), ("search", name)]).await?;

        let mut ids: Vec<String> = queue
            .queue
            .slots
            .into_iter()
            .filter(|slot| slot.filename == name)
            .map(|slot| slot.nzo_id)
            .chain(
                history
                    .history
                    .slots
                    .into_iter()
                    .filter(|slot| slot.name == name)
                    .map(|slot| slot.nzo_id),
            )
            .collect();
        ids.dedup();
        Ok(ids)
    }

    /// Remove whatever SABnzbd holds for this transfer.
    ///
    /// Without an id the add may still have been accepted (the response was
    /// lost or the request was cut short), so entries are looked up by name.
    async fn discard(&self, nzo_id: Option<&str>, name: &str) {
        if let Some(id) = nzo_id {
            self.remove(id).await;
            return;
        }

        match self.find_by_name(name).await {
            Ok(ids) => {
                for id in &ids {
                    self.remove(id).await;
                }
                if !ids.is_empty() {
                    debug!(%name, count = ids.len(), "Removed NZB added without a confirmed id");
                }
            }
            Err(failure) => warn!(%name, error = %failure, "Could not look up NZB for removal"),
        }
    }

    /// Drop the job from queue and history, deleting its files. Best effort.
    async fn remove(&self, nzo_id: &str) {
        for mode in ["queue", "history"] {
            let params = [("mode", mode), ("name", "delete"), ("value", nzo_id), ("del_files", "1")];
            if let Err(failure) = self.call::<serde_json::Value>(&params).await {
                warn!(%nzo_id, mode, error = %failure, "SABnzbd removal failed");
            }
        }
    }
}
