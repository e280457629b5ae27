//! BitTorrent transfers delegated to a qBittorrent instance over its Web API

use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::failure::{Failure, FailureCode, ProviderError};
use super::transfer::{ProgressReporter, TransferHandle, TransferOutcome, TransferRequest, spawn_transfer};
use super::{Backend, prepare_directory, require_scheme};

/// Polls after which a torrent that never showed up is considered lost
const MISSING_POLL_LIMIT: u32 = 30;

const COMPLETED_STATES: &[&str] = &[
    "uploading",
    "stalledUP",
    "pausedUP",
    "stoppedUP",
    "queuedUP",
    "forcedUP",
];

const ERROR_STATES: &[&str] = &["error", "missingFiles"];

#[derive(Debug, Clone)]
pub struct BitTorrentSettings {
    pub url: String,
    pub username: String,
    pub password: Option<String>,
    pub poll_interval: Duration,
    pub cancel_grace: Duration,
}

/// qBittorrent-backed provider
#[derive(Debug, Clone)]
pub struct BitTorrentProvider {
    api: QbitApi,
    settings: BitTorrentSettings,
}

impl BitTorrentProvider {
    pub fn new(settings: BitTorrentSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        let api = QbitApi {
            client,
            base: settings.url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        };

        Ok(Self { api, settings })
    }

    pub async fn start(&self, request: &TransferRequest) -> Result<TransferHandle, ProviderError> {
        validate_url(&request.url)?;
        let dir = prepare_directory(&request.destination).await?;

        let api = self.api.clone();
        let source = request.url.clone();
        let tag = request.tag();
        let poll_interval = self.settings.poll_interval;
        let job_id = request.job_id;

        Ok(spawn_transfer(job_id, self.settings.cancel_grace, move |reporter, cancel| async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run(&api, &source, &dir, &tag, poll_interval, &reporter) => Some(result),
            };

            match result {
                Some(Ok(())) => {
                    info!(%job_id, %tag, "Torrent completed");
                    // Stop seeding; the data stays in the destination
                    api.remove(&tag, false).await;
                    TransferOutcome::Completed
                }
                Some(Err(failure)) => {
                    warn!(%job_id, %tag, error = %failure, "Torrent failed");
                    api.remove(&tag, true).await;
                    TransferOutcome::Failed(failure)
                }
                None => {
                    debug!(%job_id, %tag, "Torrent cancelled");
                    api.remove(&tag, true).await;
                    TransferOutcome::Cancelled
                }
            }
        }))
    }
}

fn validate_url(url: &str) -> Result<(), ProviderError> {
    let parsed = require_scheme(Backend::BitTorrent, url, &["magnet", "http", "https"])?;
    if parsed.scheme() != "magnet" && !parsed.path().to_ascii_lowercase().ends_with(".torrent") {
        return Err(ProviderError::UnsupportedUrl {
            backend: Backend::BitTorrent,
            url: url.to_string(),
        });
    }
    Ok(())
}

async fn run(
    api: &QbitApi,
    source: &str,
    dir: &Path,
    tag: &str,
    poll_interval: Duration,
    reporter: &ProgressReporter,
) -> Result<(), Failure> {
    api.login().await?;
    api.add(source, dir, tag).await?;

    let mut interval = tokio::time::interval(poll_interval);
    let mut missing = 0u32;
    let mut relogged = false;

    loop {
        interval.tick().await;

        let torrents = match api.info(tag).await {
            Err(failure) if failure.code == FailureCode::AuthRejected && !relogged => {
                // Session cookie expired
                api.login().await?;
                relogged = true;
                continue;
            }
            other => other?,
        };
        relogged = false;

        let Some(torrent) = torrents.into_iter().next() else {
            missing += 1;
            if missing >= MISSING_POLL_LIMIT {
                return Err(Failure::new(
                    FailureCode::Unavailable,
                    format!("torrent {tag} disappeared from qBittorrent"),
                ));
            }
            continue;
        };
        missing = 0;

        let total = (torrent.size > 0).then_some(torrent.size as u64);
        reporter.update(torrent.completed.max(0) as u64, total);

        match classify(&torrent) {
            TorrentPhase::Running => {}
            TorrentPhase::Completed => return Ok(()),
            TorrentPhase::Errored => {
                return Err(Failure::new(
                    FailureCode::Unavailable,
                    format!("torrent {} is in state {}", torrent.hash, torrent.state),
                ));
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum TorrentPhase {
    Running,
    Completed,
    Errored,
}

fn classify(torrent: &TorrentInfo) -> TorrentPhase {
    let state = torrent.state.as_str();
    if ERROR_STATES.contains(&state) {
        TorrentPhase::Errored
    } else if state.starts_with("checking") {
        // Rechecking can still find missing pieces
        TorrentPhase::Running
    } else if COMPLETED_STATES.contains(&state) || torrent.progress >= 1.0 {
        TorrentPhase::Completed
    } else {
        TorrentPhase::Running
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentInfo {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    completed: i64,
}

/// Thin client for the qBittorrent Web API v2
#[derive(Debug, Clone)]
struct QbitApi {
    client: Client,
    base: String,
    username: String,
    password: Option<String>,
}

impl QbitApi {
    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base, path)
    }

    async fn login(&self) -> Result<(), Failure> {
        let Some(password) = &self.password else {
            // Instances with localhost auth bypass need no session
            return Ok(());
        };

        let response = self
            .client
            .post(self.endpoint("auth/login"))
            .form(&[("username", self.username.as_str()), ("password", password.as_str())])
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::from_status(status));
        }

        let body = response.text().await.map_err(|e| Failure::from_reqwest(&e))?;
        if body.trim() != "Ok." {
            return Err(Failure::new(
                FailureCode::AuthRejected,
                "qBittorrent rejected the credentials",
            ));
        }
        Ok(())
    }

    async fn add(&self, source: &str, dir: &Path, tag: &str) -> Result<(), Failure> {
        let savepath = dir.to_string_lossy();
        let response = self
            .client
            .post(self.endpoint("torrents/add"))
            .form(&[("urls", source), ("savepath", savepath.as_ref()), ("tags", tag)])
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::from_status(status));
        }

        let body = response.text().await.map_err(|e| Failure::from_reqwest(&e))?;
        if body.trim() == "Fails." {
            return Err(Failure::new(
                FailureCode::Rejected,
                "qBittorrent refused to add the torrent",
            ));
        }
        Ok(())
    }

    async fn info(&self, tag: &str) -> Result<Vec<TorrentInfo>, Failure> {
        let response = self
            .client
            .get(self.endpoint("torrents/info"))
            .query(&[("tag", tag)])
            .send()
            .await
            .map_err(|e| Failure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::from_status(status));
        }

        response.json().await.map_err(|e| {
            Failure::new(FailureCode::ServerError, format!("malformed torrent list: {e}"))
        })
    }

    /// Delete every torrent carrying `tag`, and its data when `delete_files`
    /// is set. Best effort.
    async fn remove(&self, tag: &str, delete_files: bool) {
        let hashes = match self.info(tag).await {
            Ok(torrents) => torrents
                .into_iter()
                .map(|t| t.hash)
                .filter(|h| !h.is_empty())
                .collect::<Vec<_>>(),
            Err(failure) => {
                warn!(%tag, error = %failure, "Could not look up torrent for removal");
                return;
            }
        };

        if hashes.is_empty() {
            return;
        }

        let result = self
            .client
            .post(self.endpoint("torrents/delete"))
            .form(&[
                ("hashes", hashes.join("|").as_str()),
                ("deleteFiles", if delete_files { "true" } else { "false" }),
            ])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(%tag, count = hashes.len(), delete_files, "Removed torrent");
            }
            Ok(response) => warn!(%tag, status = %response.status(), "Torrent removal rejected"),
            Err(e) => warn!(%tag, error = %e, "Torrent removal failed"),
        }
    }
}
