//! Plain HTTP(S) downloads streamed straight into the destination directory

use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::failure::{Failure, FailureCode, ProviderError};
use super::transfer::{ProgressReporter, TransferHandle, TransferOutcome, TransferRequest, spawn_transfer};
use super::{Backend, prepare_directory, require_scheme};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    pub cancel_grace: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            user_agent: concat!("mediadl/", env!("CARGO_PKG_VERSION")).to_string(),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// HTTP downloader
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    settings: HttpSettings,
}

impl HttpProvider {
    pub fn new(settings: HttpSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .user_agent(&settings.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self { client, settings })
    }

    pub async fn start(&self, request: &TransferRequest) -> Result<TransferHandle, ProviderError> {
        let url = require_scheme(Backend::Http, &request.url, &["http", "https"])?;
        let dir = prepare_directory(&request.destination).await?;
        let target = dir.join(file_name_from_url(&url));

        let client = self.client.clone();
        let url = url.to_string();
        let job_id = request.job_id;

        Ok(spawn_transfer(job_id, self.settings.cancel_grace, move |reporter, cancel| async move {
            let partial = partial_path(&target);
            let mut claimed = false;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = download(&client, &url, &target, &partial, &reporter, &mut claimed) => Some(result),
            };

            match result {
                Some(Ok(bytes)) => {
                    info!(%job_id, target = %target.display(), bytes, "Download completed");
                    TransferOutcome::Completed
                }
                Some(Err(failure)) => {
                    warn!(%job_id, %url, error = %failure, "Download failed");
                    if claimed {
                        remove_partial(&partial).await;
                    }
                    TransferOutcome::Failed(failure)
                }
                None => {
                    debug!(%job_id, "Download cancelled");
                    if claimed {
                        remove_partial(&partial).await;
                    }
                    TransferOutcome::Cancelled
                }
            }
        }))
    }
}

/// Stream the body to `partial`, then move it into place. Returns bytes written.
///
/// `partial` is created exclusively; `claimed` is set once this transfer
/// owns it, and only then may the caller delete it.
async fn download(
    client: &Client,
    url: &str,
    target: &Path,
    partial: &Path,
    reporter: &ProgressReporter,
    claimed: &mut bool,
) -> Result<u64, Failure> {
    if fs::try_exists(target).await.unwrap_or(false) {
        return Err(Failure::new(
            FailureCode::DestinationConflict,
            format!("{} already exists", target.display()),
        ));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => Failure::new(
                FailureCode::DestinationConflict,
                format!("{} is being written by another download", partial.display()),
            ),
            _ => Failure::from_io(&e),
        })?;
    *claimed = true;

    debug!(url, "Starting download");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Failure::from_reqwest(&e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Failure::from_status(status));
    }

    let total = response.content_length();
    reporter.update(0, total);

    let mut downloaded = 0u64;
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| Failure::from_reqwest(&e))?;
        file.write_all(&chunk).await.map_err(|e| Failure::from_io(&e))?;
        downloaded += chunk.len() as u64;
        reporter.update(downloaded, total);
    }

    file.flush().await.map_err(|e| Failure::from_io(&e))?;
    file.sync_all().await.map_err(|e| Failure::from_io(&e))?;
    drop(file);

    if let Some(expected) = total {
        if downloaded < expected {
            return Err(Failure::new(
                FailureCode::ConnectionReset,
                format!("body ended after {downloaded} of {expected} bytes"),
            ));
        }
    }

    fs::rename(partial, target)
        .await
        .map_err(|e| Failure::from_io(&e))?;
    reporter.update(downloaded, Some(downloaded));

    Ok(downloaded)
}

fn file_name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|name| *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial file");
        }
    }
}
