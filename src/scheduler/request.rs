use bon::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::SchedulerError;
use crate::config::validate_retry;
use crate::providers::Backend;
use crate::retry::RetryPolicy;

/// A download submission
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct SubmitRequest {
    #[builder(into)]
    pub url: String,
    /// Inferred from the URL when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<Backend>,
    /// Directory the download lands in; the configured default when absent
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[builder(default)]
    #[serde(default)]
    pub priority: i32,
    /// Overrides the backend's retry policy for this job only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// Submission after validation, ready to become a job
#[derive(Debug, Clone)]
pub(crate) struct ValidatedRequest {
    pub url: String,
    pub backend: Backend,
    pub destination: PathBuf,
    pub priority: i32,
    pub retry: Option<RetryPolicy>,
}

impl SubmitRequest {
    pub(crate) fn validate(self, default_destination: &Path) -> Result<ValidatedRequest, SchedulerError> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(invalid("url is required"));
        }

        let parsed = url::Url::parse(&url).map_err(|e| invalid(format!("malformed url: {e}")))?;
        let backend = self.backend.unwrap_or_else(|| Backend::infer(&url));

        if !accepts_scheme(backend, parsed.scheme()) {
            return Err(invalid(format!(
                "{} urls cannot be downloaded with the {backend} backend",
                parsed.scheme()
            )));
        }
        if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_none_or(str::is_empty) {
            return Err(invalid("url has no host"));
        }

        let destination = match self.destination {
            Some(dest) if dest.as_os_str().is_empty() => {
                return Err(invalid("destination must not be empty"));
            }
            Some(dest) => dest,
            None => default_destination.to_path_buf(),
        };

        validate_retry(backend.as_str(), self.retry.as_ref())
            .map_err(|e| invalid(e.to_string()))?;

        Ok(ValidatedRequest {
            url,
            backend,
            destination,
            priority: self.priority,
            retry: self.retry,
        })
    }
}

fn accepts_scheme(backend: Backend, scheme: &str) -> bool {
    match backend {
        Backend::Http | Backend::Usenet => matches!(scheme, "http" | "https"),
        Backend::BitTorrent => matches!(scheme, "magnet" | "http" | "https"),
    }
}

fn invalid(message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvalidRequest(message.into())
}
