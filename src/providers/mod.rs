//! Download backends.
//!
//! The set of backends is closed, so [`Provider`] is an enum dispatched by
//! [`Backend`] tag rather than a trait object. Every variant honours the same
//! contract:
//!
//! - `start` validates the URL scheme and prepares the destination, then runs
//!   the transfer on its own task and returns a [`TransferHandle`]
//! - `poll` reports progress and, once reached, the terminal outcome
//! - `cancel` signals the transfer and waits for its teardown; it is a no-op
//!   on a handle that already finished
//!
//! Transfers release their sockets and partial files on every exit path.

mod bittorrent;
mod failure;
mod http;
mod transfer;
mod usenet;

pub use bittorrent::{BitTorrentProvider, BitTorrentSettings};
pub use failure::{Failure, FailureCode, ProviderError};
pub use http::{HttpProvider, HttpSettings};
pub use transfer::{
    Progress, ProgressReporter, TransferHandle, TransferOutcome, TransferRequest,
    TransferStatus,
};
pub use usenet::{UsenetProvider, UsenetSettings};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Transport family a job is executed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Http,
    BitTorrent,
    Usenet,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Http, Backend::BitTorrent, Backend::Usenet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Http => "http",
            Backend::BitTorrent => "bittorrent",
            Backend::Usenet => "usenet",
        }
    }

    /// Guess the backend from the shape of a URL
    pub fn infer(url: &str) -> Backend {
        let lower = url.trim().to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();

        if lower.starts_with("magnet:") || path.ends_with(".torrent") {
            Backend::BitTorrent
        } else if path.ends_with(".nzb") {
            Backend::Usenet
        } else {
            Backend::Http
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Backend::Http),
            "bittorrent" | "torrent" => Ok(Backend::BitTorrent),
            "usenet" | "nzb" => Ok(Backend::Usenet),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// One backend implementation
#[derive(Debug, Clone)]
pub enum Provider {
    Http(HttpProvider),
    BitTorrent(BitTorrentProvider),
    Usenet(UsenetProvider),
}

impl Provider {
    pub fn backend(&self) -> Backend {
        match self {
            Provider::Http(_) => Backend::Http,
            Provider::BitTorrent(_) => Backend::BitTorrent,
            Provider::Usenet(_) => Backend::Usenet,
        }
    }

    pub async fn start(&self, request: &TransferRequest) -> Result<TransferHandle, ProviderError> {
        match self {
            Provider::Http(provider) => provider.start(request).await,
            Provider::BitTorrent(provider) => provider.start(request).await,
            Provider::Usenet(provider) => provider.start(request).await,
        }
    }

    pub fn poll(&self, handle: &TransferHandle) -> TransferStatus {
        handle.status()
    }

    pub async fn cancel(&self, handle: &TransferHandle) {
        handle.shutdown().await;
    }
}

/// Per-backend entry of the provider set
#[derive(Debug, Clone)]
struct ProviderSlot {
    provider: Provider,
    enabled: bool,
    protected: bool,
    retry: Option<RetryPolicy>,
}

/// Public description of a backend, served by the providers endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: Backend,
    pub enabled: bool,
    pub protected: bool,
}

/// The providers the scheduler dispatches to, keyed by backend
#[derive(Debug, Clone)]
pub struct ProviderSet {
    slots: Vec<ProviderSlot>,
}

impl ProviderSet {
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let grace = config.downloads.cancel_grace.as_duration();
        let poll_interval = config.downloads.poll_interval.as_duration();
        let vpn_required = config.vpn.required;
        let providers = &config.providers;

        let http = HttpProvider::new(HttpSettings {
            connect_timeout: providers.http.connect_timeout.as_duration(),
            read_timeout: providers.http.read_timeout.as_duration(),
            user_agent: providers.http.user_agent.clone(),
            cancel_grace: grace,
        })?;

        let bittorrent = BitTorrentProvider::new(BitTorrentSettings {
            url: providers.bittorrent.url.clone(),
            username: providers.bittorrent.username.clone(),
            password: providers.bittorrent.password.clone(),
            poll_interval,
            cancel_grace: grace,
        })?;

        let usenet = UsenetProvider::new(UsenetSettings {
            url: providers.usenet.url.clone(),
            api_key: providers.usenet.api_key.clone(),
            category: providers.usenet.category.clone(),
            poll_interval,
            cancel_grace: grace,
        })?;

        Ok(Self {
            slots: vec![
                ProviderSlot {
                    provider: Provider::Http(http),
                    enabled: providers.http.enabled,
                    protected: vpn_required && providers.http.require_vpn,
                    retry: providers.http.retry,
                },
                ProviderSlot {
                    provider: Provider::BitTorrent(bittorrent),
                    enabled: providers.bittorrent.enabled,
                    protected: vpn_required && providers.bittorrent.require_vpn,
                    retry: providers.bittorrent.retry,
                },
                ProviderSlot {
                    provider: Provider::Usenet(usenet),
                    enabled: providers.usenet.enabled,
                    protected: vpn_required && providers.usenet.require_vpn,
                    retry: providers.usenet.retry,
                },
            ],
        })
    }

    fn slot(&self, backend: Backend) -> Option<&ProviderSlot> {
        self.slots.iter().find(|slot| slot.provider.backend() == backend)
    }

    /// The provider for `backend`, if it is enabled
    pub fn get(&self, backend: Backend) -> Result<&Provider, ProviderError> {
        self.slot(backend)
            .filter(|slot| slot.enabled)
            .map(|slot| &slot.provider)
            .ok_or(ProviderError::Disabled(backend))
    }

    /// Whether jobs on `backend` may only run behind a healthy tunnel
    pub fn is_protected(&self, backend: Backend) -> bool {
        self.slot(backend).is_some_and(|slot| slot.protected)
    }

    pub fn retry_policy(&self, backend: Backend) -> Option<RetryPolicy> {
        self.slot(backend).and_then(|slot| slot.retry)
    }

    pub fn describe(&self) -> Vec<ProviderInfo> {
        self.slots
            .iter()
            .map(|slot| ProviderInfo {
                name: slot.provider.backend(),
                enabled: slot.enabled,
                protected: slot.protected,
            })
            .collect()
    }
}

/// Reject URLs whose scheme the backend cannot handle
pub(crate) fn require_scheme(
    backend: Backend,
    url: &str,
    schemes: &[&str],
) -> Result<url::Url, ProviderError> {
    let unsupported = || ProviderError::UnsupportedUrl {
        backend,
        url: url.to_string(),
    };

    let parsed = url::Url::parse(url).map_err(|_| unsupported())?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(unsupported());
    }
    Ok(parsed)
}

/// Create the destination directory, returning it
pub(crate) async fn prepare_directory(dir: &Path) -> Result<PathBuf, ProviderError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        ProviderError::ResourceUnavailable(format!("{}: {}", dir.display(), e))
    })?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_inference() {
        assert_eq!(
            Backend::infer("magnet:?xt=urn:btih:abcdef"),
            Backend::BitTorrent
        );
        assert_eq!(
            Backend::infer("https://tracker.example/file.torrent?passkey=1"),
            Backend::BitTorrent
        );
        assert_eq!(Backend::infer("https://indexer.example/get.NZB"), Backend::Usenet);
        assert_eq!(Backend::infer("https://cdn.example/video.mkv"), Backend::Http);
    }

    #[test]
    fn test_backend_parse_and_display() {
        assert_eq!("BitTorrent".parse::<Backend>().unwrap(), Backend::BitTorrent);
        assert_eq!("nzb".parse::<Backend>().unwrap(), Backend::Usenet);
        assert!("ftp".parse::<Backend>().is_err());
        assert_eq!(Backend::Usenet.to_string(), "usenet");
        assert_eq!(
            serde_json::to_string(&Backend::BitTorrent).unwrap(),
            "\"bittorrent\""
        );
    }

    #[test]
    fn test_require_scheme() {
        assert!(require_scheme(Backend::Http, "https://example.com/a", &["http", "https"]).is_ok());
        assert!(matches!(
            require_scheme(Backend::Http, "magnet:?xt=urn:btih:abc", &["http", "https"]),
            Err(ProviderError::UnsupportedUrl { .. })
        ));
        assert!(matches!(
            require_scheme(Backend::Http, "not a url", &["http", "https"]),
            Err(ProviderError::UnsupportedUrl { .. })
        ));
    }

    #[test]
    fn test_provider_set_from_defaults() {
        let config = Config::default();
        let set = ProviderSet::from_config(&config).unwrap();

        assert!(set.get(Backend::Http).is_ok());
        assert!(!set.is_protected(Backend::Http));
        assert!(set.is_protected(Backend::BitTorrent));
        assert!(set.is_protected(Backend::Usenet));
        assert_eq!(set.describe().len(), 3);
    }

    #[test]
    fn test_disabled_backend_and_unrequired_vpn() {
        let mut config = Config::default();
        config.providers.usenet.enabled = false;
        config.vpn.required = false;
        let set = ProviderSet::from_config(&config).unwrap();

        assert!(matches!(
            set.get(Backend::Usenet),
            Err(ProviderError::Disabled(Backend::Usenet))
        ));
        assert!(!set.is_protected(Backend::BitTorrent));
    }
}
