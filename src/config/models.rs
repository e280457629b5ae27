use crate::humanize::HumanDuration;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8420))
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    /// Maximum number of jobs in `running` at once
    #[serde(default = "default_concurrent_jobs")]
    pub concurrent_jobs: usize,
    /// Destination used when a submission names none
    #[serde(default = "default_destination")]
    pub default_destination: PathBuf,
    /// How often external clients are polled for progress
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    /// How long a cancelled transfer may take to tear down before it is aborted
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: HumanDuration,
    /// How long finished jobs are kept for status queries; zero keeps them forever
    #[serde(default = "default_retention")]
    pub retention: HumanDuration,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            concurrent_jobs: default_concurrent_jobs(),
            default_destination: default_destination(),
            poll_interval: default_poll_interval(),
            cancel_grace: default_cancel_grace(),
            retention: default_retention(),
        }
    }
}

fn default_concurrent_jobs() -> usize {
    3
}

fn default_destination() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(1)
}

fn default_cancel_grace() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_retention() -> HumanDuration {
    HumanDuration::from_secs(24 * 3600)
}

/// VPN tunnel supervision
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VpnConfig {
    /// When false no backend is protected and the tunnel is never started
    #[serde(default = "default_true")]
    pub required: bool,
    /// Informational, reported by the status endpoint
    #[serde(default = "default_service_provider")]
    pub service_provider: String,
    /// Base URL of the tunnel container's control server
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: HumanDuration,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: HumanDuration,
    /// How long `start` keeps probing before giving up
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    /// Consecutive failed probes that trip the kill-switch
    #[serde(default = "default_killswitch_threshold")]
    pub killswitch_threshold: u32,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            required: true,
            service_provider: default_service_provider(),
            control_url: default_control_url(),
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            connect_timeout: default_connect_timeout(),
            killswitch_threshold: default_killswitch_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_service_provider() -> String {
    "mullvad".to_string()
}

fn default_control_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_probe_interval() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_probe_timeout() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

fn default_killswitch_threshold() -> u32 {
    3
}

/// Per-backend configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub http: HttpProviderConfig,
    #[serde(default)]
    pub bittorrent: BitTorrentProviderConfig,
    #[serde(default)]
    pub usenet: UsenetProviderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub require_vpn: bool,
    #[serde(default = "default_retry")]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_http_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_http_read_timeout")]
    pub read_timeout: HumanDuration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_vpn: false,
            retry: default_retry(),
            user_agent: default_user_agent(),
            connect_timeout: default_http_connect_timeout(),
            read_timeout: default_http_read_timeout(),
        }
    }
}

fn default_retry() -> Option<RetryPolicy> {
    Some(RetryPolicy::default())
}

fn default_user_agent() -> String {
    concat!("mediadl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_http_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_http_read_timeout() -> HumanDuration {
    HumanDuration::from_secs(60)
}

/// qBittorrent Web UI connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BitTorrentProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub require_vpn: bool,
    #[serde(default = "default_retry")]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "default_qbittorrent_url")]
    pub url: String,
    #[serde(default = "default_qbittorrent_username")]
    pub username: String,
    /// Loaded from environment, never from the config file
    #[serde(skip)]
    pub password: Option<String>,
}

impl Default for BitTorrentProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_vpn: true,
            retry: default_retry(),
            url: default_qbittorrent_url(),
            username: default_qbittorrent_username(),
            password: None,
        }
    }
}

fn default_qbittorrent_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_qbittorrent_username() -> String {
    "admin".to_string()
}

/// SABnzbd connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsenetProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub require_vpn: bool,
    #[serde(default = "default_retry")]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "default_sabnzbd_url")]
    pub url: String,
    pub category: Option<String>,
    /// Loaded from environment, never from the config file
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for UsenetProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_vpn: true,
            retry: default_retry(),
            url: default_sabnzbd_url(),
            category: None,
            api_key: None,
        }
    }
}

fn default_sabnzbd_url() -> String {
    "http://127.0.0.1:8081".to_string()
}
