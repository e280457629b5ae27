use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// What a successful probe learned about the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    pub public_ip: String,
    pub server: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("control server unreachable: {0}")]
    Unreachable(String),

    #[error("control server returned HTTP {0}")]
    Status(u16),

    #[error("tunnel is {0}")]
    TunnelDown(String),

    #[error("malformed control server response: {0}")]
    Malformed(String),

    #[error("probe timed out")]
    Timeout,
}

/// One health check against the tunnel.
///
/// The controller owns timing and state; implementations only answer
/// "is the tunnel carrying traffic right now".
#[async_trait]
pub trait TunnelProbe: Send + Sync {
    async fn probe(&self) -> Result<TunnelInfo, ProbeError>;
}

/// Probe backed by the gluetun HTTP control server
#[derive(Debug, Clone)]
pub struct GluetunProbe {
    client: Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct VpnStatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PublicIpBody {
    #[serde(default)]
    public_ip: String,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl GluetunProbe {
    pub fn new(control_url: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base: control_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProbeError> {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ProbeError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TunnelProbe for GluetunProbe {
    async fn probe(&self) -> Result<TunnelInfo, ProbeError> {
        let status: VpnStatusBody = self.get("/v1/vpn/status").await?;
        if status.status != "running" {
            return Err(ProbeError::TunnelDown(status.status));
        }

        let ip: PublicIpBody = self.get("/v1/publicip/ip").await?;
        if ip.public_ip.trim().is_empty() {
            return Err(ProbeError::TunnelDown("running without a public IP".to_string()));
        }

        Ok(TunnelInfo {
            public_ip: ip.public_ip,
            server: ip
                .hostname
                .filter(|h| !h.is_empty())
                .or(ip.country.filter(|c| !c.is_empty())),
        })
    }
}
