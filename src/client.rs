//! HTTP client for a running daemon, used by the CLI subcommands.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::api::models::{
    CancelResponse, ErrorResponse, HealthResponse, JobAcceptedResponse, VpnStatusResponse,
};
use crate::providers::ProviderInfo;
use crate::scheduler::{Job, SubmitRequest};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid daemon address {0}")]
    InvalidAddress(String),

    #[error("daemon request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("daemon answered {status}: {message} ({code})")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base: Url,
}

impl DaemonClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let base = Url::parse(server).map_err(|_| ClientError::InvalidAddress(server.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidAddress(server.to_string()));
        }

        // Cancels wait for provider teardown, so leave room for the grace period
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { http, base })
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<JobAcceptedResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint("api/v1/jobs")?)
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn list(&self) -> Result<Vec<Job>, ClientError> {
        self.call(Method::GET, "api/v1/jobs").await
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, ClientError> {
        self.call(Method::GET, &format!("api/v1/jobs/{id}")).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<CancelResponse, ClientError> {
        self.call(Method::DELETE, &format!("api/v1/jobs/{id}")).await
    }

    pub async fn providers(&self) -> Result<Vec<ProviderInfo>, ClientError> {
        self.call(Method::GET, "api/v1/providers").await
    }

    pub async fn vpn_status(&self) -> Result<VpnStatusResponse, ClientError> {
        self.call(Method::GET, "api/v1/vpn/status").await
    }

    pub async fn vpn_reconnect(&self) -> Result<VpnStatusResponse, ClientError> {
        self.call(Method::POST, "api/v1/vpn/reconnect").await
    }

    /// Health is reported even when the daemon answers 503
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.http.get(self.endpoint("healthz")?).send().await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Ok(response.json().await?);
        }
        decode(response).await
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, ClientError> {
        let response = self.http.request(method, self.endpoint(path)?).send().await?;
        decode(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|_| ClientError::InvalidAddress(format!("{}{path}", self.base)))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(error) => ClientError::Api {
            status,
            code: error.code,
            message: error.message,
        },
        Err(_) => ClientError::Api {
            status,
            code: "UNKNOWN".to_string(),
            message: body,
        },
    })
}
