use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::Backend;
use crate::retry::FailureKind;

/// Machine-readable reason a transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    Timeout,
    ConnectionReset,
    ServerError,
    Unavailable,
    InvalidUrl,
    AuthRejected,
    NotFound,
    Rejected,
    DiskFull,
    PermissionDenied,
    DestinationConflict,
}

impl FailureCode {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureCode::Timeout
            | FailureCode::ConnectionReset
            | FailureCode::ServerError
            | FailureCode::Unavailable => FailureKind::Transient,
            FailureCode::InvalidUrl
            | FailureCode::AuthRejected
            | FailureCode::NotFound
            | FailureCode::Rejected
            | FailureCode::DiskFull
            | FailureCode::PermissionDenied
            | FailureCode::DestinationConflict => FailureKind::Permanent,
        }
    }
}

/// Classified transfer failure, recorded on the job as `last_error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: code.kind(),
            message: message.into(),
        }
    }

    pub fn from_status(status: reqwest::StatusCode) -> Self {
        let code = match status.as_u16() {
            401 | 403 => FailureCode::AuthRejected,
            404 | 410 => FailureCode::NotFound,
            408 | 429 => FailureCode::Unavailable,
            500..=599 => FailureCode::ServerError,
            _ => FailureCode::Rejected,
        };

        Self::new(
            code,
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ),
        )
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status);
        }

        let code = if err.is_timeout() {
            FailureCode::Timeout
        } else if err.is_connect() {
            FailureCode::Unavailable
        } else if err.is_builder() {
            FailureCode::InvalidUrl
        } else if err.is_redirect() {
            FailureCode::Rejected
        } else {
            FailureCode::ConnectionReset
        };

        Self::new(code, err.to_string())
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::StorageFull => FailureCode::DiskFull,
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => {
                FailureCode::PermissionDenied
            }
            ErrorKind::AlreadyExists => FailureCode::DestinationConflict,
            ErrorKind::TimedOut => FailureCode::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                FailureCode::ConnectionReset
            }
            _ => FailureCode::Unavailable,
        };

        Self::new(code, err.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Errors raised synchronously by `Provider::start`
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported url for {backend} backend: {url}")]
    UnsupportedUrl { backend: Backend, url: String },

    #[error("destination unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("{0} backend is disabled")]
    Disabled(Backend),

    #[error("failed to build client: {0}")]
    Client(String),
}

impl ProviderError {
    pub fn to_failure(&self) -> Failure {
        let code = match self {
            ProviderError::UnsupportedUrl { .. } => FailureCode::InvalidUrl,
            ProviderError::ResourceUnavailable(_) => FailureCode::Unavailable,
            ProviderError::Disabled(_) => FailureCode::Rejected,
            ProviderError::Client(_) => FailureCode::Unavailable,
        };
        Failure::new(code, self.to_string())
    }
}
