use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::scheduler::SchedulerError;
use crate::vpn::VpnError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("backend disabled: {0}")]
    BackendDisabled(String),
    #[error("VPN unavailable: {0}")]
    VpnUnavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service shutting down")]
    ShuttingDown,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BackendDisabled(_) => StatusCode::FORBIDDEN,
            ApiError::VpnUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BackendDisabled(_) => "BACKEND_DISABLED",
            ApiError::VpnUnavailable(_) => "VPN_UNAVAILABLE",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::ShuttingDown => "SHUTTING_DOWN",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(value: SchedulerError) -> Self {
        match value {
            SchedulerError::InvalidRequest(message) => ApiError::InvalidPayload(message),
            SchedulerError::JobNotFound(id) => ApiError::NotFound(format!("job {id}")),
            SchedulerError::BackendDisabled(backend) => ApiError::BackendDisabled(backend.to_string()),
            err @ SchedulerError::VpnUnavailable(_) => ApiError::VpnUnavailable(err.to_string()),
            SchedulerError::ShuttingDown => ApiError::ShuttingDown,
        }
    }
}

impl From<VpnError> for ApiError {
    fn from(value: VpnError) -> Self {
        match value {
            err @ VpnError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            err @ VpnError::TunnelUnavailable(_) => ApiError::VpnUnavailable(err.to_string()),
            err @ VpnError::Probe(_) => ApiError::Internal(err.to_string()),
        }
    }
}
