use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use tracing::info;

use super::{
    models::{
        CancelResponse, HealthResponse, JobAcceptedResponse, VersionResponse, VpnStatusResponse,
    },
    state::AppState,
    utils::{parse_content_type, parse_job_id, validate_body_size},
};
use crate::api::error::ApiError;
use crate::scheduler::{Cancellation, JobState, SubmitRequest};
use crate::vpn::VpnState;

const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Job submission endpoint (POST /api/v1/jobs)
///
/// ## Flow:
/// 1. Require `Content-Type: application/json`
/// 2. Read the body (gzip is undone by the decompression layer) and enforce
///    the size limit
/// 3. Deserialize into a [`SubmitRequest`]
/// 4. Hand it to the scheduler, which validates the URL against the backend,
///    checks the backend is enabled and, for protected backends, that the
///    VPN has been started
/// 5. Return 202 Accepted with the job id; the job starts `pending`
///
/// A protected job submitted while the tunnel is `degraded` or in
/// `killswitch` is accepted and waits for the gate to reopen.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;

    let data = read_body(body).await?;
    let request: SubmitRequest = serde_json::from_slice(&data)?;

    let job_id = state.scheduler.submit(request).await?;
    info!(%job_id, "Job accepted");

    let response = JobAcceptedResponse {
        job_id,
        state: JobState::Pending,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn read_body(body: axum::body::Body) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    validate_body_size(&data, MAX_PAYLOAD_SIZE)?;

    Ok(data)
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.list().await)
}

/// Job status endpoint (GET /api/v1/jobs/{job_id})
///
/// Returns the job snapshot: state, progress, attempt count and, when
/// relevant, the last failure or the cancel reason.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.scheduler.get(job_id).await?;

    Ok((StatusCode::OK, Json(job)))
}

/// Cancel endpoint (DELETE /api/v1/jobs/{job_id})
///
/// Blocks until a running job's provider has torn the transfer down, then
/// returns the final snapshot. Cancelling a finished job is not an error:
/// the snapshot comes back unchanged with `cancelled: false`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = parse_job_id(&job_id)?;

    let response = match state.scheduler.cancel(job_id).await? {
        Cancellation::Cancelled(job) => CancelResponse {
            cancelled: true,
            job,
        },
        Cancellation::AlreadyTerminal(job) => CancelResponse {
            cancelled: false,
            job,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}

/// GET /api/v1/providers
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.providers().describe())
}

/// GET /api/v1/vpn/status
pub async fn vpn_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(vpn_response(&state))
}

/// Operator recovery from the kill-switch (POST /api/v1/vpn/reconnect)
///
/// Only valid while the tunnel is in `killswitch`; any other state answers
/// 409. Returns once the tunnel is back up, or 503 if it could not be
/// re-established within the connect timeout.
pub async fn vpn_reconnect(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if !state.config.vpn.required {
        return Err(ApiError::Conflict("VPN is not enabled".into()));
    }

    info!("Operator requested VPN reconnect");
    state.vpn.reconnect().await?;

    Ok((StatusCode::OK, Json(vpn_response(&state))))
}

fn vpn_response(state: &AppState) -> VpnStatusResponse {
    let status = state.vpn.status();
    VpnStatusResponse {
        enabled: state.config.vpn.required,
        provider: state.config.vpn.service_provider.clone(),
        state: status.state,
        public_ip: status.public_ip,
        server: status.server,
        last_health_check: status.last_health_check,
        consecutive_failures: status.consecutive_failures,
    }
}

/// Health check endpoint (GET /healthz)
///
/// Reports `ok` unless the daemon requires a VPN and the tunnel is not
/// `connected`. A tunnel in `killswitch` or `disconnected` answers 503, a
/// `degraded` or `connecting` one answers 200 with status `degraded`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let vpn = state.vpn.state();

    let (status_code, status) = if !state.config.vpn.required {
        (StatusCode::OK, "ok")
    } else {
        match vpn {
            VpnState::Connected => (StatusCode::OK, "ok"),
            VpnState::Degraded | VpnState::Connecting => (StatusCode::OK, "degraded"),
            VpnState::Killswitch | VpnState::Disconnected => {
                (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
            }
        }
    };

    let response = HealthResponse {
        status: status.to_string(),
        vpn,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

/// GET /version
pub async fn version() -> impl IntoResponse {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
