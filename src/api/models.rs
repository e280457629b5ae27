//! Request and response bodies of the daemon API.
//!
//! Jobs are served as [`Job`](crate::scheduler::Job) snapshots and
//! submissions use [`SubmitRequest`](crate::scheduler::SubmitRequest)
//! directly:
//!
//! ```json
//! {
//!   "url": "magnet:?xt=urn:btih:...",
//!   "backend": "bittorrent",
//!   "destination": "/data/tv",
//!   "priority": 10,
//!   "retry": { "max_retries": 5, "base_delay": "10s", "max_delay": "10m" }
//! }
//! ```
//!
//! Only `url` is required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observability::MetricsSnapshot;
use crate::scheduler::{Job, JobState};
use crate::vpn::VpnState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobAcceptedResponse {
    pub job_id: Uuid,
    pub state: JobState,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CancelResponse {
    /// False when the job had already finished and nothing changed
    pub cancelled: bool,
    pub job: Job,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VpnStatusResponse {
    pub enabled: bool,
    pub provider: String,
    pub state: VpnState,
    pub public_ip: Option<String>,
    pub server: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub vpn: VpnState,
    pub metrics: MetricsSnapshot,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VersionResponse {
    pub version: String,
}
