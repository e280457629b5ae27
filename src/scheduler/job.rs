use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::providers::{Backend, Failure, Progress};

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Retrying => "retrying",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, next),
            (Pending, Queued | Cancelled)
                | (Queued, Running | Cancelled)
                | (Running, Completed | Retrying | Failed | Cancelled)
                | (Retrying, Queued | Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended up `cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    User,
    VpnKillswitch,
    VpnDisconnected,
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::User => "user",
            CancelReason::VpnKillswitch => "vpn-killswitch",
            CancelReason::VpnDisconnected => "vpn-disconnected",
            CancelReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one job as served to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub destination: PathBuf,
    pub backend: Backend,
    pub state: JobState,
    pub progress: Progress,
    /// Executions started so far
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    pub priority: i32,
    /// Runs only while the tunnel is healthy
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(
        url: String,
        destination: PathBuf,
        backend: Backend,
        priority: i32,
        protected: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            url,
            destination,
            backend,
            state: JobState::Pending,
            progress: Progress::default(),
            attempt: 0,
            last_error: None,
            cancel_reason: None,
            priority,
            protected,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub(crate) fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.state,
                to = %next,
                "Rejected job state transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}
