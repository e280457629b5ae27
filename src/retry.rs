//! Retry decisions for failed transfers.
//!
//! The policy is a pure function of the retry index and the failure
//! classification; the scheduler owns the timers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::humanize::HumanDuration;

/// Coarse failure classification used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout, connection reset, 5xx, backend temporarily unavailable.
    Transient,
    /// Invalid URL, auth rejected, disk full, destination conflict.
    Permanent,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the job once the delay has elapsed.
    Retry(Duration),
    /// Stop and mark the job failed.
    GiveUp,
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay: HumanDuration,
    /// Upper bound on backoff delay.
    #[serde(default = "default_max_delay")]
    pub max_delay: HumanDuration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_max_delay() -> HumanDuration {
    HumanDuration::from_secs(300)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: base_delay.into(),
            max_delay: max_delay.into(),
        }
    }

    /// Decide what to do after a failure.
    ///
    /// `retry_index` is zero-based: 0 means no retry has been scheduled yet.
    /// Permanent failures always give up.
    pub fn decide(&self, retry_index: u32, kind: FailureKind) -> RetryDecision {
        match kind {
            FailureKind::Permanent => RetryDecision::GiveUp,
            FailureKind::Transient if retry_index >= self.max_retries => RetryDecision::GiveUp,
            FailureKind::Transient => RetryDecision::Retry(self.backoff(retry_index)),
        }
    }

    /// `base_delay * 2^retry_index`, capped at `max_delay`.
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_index.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .as_duration()
            .saturating_mul(factor)
            .min(self.max_delay.as_duration())
    }
}

/// Decision when no policy is configured at all: give up on first failure.
pub fn decide(policy: Option<&RetryPolicy>, retry_index: u32, kind: FailureKind) -> RetryDecision {
    match policy {
        Some(policy) => policy.decide(retry_index, kind),
        None => RetryDecision::GiveUp,
    }
}
