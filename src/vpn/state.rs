use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connectivity state of the tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Killswitch,
}

impl VpnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VpnState::Disconnected => "disconnected",
            VpnState::Connecting => "connecting",
            VpnState::Connected => "connected",
            VpnState::Degraded => "degraded",
            VpnState::Killswitch => "killswitch",
        }
    }

    /// New protected work may start only in this state
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, VpnState::Connected)
    }

    /// Protected work must not be running in these states
    pub fn forbids_protected_traffic(&self) -> bool {
        matches!(
            self,
            VpnState::Disconnected | VpnState::Connecting | VpnState::Killswitch
        )
    }
}

impl fmt::Display for VpnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the tunnel published to readers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnStatus {
    pub state: VpnState,
    pub public_ip: Option<String>,
    pub server: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Transition taken by the health monitor after one probe.
///
/// `consecutive_failures` already includes the probe being applied. Only
/// `connected` and `degraded` react to probes; every other state is left to
/// explicit lifecycle calls.
pub fn next_state(
    current: VpnState,
    probe_ok: bool,
    consecutive_failures: u32,
    threshold: u32,
) -> VpnState {
    match (current, probe_ok) {
        (VpnState::Connected, true) => VpnState::Connected,
        (VpnState::Connected, false) => VpnState::Degraded,
        (VpnState::Degraded, true) => VpnState::Connected,
        (VpnState::Degraded, false) if consecutive_failures >= threshold => VpnState::Killswitch,
        (VpnState::Degraded, false) => VpnState::Degraded,
        (other, _) => other,
    }
}
