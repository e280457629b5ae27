//! VPN tunnel supervision.
//!
//! [`VpnController`] owns the tunnel lifecycle and runs an independent health
//! monitor that probes the tunnel on a fixed interval. One failed probe moves a
//! `connected` tunnel to `degraded`, which pauses protected dispatch;
//! `killswitch_threshold` consecutive failures engage the kill-switch, which
//! only an explicit [`VpnController::reconnect`] releases.
//!
//! The state is published on a `watch` channel so the scheduler can react to
//! transitions without calling into the controller.

mod controller;
mod probe;
mod state;

pub use controller::{VpnController, VpnError, VpnSettings};
pub use probe::{GluetunProbe, ProbeError, TunnelInfo, TunnelProbe};
pub use state::{VpnState, VpnStatus, next_state};
