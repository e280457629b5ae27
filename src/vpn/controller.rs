use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::probe::{GluetunProbe, ProbeError, TunnelInfo, TunnelProbe};
use super::state::{VpnState, VpnStatus, next_state};
use crate::config::VpnConfig;

/// Pause between probes while waiting for the tunnel to come up
const CONNECT_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum VpnError {
    #[error("VPN tunnel unavailable: {0}")]
    TunnelUnavailable(String),

    #[error("cannot {operation} while VPN is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: VpnState,
    },

    #[error("failed to build probe: {0}")]
    Probe(#[from] ProbeError),
}

/// Timing knobs of the controller
#[derive(Debug, Clone, Copy)]
pub struct VpnSettings {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub killswitch_threshold: u32,
}

impl From<&VpnConfig> for VpnSettings {
    fn from(config: &VpnConfig) -> Self {
        Self {
            probe_interval: config.probe_interval.as_duration(),
            probe_timeout: config.probe_timeout.as_duration(),
            connect_timeout: config.connect_timeout.as_duration(),
            killswitch_threshold: config.killswitch_threshold,
        }
    }
}

struct Monitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    probe: Arc<dyn TunnelProbe>,
    settings: VpnSettings,
    status: watch::Sender<VpnStatus>,
    /// Serializes start, stop and reconnect
    lifecycle: Mutex<Option<Monitor>>,
}

/// Owner of the tunnel state.
///
/// Lifecycle calls and the background health monitor are the only writers
/// of [`VpnStatus`]; everyone else observes it through [`VpnController::subscribe`].
#[derive(Clone)]
pub struct VpnController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VpnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnController")
            .field("settings", &self.inner.settings)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl VpnController {
    pub fn new(probe: Arc<dyn TunnelProbe>, settings: VpnSettings) -> Self {
        let (status, _) = watch::channel(VpnStatus::default());
        Self {
            inner: Arc::new(Inner {
                probe,
                settings,
                status,
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// Controller probing the gluetun control server named in the config
    pub fn from_config(config: &VpnConfig) -> Result<Self, VpnError> {
        let settings = VpnSettings::from(config);
        let probe = GluetunProbe::new(&config.control_url, settings.probe_timeout)?;
        Ok(Self::new(Arc::new(probe), settings))
    }

    pub fn status(&self) -> VpnStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> VpnState {
        self.inner.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<VpnStatus> {
        self.inner.status.subscribe()
    }

    /// Bring the tunnel up and start health monitoring.
    ///
    /// Returns once the first probe succeeds, or fails with
    /// [`VpnError::TunnelUnavailable`] after `connect_timeout`, leaving the
    /// state `disconnected`. Calling it on a live tunnel is a no-op.
    pub async fn start(&self) -> Result<(), VpnError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        match self.state() {
            VpnState::Connected | VpnState::Degraded => Ok(()),
            VpnState::Killswitch => Err(VpnError::InvalidTransition {
                operation: "start",
                state: VpnState::Killswitch,
            }),
            VpnState::Disconnected | VpnState::Connecting => self.connect(&mut lifecycle).await,
        }
    }

    /// Operator-triggered recovery from the kill-switch
    pub async fn reconnect(&self) -> Result<(), VpnError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let state = self.state();
        if state != VpnState::Killswitch {
            return Err(VpnError::InvalidTransition {
                operation: "reconnect",
                state,
            });
        }

        stop_monitor(lifecycle.take()).await;
        info!("Reconnecting VPN after kill-switch");
        self.connect(&mut lifecycle).await
    }

    /// Stop monitoring and mark the tunnel down
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        stop_monitor(lifecycle.take()).await;

        let previous = self.state();
        self.inner.status.send_modify(|status| {
            status.state = VpnState::Disconnected;
            status.public_ip = None;
            status.server = None;
            status.consecutive_failures = 0;
        });

        if previous != VpnState::Disconnected {
            info!(from = %previous, "VPN stopped");
        }
    }

    async fn connect(&self, lifecycle: &mut Option<Monitor>) -> Result<(), VpnError> {
        self.inner.status.send_modify(|status| {
            status.state = VpnState::Connecting;
            status.public_ip = None;
            status.server = None;
            status.consecutive_failures = 0;
        });
        info!(timeout = ?self.inner.settings.connect_timeout, "Connecting VPN");

        let deadline = Instant::now() + self.inner.settings.connect_timeout;

        loop {
            let result = self.inner.probe_once().await;
            let now = Utc::now();

            match result {
                Ok(info) => {
                    info!(public_ip = %info.public_ip, server = ?info.server, "VPN connected");
                    self.inner.status.send_modify(|status| {
                        status.state = VpnState::Connected;
                        status.public_ip = Some(info.public_ip);
                        status.server = info.server;
                        status.last_health_check = Some(now);
                        status.consecutive_failures = 0;
                    });
                    *lifecycle = Some(self.spawn_monitor());
                    return Ok(());
                }
                Err(e) if Instant::now() + CONNECT_RETRY >= deadline => {
                    error!(error = %e, "VPN tunnel could not be established");
                    self.inner.status.send_modify(|status| {
                        status.state = VpnState::Disconnected;
                        status.last_health_check = Some(now);
                    });
                    return Err(VpnError::TunnelUnavailable(e.to_string()));
                }
                Err(e) => {
                    debug!(error = %e, "VPN not up yet");
                    self.inner.status.send_modify(|status| status.last_health_check = Some(now));
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
            }
        }
    }

    fn spawn_monitor(&self) -> Monitor {
        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let period = inner.settings.probe_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = inner.probe_once() => result,
                };

                inner.apply_probe(result);
            }

            debug!("VPN health monitor stopped");
        });

        Monitor { cancel, task }
    }
}

impl Inner {
    async fn probe_once(&self) -> Result<TunnelInfo, ProbeError> {
        match tokio::time::timeout(self.settings.probe_timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        }
    }

    fn apply_probe(&self, result: Result<TunnelInfo, ProbeError>) {
        let threshold = self.settings.killswitch_threshold;
        let now = Utc::now();

        self.status.send_modify(|status| {
            status.last_health_check = Some(now);

            let ok = match &result {
                Ok(_) => {
                    status.consecutive_failures = 0;
                    true
                }
                Err(_) => {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    false
                }
            };

            let previous = status.state;
            let next = next_state(previous, ok, status.consecutive_failures, threshold);

            match (&result, next) {
                (Ok(info), VpnState::Connected) => {
                    status.public_ip = Some(info.public_ip.clone());
                    status.server = info.server.clone();
                }
                (_, VpnState::Killswitch) => {
                    status.public_ip = None;
                    status.server = None;
                }
                _ => {}
            }
            status.state = next;

            match (previous, next, &result) {
                (VpnState::Connected, VpnState::Degraded, Err(e)) => {
                    warn!(error = %e, "VPN health probe failed, pausing protected dispatch");
                }
                (VpnState::Degraded, VpnState::Degraded, Err(e)) => {
                    warn!(
                        error = %e,
                        failures = status.consecutive_failures,
                        threshold,
                        "VPN still degraded"
                    );
                }
                (VpnState::Degraded, VpnState::Killswitch, Err(e)) => {
                    error!(
                        error = %e,
                        failures = status.consecutive_failures,
                        "VPN kill-switch engaged"
                    );
                }
                (VpnState::Degraded, VpnState::Connected, _) => info!("VPN recovered"),
                _ => {}
            }
        });
    }
}

async fn stop_monitor(monitor: Option<Monitor>) {
    if let Some(monitor) = monitor {
        monitor.cancel.cancel();
        if let Err(e) = monitor.task.await {
            warn!(error = %e, "VPN health monitor ended abnormally");
        }
    }
}
