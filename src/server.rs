use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mediadl::api::{self, AppState};
use mediadl::config::Config;
use mediadl::observability::Metrics;
use mediadl::providers::ProviderSet;
use mediadl::scheduler::{Scheduler, SchedulerSettings};
use mediadl::vpn::VpnController;
use tracing::{error, info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = match config_path {
        Some(path) => {
            let _ = dotenvy::dotenv();
            Config::load_from_path(path)
        }
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {}", e))?;
    let config = Arc::new(config);
    let address = address.unwrap_or(config.server.bind_addr);

    let vpn = VpnController::from_config(&config.vpn)?;
    if config.vpn.required {
        info!(
            provider = %config.vpn.service_provider,
            control_url = %config.vpn.control_url,
            "Bringing up VPN"
        );
        if let Err(e) = vpn.start().await {
            error!(error = %e, "VPN is required but could not be established");
            return Err(e.into());
        }
    } else {
        warn!("VPN not required, every download runs unprotected");
    }

    let providers = ProviderSet::from_config(&config)?;
    for provider in providers.describe() {
        info!(
            backend = %provider.name,
            enabled = provider.enabled,
            protected = provider.protected,
            "Provider configured"
        );
    }

    let metrics = Arc::new(Metrics::new());
    let scheduler = Scheduler::new(
        providers,
        SchedulerSettings::from(&config.downloads),
        vpn.subscribe(),
        metrics.clone(),
    );
    let dispatch = scheduler.spawn();

    let state = AppState::new(config, scheduler.clone(), vpn.clone(), metrics);
    let served = api::run(address, state, shutdown_signal()).await;

    info!("Stopping downloads");
    scheduler.shutdown().await;
    if let Err(e) = dispatch.await {
        warn!(error = %e, "Dispatch loop ended abnormally");
    }
    vpn.stop().await;

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
