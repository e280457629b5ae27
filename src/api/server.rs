use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};
use tracing::info;

use super::{
    services::{
        cancel_job, get_job, health, list_jobs, list_providers, submit_job, version,
        vpn_reconnect, vpn_status,
    },
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/jobs", post(submit_job).get(list_jobs))
        .route("/api/v1/jobs/{job_id}", get(get_job).delete(cancel_job))
        .route("/api/v1/providers", get(list_providers))
        .route("/api/v1/vpn/status", get(vpn_status))
        .route("/api/v1/vpn/reconnect", post(vpn_reconnect))
        .route("/healthz", get(health))
        .route("/version", get(version))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Handles Content-Encoding on submissions transparently
                .layer(RequestDecompressionLayer::new()),
        )
}

/// Serve the API until `shutdown` resolves
pub async fn run<F>(address: SocketAddr, state: AppState, shutdown: F) -> Result<(), AnyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "mediadl API listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
