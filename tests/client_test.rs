mod common;

use tempfile::TempDir;

use common::{FileServer, Harness, PAYLOAD, eventually, test_config};
use mediadl::api::{AppState, router};
use mediadl::client::{ClientError, DaemonClient};
use mediadl::scheduler::{JobState, SubmitRequest};
use mediadl::vpn::VpnState;

/// Serves the API on an ephemeral port and returns a client pointed at it
async fn start_daemon(harness: &Harness) -> DaemonClient {
    let state = AppState::new(
        harness.config.clone(),
        harness.scheduler.clone(),
        harness.vpn.clone(),
        harness.metrics.clone(),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    DaemonClient::new(&format!("http://{addr}")).unwrap()
}

#[tokio::test]
async fn test_client_round_trip() {
    let dir = TempDir::new().unwrap();
    let files = FileServer::start().await;
    let harness = Harness::new(test_config(dir.path()));
    let client = start_daemon(&harness).await;

    let accepted = client
        .submit(&SubmitRequest::builder().url(files.url("files/client.bin")).build())
        .await
        .unwrap();
    assert_eq!(accepted.state, JobState::Pending);

    eventually("completion", || async {
        client.get(accepted.job_id).await.unwrap().state == JobState::Completed
    })
    .await;

    let job = client.get(accepted.job_id).await.unwrap();
    assert_eq!(job.progress.bytes_downloaded, PAYLOAD.len() as u64);

    let jobs = client.list().await.unwrap();
    assert_eq!(jobs.len(), 1);

    let cancel = client.cancel(accepted.job_id).await.unwrap();
    assert!(!cancel.cancelled);
    assert_eq!(cancel.job.state, JobState::Completed);

    assert_eq!(client.providers().await.unwrap().len(), 3);

    let health = client.health().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.metrics.jobs_completed, 1);
}

#[tokio::test]
async fn test_client_surfaces_api_errors() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(test_config(dir.path()));
    let client = start_daemon(&harness).await;

    let missing = client.get(uuid::Uuid::now_v7()).await;
    assert!(matches!(
        missing,
        Err(ClientError::Api { status, ref code, .. })
            if status == reqwest::StatusCode::NOT_FOUND && code == "NOT_FOUND"
    ));

    let invalid = client
        .submit(&SubmitRequest::builder().url("ftp://example.invalid/a").build())
        .await;
    assert!(matches!(invalid, Err(ClientError::Api { ref code, .. }) if code == "INVALID_REQUEST"));

    let reconnect = client.vpn_reconnect().await;
    assert!(matches!(reconnect, Err(ClientError::Api { ref code, .. }) if code == "CONFLICT"));

    let status = client.vpn_status().await.unwrap();
    assert!(!status.enabled);
    assert_eq!(status.state, VpnState::Disconnected);
}

#[tokio::test]
async fn test_client_reports_unreachable_daemon() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = DaemonClient::new(&format!("http://{addr}")).unwrap();
    assert!(matches!(client.list().await, Err(ClientError::Transport(_))));
}
