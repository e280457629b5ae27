mod common;

use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use common::{MockQbittorrent, MockSabnzbd, QBIT_PASSWORD, SAB_API_KEY};
use mediadl::providers::{
    BitTorrentProvider, BitTorrentSettings, FailureCode, Provider, TransferHandle, TransferOutcome,
    TransferRequest, UsenetProvider, UsenetSettings,
};
use mediadl::retry::FailureKind;

fn usenet(sab: &MockSabnzbd, api_key: &str) -> Provider {
    Provider::Usenet(
        UsenetProvider::new(UsenetSettings {
            url: sab.url(),
            api_key: Some(api_key.to_string()),
            category: None,
            poll_interval: Duration::from_millis(20),
            cancel_grace: Duration::from_secs(5),
        })
        .unwrap(),
    )
}

fn bittorrent(qbit: &MockQbittorrent, password: &str) -> Provider {
    Provider::BitTorrent(
        BitTorrentProvider::new(BitTorrentSettings {
            url: qbit.url(),
            username: "admin".to_string(),
            password: Some(password.to_string()),
            poll_interval: Duration::from_millis(20),
            cancel_grace: Duration::from_secs(5),
        })
        .unwrap(),
    )
}

fn request(url: &str, dir: &TempDir) -> TransferRequest {
    TransferRequest {
        job_id: Uuid::now_v7(),
        url: url.to_string(),
        destination: dir.path().to_path_buf(),
    }
}

async fn terminal(handle: &TransferHandle) -> TransferOutcome {
    let mut updates = handle.subscribe();
    let status = tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|status| status.terminal.is_some()),
    )
    .await
    .expect("transfer did not finish in time")
    .unwrap()
    .clone();
    status.terminal.unwrap()
}

fn failure(outcome: TransferOutcome) -> mediadl::providers::Failure {
    match outcome {
        TransferOutcome::Failed(failure) => failure,
        other => panic!("expected a failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_usenet_completes_from_history() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::start().await;
    let provider = usenet(&sab, SAB_API_KEY);

    let handle = provider
        .start(&request("https://indexer.example/complete.nzb", &dir))
        .await
        .unwrap();

    assert_eq!(terminal(&handle).await, TransferOutcome::Completed);
    assert_eq!(provider.poll(&handle).progress.bytes_downloaded, 2048);
    assert!(sab.calls().iter().all(|call| !call.starts_with("delete")));
}

#[tokio::test]
async fn test_usenet_failed_job_is_permanent_and_removed() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::start().await;
    let provider = usenet(&sab, SAB_API_KEY);

    let handle = provider
        .start(&request("https://indexer.example/broken.nzb", &dir))
        .await
        .unwrap();

    let failure = failure(terminal(&handle).await);
    assert_eq!(failure.code, FailureCode::Rejected);
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.message, "Out of retention");
    assert!(sab.calls().contains(&"delete:history:SABnzbd_nzo_1".to_string()));
    assert_eq!(sab.entries(), 0);
}

#[tokio::test]
async fn test_usenet_wrong_api_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::start().await;
    let provider = usenet(&sab, "wrong");

    let handle = provider
        .start(&request("https://indexer.example/show.nzb", &dir))
        .await
        .unwrap();

    let failure = failure(terminal(&handle).await);
    assert_eq!(failure.code, FailureCode::AuthRejected);
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert!(sab.calls().is_empty());
}

#[tokio::test]
async fn test_usenet_cancel_deletes_running_job() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::start().await;
    let provider = usenet(&sab, SAB_API_KEY);

    let handle = provider
        .start(&request("https://indexer.example/show.nzb", &dir))
        .await
        .unwrap();

    let mut updates = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|status| status.progress.bytes_downloaded > 0),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(provider.poll(&handle).progress.bytes_total, Some(100 * 1024 * 1024));

    provider.cancel(&handle).await;

    assert_eq!(provider.poll(&handle).terminal, Some(TransferOutcome::Cancelled));
    assert!(sab.calls().contains(&"delete:queue:SABnzbd_nzo_1".to_string()));
    assert_eq!(sab.entries(), 0);
}

#[tokio::test]
async fn test_usenet_cancel_during_add_still_removes_the_nzb() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::with_delays(Duration::from_millis(300), Duration::ZERO).await;
    let provider = usenet(&sab, SAB_API_KEY);

    let handle = provider
        .start(&request("https://indexer.example/x.nzb", &dir))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    provider.cancel(&handle).await;

    assert_eq!(provider.poll(&handle).terminal, Some(TransferOutcome::Cancelled));
    let calls = sab.calls();
    assert_eq!(calls[0], "addurl:https://indexer.example/x.nzb");
    assert!(calls.contains(&"delete:queue:SABnzbd_nzo_1".to_string()), "{calls:?}");
    assert_eq!(sab.entries(), 0);
}

#[tokio::test]
async fn test_usenet_unanswered_add_is_removed_before_retry() {
    let dir = TempDir::new().unwrap();
    let sab = MockSabnzbd::start().await;
    let provider = usenet(&sab, SAB_API_KEY);

    let handle = provider
        .start(&request("https://indexer.example/unstable.nzb", &dir))
        .await
        .unwrap();

    let failure = failure(terminal(&handle).await);
    assert_eq!(failure.kind, FailureKind::Transient);
    assert!(sab.calls().contains(&"delete:queue:SABnzbd_nzo_1".to_string()));
    assert_eq!(sab.entries(), 0);
}

#[tokio::test]
async fn test_torrent_completes_and_stops_seeding() {
    let dir = TempDir::new().unwrap();
    let qbit = MockQbittorrent::start().await;
    let provider = bittorrent(&qbit, QBIT_PASSWORD);

    let handle = provider
        .start(&request("https://tracker.example/complete.torrent", &dir))
        .await
        .unwrap();

    assert_eq!(terminal(&handle).await, TransferOutcome::Completed);
    assert_eq!(provider.poll(&handle).progress.bytes_downloaded, 1000);

    let calls = qbit.calls();
    assert_eq!(calls[0], "add:https://tracker.example/complete.torrent");
    assert!(calls.iter().any(|call| call.starts_with("delete:") && call.ends_with(":false")));
    assert_eq!(qbit.torrents(), 0);
}

#[tokio::test]
async fn test_torrent_error_state_fails_and_deletes_data() {
    let dir = TempDir::new().unwrap();
    let qbit = MockQbittorrent::start().await;
    let provider = bittorrent(&qbit, QBIT_PASSWORD);

    let handle = provider
        .start(&request("https://tracker.example/broken.torrent", &dir))
        .await
        .unwrap();

    let failure = failure(terminal(&handle).await);
    assert_eq!(failure.code, FailureCode::Unavailable);
    assert!(failure.message.contains("error"));
    assert!(qbit.calls().iter().any(|call| call.starts_with("delete:") && call.ends_with(":true")));
    assert_eq!(qbit.torrents(), 0);
}

#[tokio::test]
async fn test_torrent_bad_credentials_are_permanent() {
    let dir = TempDir::new().unwrap();
    let qbit = MockQbittorrent::start().await;
    let provider = bittorrent(&qbit, "nope");

    let handle = provider
        .start(&request("magnet:?xt=urn:btih:0123456789abcdef", &dir))
        .await
        .unwrap();

    let failure = failure(terminal(&handle).await);
    assert_eq!(failure.code, FailureCode::AuthRejected);
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(qbit.torrents(), 0);
}

#[tokio::test]
async fn test_torrent_session_expiry_logs_in_again() {
    let dir = TempDir::new().unwrap();
    let qbit = MockQbittorrent::start().await;
    qbit.expire_session();
    let provider = bittorrent(&qbit, QBIT_PASSWORD);

    let handle = provider
        .start(&request("https://tracker.example/complete.torrent", &dir))
        .await
        .unwrap();

    assert_eq!(terminal(&handle).await, TransferOutcome::Completed);
    assert_eq!(qbit.logins(), 2);
}

#[tokio::test]
async fn test_torrent_cancel_deletes_with_files() {
    let dir = TempDir::new().unwrap();
    let qbit = MockQbittorrent::start().await;
    let provider = bittorrent(&qbit, QBIT_PASSWORD);

    let handle = provider
        .start(&request("magnet:?xt=urn:btih:0123456789abcdef", &dir))
        .await
        .unwrap();

    let mut updates = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|status| status.progress.bytes_downloaded == 500),
    )
    .await
    .unwrap()
    .unwrap();

    provider.cancel(&handle).await;

    assert_eq!(provider.poll(&handle).terminal, Some(TransferOutcome::Cancelled));
    assert!(qbit.calls().iter().any(|call| call.starts_with("delete:") && call.ends_with(":true")));
    assert_eq!(qbit.torrents(), 0);
}
