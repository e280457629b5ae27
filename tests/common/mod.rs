#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mediadl::config::Config;
use mediadl::observability::Metrics;
use mediadl::providers::ProviderSet;
use mediadl::scheduler::{Job, Scheduler, SchedulerSettings};
use mediadl::vpn::{ProbeError, TunnelInfo, TunnelProbe, VpnController, VpnSettings};

pub const PAYLOAD: &[u8] = b"mediadl test payload";

/// Local file server standing in for the internet
pub struct FileServer {
    pub addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

#[derive(Deserialize)]
struct FlakyParams {
    #[serde(default)]
    fail: u32,
}

impl FileServer {
    pub async fn start() -> Self {
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let app = Router::new()
            .route("/files/{name}", get(file))
            .route("/flaky/{name}", get(flaky))
            .route("/missing/{name}", get(missing))
            .route("/slow/{name}", get(slow))
            .with_state(hits.clone());

        Self {
            addr: serve(app).await,
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Requests served for one `/flaky/{name}` file so far
    pub fn hits(&self, name: &str) -> u32 {
        self.hits.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

async fn file() -> impl IntoResponse {
    PAYLOAD
}

/// Answers 503 for the first `fail` requests of each name, then serves the payload
async fn flaky(
    State(hits): State<Arc<Mutex<HashMap<String, u32>>>>,
    Path(name): Path<String>,
    Query(params): Query<FlakyParams>,
) -> Response {
    let seen = {
        let mut hits = hits.lock().unwrap();
        let count = hits.entry(name).or_insert(0);
        *count += 1;
        *count
    };

    if seen <= params.fail {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        PAYLOAD.into_response()
    }
}

async fn missing() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

/// Sends one chunk and then stalls until the client hangs up
async fn slow() -> Response {
    let first = stream::once(async { Ok::<_, Infallible>(Bytes::from_static(PAYLOAD)) });
    let body = first.chain(stream::pending::<Result<Bytes, Infallible>>());
    Body::from_stream(body).into_response()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub const SAB_API_KEY: &str = "sab-key";

#[derive(Debug, Clone)]
struct SabEntry {
    nzo_id: String,
    name: String,
    status: String,
}

#[derive(Debug, Default)]
struct SabState {
    calls: Vec<String>,
    next_id: u32,
    queue: Vec<SabEntry>,
    history: Vec<SabEntry>,
}

#[derive(Clone)]
struct SabShared {
    state: Arc<Mutex<SabState>>,
    add_delay: Duration,
    delete_delay: Duration,
}

/// Stand-in for the SABnzbd JSON API.
///
/// What happens to an added NZB depends on its URL: `complete` lands in the
/// history as finished, `broken` as failed, anything else sits in the queue
/// downloading. `unstable` is accepted but answered with a 503.
pub struct MockSabnzbd {
    pub addr: SocketAddr,
    state: Arc<Mutex<SabState>>,
}

impl MockSabnzbd {
    pub async fn start() -> Self {
        Self::with_delays(Duration::ZERO, Duration::ZERO).await
    }

    /// `add_delay` holds the addurl answer after the NZB is accepted;
    /// `delete_delay` slows every delete
    pub async fn with_delays(add_delay: Duration, delete_delay: Duration) -> Self {
        let state = Arc::new(Mutex::new(SabState::default()));
        let shared = SabShared {
            state: state.clone(),
            add_delay,
            delete_delay,
        };
        let app = Router::new().route("/api", get(sab_api)).with_state(shared);

        Self {
            addr: serve(app).await,
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Queue and history entries SABnzbd still holds
    pub fn entries(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.queue.len() + state.history.len()
    }
}

async fn sab_api(State(shared): State<SabShared>, Query(params): Query<HashMap<String, String>>) -> Response {
    let param = |key: &str| params.get(key).cloned().unwrap_or_default();

    if param("apikey") != SAB_API_KEY {
        return Json(json!({"status": false, "error": "API Key Incorrect"})).into_response();
    }

    let mode = param("mode");
    match mode.as_str() {
        "addurl" => {
            let source = param("name");
            let nzo_id = {
                let mut state = shared.state.lock().unwrap();
                state.calls.push(format!("addurl:{source}"));
                state.next_id += 1;
                let entry = SabEntry {
                    nzo_id: format!("SABnzbd_nzo_{}", state.next_id),
                    name: param("nzbname"),
                    status: "Downloading".to_string(),
                };
                let nzo_id = entry.nzo_id.clone();
                if source.contains("complete") {
                    state.history.push(SabEntry {
                        status: "Completed".to_string(),
                        ..entry
                    });
                } else if source.contains("broken") {
                    state.history.push(SabEntry {
                        status: "Failed".to_string(),
                        ..entry
                    });
                } else {
                    state.queue.push(entry);
                }
                nzo_id
            };

            tokio::time::sleep(shared.add_delay).await;
            if source.contains("unstable") {
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
            Json(json!({"status": true, "nzo_ids": [nzo_id]})).into_response()
        }
        "queue" | "history" if param("name") == "delete" => {
            let nzo_id = param("value");
            shared
                .state
                .lock()
                .unwrap()
                .calls
                .push(format!("delete:{mode}:{nzo_id}"));
            tokio::time::sleep(shared.delete_delay).await;

            let mut state = shared.state.lock().unwrap();
            if mode == "queue" {
                state.queue.retain(|e| e.nzo_id != nzo_id);
            } else {
                state.history.retain(|e| e.nzo_id != nzo_id);
            }
            Json(json!({"status": true})).into_response()
        }
        "queue" | "history" => {
            let state = shared.state.lock().unwrap();
            let entries = if mode == "queue" { &state.queue } else { &state.history };
            let matches = |e: &&SabEntry| {
                params.get("nzo_ids").is_none_or(|id| &e.nzo_id == id)
                    && params.get("search").is_none_or(|term| e.name.contains(term.as_str()))
            };

            if mode == "queue" {
                let slots: Vec<_> = entries
                    .iter()
                    .filter(matches)
                    .map(|e| json!({"nzo_id": e.nzo_id, "filename": e.name, "mb": "100.0", "mbleft": "50.0"}))
                    .collect();
                Json(json!({"queue": {"slots": slots}})).into_response()
            } else {
                let slots: Vec<_> = entries
                    .iter()
                    .filter(matches)
                    .map(|e| {
                        let failed = e.status == "Failed";
                        json!({
                            "nzo_id": e.nzo_id,
                            "name": e.name,
                            "status": e.status,
                            "fail_message": if failed { "Out of retention" } else { "" },
                            "bytes": if failed { 0 } else { 2048 },
                            "storage": format!("/complete/{}", e.name),
                        })
                    })
                    .collect();
                Json(json!({"history": {"slots": slots}})).into_response()
            }
        }
        _ => Json(json!({"status": false, "error": "not implemented"})).into_response(),
    }
}

pub const QBIT_PASSWORD: &str = "qbit-pass";
const QBIT_COOKIE: &str = "SID=mediadl-test-session";

#[derive(Debug, Clone)]
struct QbitTorrent {
    hash: String,
    tag: String,
    state: String,
    progress: f64,
}

#[derive(Debug, Default)]
struct QbitState {
    calls: Vec<String>,
    logins: u32,
    next_hash: u32,
    expire_session: bool,
    torrents: Vec<QbitTorrent>,
}

type QbitShared = Arc<Mutex<QbitState>>;

/// Stand-in for the qBittorrent Web API v2.
///
/// Added torrents are `complete` (seeding), `broken` (errored) or
/// downloading, judged by their URL.
pub struct MockQbittorrent {
    pub addr: SocketAddr,
    state: QbitShared,
}

impl MockQbittorrent {
    pub async fn start() -> Self {
        let state: QbitShared = Arc::default();
        let app = Router::new()
            .route("/api/v2/auth/login", post(qbit_login))
            .route("/api/v2/torrents/add", post(qbit_add))
            .route("/api/v2/torrents/info", get(qbit_info))
            .route("/api/v2/torrents/delete", post(qbit_delete))
            .with_state(state.clone());

        Self {
            addr: serve(app).await,
            state,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn logins(&self) -> u32 {
        self.state.lock().unwrap().logins
    }

    pub fn torrents(&self) -> usize {
        self.state.lock().unwrap().torrents.len()
    }

    /// The next info request is answered 403 as if the session cookie expired
    pub fn expire_session(&self) {
        self.state.lock().unwrap().expire_session = true;
    }
}

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|cookies| cookies.contains(QBIT_COOKIE))
}

async fn qbit_login(State(state): State<QbitShared>, Form(form): Form<HashMap<String, String>>) -> Response {
    state.lock().unwrap().logins += 1;
    if form.get("password").map(String::as_str) != Some(QBIT_PASSWORD) {
        return "Fails.".into_response();
    }
    ([(header::SET_COOKIE, format!("{QBIT_COOKIE}; path=/"))], "Ok.").into_response()
}

async fn qbit_add(
    State(state): State<QbitShared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !has_session(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let source = form.get("urls").cloned().unwrap_or_default();
    let (torrent_state, progress) = if source.contains("complete") {
        ("stalledUP", 1.0)
    } else if source.contains("broken") {
        ("error", 0.1)
    } else {
        ("downloading", 0.5)
    };

    let mut state = state.lock().unwrap();
    state.calls.push(format!("add:{source}"));
    state.next_hash += 1;
    let torrent = QbitTorrent {
        hash: format!("{:040x}", state.next_hash),
        tag: form.get("tags").cloned().unwrap_or_default(),
        state: torrent_state.to_string(),
        progress,
    };
    state.torrents.push(torrent);
    "Ok.".into_response()
}

#[derive(Deserialize)]
struct TagQuery {
    #[serde(default)]
    tag: Option<String>,
}

async fn qbit_info(State(state): State<QbitShared>, headers: HeaderMap, Query(query): Query<TagQuery>) -> Response {
    let mut state = state.lock().unwrap();
    if !has_session(&headers) || std::mem::take(&mut state.expire_session) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let torrents: Vec<_> = state
        .torrents
        .iter()
        .filter(|t| query.tag.as_ref().is_none_or(|tag| &t.tag == tag))
        .map(|t| {
            json!({
                "hash": t.hash,
                "state": t.state,
                "progress": t.progress,
                "size": 1000,
                "completed": (t.progress * 1000.0) as i64,
            })
        })
        .collect();
    Json(torrents).into_response()
}

async fn qbit_delete(
    State(state): State<QbitShared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !has_session(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let hashes = form.get("hashes").cloned().unwrap_or_default();
    let delete_files = form.get("deleteFiles").cloned().unwrap_or_default();

    let mut state = state.lock().unwrap();
    state.calls.push(format!("delete:{hashes}:{delete_files}"));
    let doomed: Vec<&str> = hashes.split('|').collect();
    state.torrents.retain(|t| !doomed.contains(&t.hash.as_str()));
    StatusCode::OK.into_response()
}

/// Tunnel probe whose answer the test flips
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    down: Arc<AtomicBool>,
}

impl ScriptedProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.down.store(!healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunnelProbe for ScriptedProbe {
    async fn probe(&self) -> Result<TunnelInfo, ProbeError> {
        if self.down.load(Ordering::SeqCst) {
            Err(ProbeError::TunnelDown("stopped".into()))
        } else {
            Ok(TunnelInfo {
                public_ip: "198.51.100.7".into(),
                server: Some("se-sto-wg-001".into()),
            })
        }
    }
}

pub fn fast_vpn_settings() -> VpnSettings {
    VpnSettings {
        probe_interval: Duration::from_millis(40),
        probe_timeout: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(500),
        killswitch_threshold: 2,
    }
}

/// Everything the daemon wires together, minus the HTTP surface
pub struct Harness {
    pub config: Arc<Config>,
    pub scheduler: Scheduler,
    pub vpn: VpnController,
    pub probe: ScriptedProbe,
    pub metrics: Arc<Metrics>,
}

impl Harness {
    /// Starts the dispatch loop; the VPN is left `disconnected`
    pub fn new(config: Config) -> Self {
        Self::with_vpn_settings(config, fast_vpn_settings())
    }

    pub fn with_vpn_settings(config: Config, settings: VpnSettings) -> Self {
        let probe = ScriptedProbe::default();
        let vpn = VpnController::new(Arc::new(probe.clone()), settings);
        let metrics = Arc::new(Metrics::new());
        let providers = ProviderSet::from_config(&config).unwrap();
        let scheduler = Scheduler::new(
            providers,
            SchedulerSettings::from(&config.downloads),
            vpn.subscribe(),
            metrics.clone(),
        );
        scheduler.spawn();

        Self {
            config: Arc::new(config),
            scheduler,
            vpn,
            probe,
            metrics,
        }
    }
}

/// Config for tests: no VPN requirement, downloads into `dir`
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.vpn.required = false;
    config.downloads.default_destination = dir.to_path_buf();
    config
}

/// Config where HTTP downloads are protected by the VPN
pub fn protected_http_config(dir: &std::path::Path) -> Config {
    let mut config = test_config(dir);
    config.vpn.required = true;
    config.providers.http.require_vpn = true;
    config
}

/// Poll `check` until it returns true or five seconds pass
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn job(scheduler: &Scheduler, id: uuid::Uuid) -> Job {
    scheduler.get(id).await.unwrap()
}
