/*!
 * End-to-end transfers over real HTTP
 *
 * An in-process axum server plays both the presign service and the object
 * store (ranged GET, PUT). The engine runs with its real reqwest-backed
 * presigner and transport.
 */

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use shardline::{Engine, EngineConfig, Network, OutcomeStatus, END_SENTINEL, START_SENTINEL};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct MockState {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, (Vec<u8>, Option<u64>)>>,
    /// Service code returned for every presign request when set
    refuse_code: Mutex<Option<i64>>,
    presign_calls: AtomicUsize,
    ranged_gets: AtomicUsize,
    /// Append junk to every 206 body when set
    pad_ranges: AtomicBool,
    /// When each piece of an upload body reached the server
    arrivals: Mutex<Vec<(Instant, u64)>>,
}

struct MockStore {
    state: Arc<MockState>,
    _runtime: tokio::runtime::Runtime,
}

impl MockStore {
    fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(MockState {
            base_url: format!("http://{}", addr),
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            refuse_code: Mutex::new(None),
            presign_calls: AtomicUsize::new(0),
            ranged_gets: AtomicUsize::new(0),
            pad_ranges: AtomicBool::new(false),
            arrivals: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/presign", post(presign))
            .route("/objects/*name", get(get_object).put(put_object))
            .with_state(state.clone());
        runtime.spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            _runtime: runtime,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/presign", self.state.base_url)
    }

    fn put(&self, name: &str, body: Vec<u8>) {
        self.state.objects.lock().unwrap().insert(name.to_string(), body);
    }

    fn refuse_with(&self, code: i64) {
        *self.state.refuse_code.lock().unwrap() = Some(code);
    }

    fn ranged_gets(&self) -> usize {
        self.state.ranged_gets.load(Ordering::SeqCst)
    }

    fn upload(&self, name: &str) -> Option<(Vec<u8>, Option<u64>)> {
        self.state.uploads.lock().unwrap().get(name).cloned()
    }

    fn pad_ranges(&self) {
        self.state.pad_ranges.store(true, Ordering::SeqCst);
    }

    fn arrivals(&self) -> Vec<(Instant, u64)> {
        self.state.arrivals.lock().unwrap().clone()
    }
}

async fn presign(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.presign_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(code) = *state.refuse_code.lock().unwrap() {
        return Json(json!({"code": code, "message": "denied", "data": null}));
    }

    let name = body["download_sign"]
        .as_str()
        .or_else(|| body["upload_sign"].as_str())
        .unwrap_or_default();
    assert!(body["network"] == "private" || body["network"] == "public");
    Json(json!({
        "code": 0,
        "message": "ok",
        "data": {"endpoint": format!("{}/objects/{}?sig=test", state.base_url, name)}
    }))
}

async fn get_object(
    State(state): State<Arc<MockState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(object) = state.objects.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::OK, object).into_response();
    };

    state.ranged_gets.fetch_add(1, Ordering::SeqCst);
    let (start, end) = match parse_range(range, object.len()) {
        Some(bounds) => bounds,
        None => return StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
    };
    let content_range = format!("bytes {}-{}/{}", start, end, object.len());
    let mut body = object[start..=end].to_vec();
    if state.pad_ranges.load(Ordering::SeqCst) {
        body.extend_from_slice(b"trailing junk");
    }
    (StatusCode::PARTIAL_CONTENT, [(header::CONTENT_RANGE, content_range)], body).into_response()
}

async fn put_object(
    State(state): State<Arc<MockState>>,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let mut received = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(piece) = stream.next().await {
        let Ok(piece) = piece else {
            return StatusCode::BAD_REQUEST;
        };
        state.arrivals.lock().unwrap().push((Instant::now(), piece.len() as u64));
        received.extend_from_slice(&piece);
    }
    state.uploads.lock().unwrap().insert(name, (received, declared));
    StatusCode::OK
}

/// Most bytes seen in any one-second window of an arrival log
fn busiest_second(log: &[(Instant, u64)]) -> u64 {
    log.iter()
        .map(|&(from, _)| {
            log.iter()
                .filter(|&&(at, _)| at >= from && at < from + Duration::from_secs(1))
                .map(|&(_, bytes)| bytes)
                .sum()
        })
        .max()
        .unwrap_or(0)
}

/// `bytes=a-b` (inclusive) clamped to the object
fn parse_range(header: &str, len: usize) -> Option<(usize, usize)> {
    let bounds = header.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse::<usize>().ok()?.min(len.checked_sub(1)?);
    (start <= end).then_some((start, end))
}

fn object(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write_manifest(root: &Path, records: &[(&str, usize)]) {
    std::fs::create_dir_all(root.join("meta")).unwrap();
    let body: String = records
        .iter()
        .map(|(name, size)| format!("{},{},bin\n", name, size))
        .collect();
    std::fs::write(root.join("meta/objects.bin"), body).unwrap();
}

fn config(store: &MockStore, root: &Path) -> EngineConfig {
    EngineConfig {
        root: root.to_path_buf(),
        presign_endpoint: store.endpoint(),
        parallel: 4,
        bandwidth_bps: 0,
        chunk_size: 1024,
        max_attempts: 2,
        retry_base_ms: 1,
        retry_max_ms: 5,
        show_progress: false,
        ..EngineConfig::default()
    }
}

#[test]
fn test_multi_part_pull_reassembles_exact_bytes() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    let big = object(2600);
    store.put("big", big.clone());
    store.put("small", object(100));
    write_manifest(dir.path(), &[("big", 2600), ("small", 100)]);

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let report = engine.multi_download(dir.path()).unwrap();

    assert_eq!(report.completed, 2, "{:?}", report.failures);
    assert_eq!(std::fs::read(dir.path().join("data/big")).unwrap(), big);
    assert_eq!(std::fs::read(dir.path().join("data/small")).unwrap(), object(100));
    // 3 parts for big, 1 for small
    assert_eq!(store.ranged_gets(), 4);
    assert!(!dir.path().join("temp/big.0.part").exists());
}

#[test]
fn test_existing_part_is_not_fetched_again() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    let big = object(2600);
    store.put("big", big.clone());
    write_manifest(dir.path(), &[("big", 2600)]);

    std::fs::create_dir_all(dir.path().join("temp")).unwrap();
    std::fs::write(dir.path().join("temp/big.0.part"), &big[..1024]).unwrap();

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let report = engine.multi_download(dir.path()).unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(store.ranged_gets(), 2);
    assert_eq!(std::fs::read(dir.path().join("data/big")).unwrap(), big);
}

#[test]
fn test_second_run_transfers_nothing() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    store.put("a", object(3000));
    store.put("b", object(10));
    write_manifest(dir.path(), &[("a", 3000), ("b", 10)]);

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let first = engine.multi_download(dir.path()).unwrap();
    assert_eq!(first.bytes_transferred, 3010);
    let gets = store.ranged_gets();

    let second = engine.multi_download(dir.path()).unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.bytes_transferred, 0);
    assert_eq!(store.ranged_gets(), gets);
}

#[test]
fn test_push_sends_exact_bytes_with_length() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    let payload = object(700 * 1024);
    std::fs::create_dir_all(dir.path().join("meta")).unwrap();
    std::fs::write(dir.path().join("meta/a.bin"), &payload).unwrap();
    std::fs::write(dir.path().join("meta/b.bin"), b"x,1\n").unwrap();

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    engine.push(START_SENTINEL).unwrap();
    engine.push("meta/a.bin").unwrap();
    engine.push("meta/b.bin").unwrap();
    engine.push(END_SENTINEL).unwrap();
    let report = engine.wait().unwrap().unwrap();

    assert_eq!(report.completed, 2, "{:?}", report.failures);
    let (body, declared) = store.upload("meta/a.bin").unwrap();
    assert_eq!(body, payload);
    assert_eq!(declared, Some(payload.len() as u64));
    assert_eq!(store.upload("meta/b.bin").unwrap().0, b"x,1\n");
}

#[test]
fn test_presign_refusal_fails_jobs() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    store.put("a", object(10));
    store.refuse_with(40301);
    write_manifest(dir.path(), &[("a", 10)]);

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let report = engine.multi_download(dir.path()).unwrap();

    assert_eq!(report.failed, 1);
    let failure = &report.failures[0];
    assert_eq!(failure.status, OutcomeStatus::Failed);
    assert_eq!(failure.attempts, 2);
    assert!(failure.error.as_deref().unwrap().contains("40301"));
    assert_eq!(store.state.presign_calls.load(Ordering::SeqCst), 2);
    assert!(!dir.path().join("data/a").exists());
}

#[test]
fn test_missing_object_is_not_retried() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path(), &[("ghost", 10)]);

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let report = engine.multi_download(dir.path()).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].attempts, 1);
    assert!(report.failures[0].error.as_deref().unwrap().contains("404"));
}

#[test]
fn test_module_level_multi_download() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    store.put("img/0001.jpg", object(5000));
    write_manifest(dir.path(), &[("img/0001.jpg", 5000)]);

    let report =
        shardline::multi_download(dir.path(), &store.endpoint(), Network::Public, 0, 8).unwrap();
    assert!(report.is_success());
    assert_eq!(
        std::fs::read(dir.path().join("data/img/0001.jpg")).unwrap(),
        object(5000)
    );
}

#[test]
fn test_bandwidth_cap_slows_pull() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    store.put("capped", object(128 * 1024));
    write_manifest(dir.path(), &[("capped", 128 * 1024)]);

    let mut config = config(&store, dir.path());
    config.bandwidth_bps = 64 * 1024;
    config.chunk_size = 16 * 1024;
    let engine = Engine::new(config).unwrap();

    let start = Instant::now();
    let report = engine.multi_download(dir.path()).unwrap();
    assert!(report.is_success());
    // 128 KiB at 64 KiB/s, less one burst
    assert!(start.elapsed() >= Duration::from_millis(1500), "{:?}", start.elapsed());
}

#[test]
fn test_oversized_range_body_is_rejected() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    store.put("big", object(2600));
    store.pad_ranges();
    write_manifest(dir.path(), &[("big", 2600)]);

    let engine = Engine::new(config(&store, dir.path())).unwrap();
    let report = engine.multi_download(dir.path()).unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.bytes_failed, 2600);
    assert!(report.failures[0].error.as_deref().unwrap().contains("body exceeds"));
    assert!(!dir.path().join("data/big").exists());
}

#[test]
fn test_push_stays_under_cap_in_every_second() {
    let store = MockStore::start();
    let dir = TempDir::new().unwrap();
    // twelve upload chunks at four per second
    let payload = object(3 * 1024 * 1024);
    std::fs::create_dir_all(dir.path().join("meta")).unwrap();
    std::fs::write(dir.path().join("meta/a.bin"), &payload).unwrap();

    let cap = 1024 * 1024;
    let mut config = config(&store, dir.path());
    config.bandwidth_bps = cap;
    let engine = Engine::new(config).unwrap();

    engine.push(START_SENTINEL).unwrap();
    engine.push("meta/a.bin").unwrap();
    engine.push(END_SENTINEL).unwrap();
    let report = engine.wait().unwrap().unwrap();
    assert_eq!(report.completed, 1, "{:?}", report.failures);
    assert_eq!(store.upload("meta/a.bin").unwrap().0, payload);

    let arrivals = store.arrivals();
    let busiest = busiest_second(&arrivals);
    // at most one extra upload chunk beyond rate plus burst
    assert!(busiest <= cap * 3 / 2, "{} bytes in one second against a {} B/s cap", busiest, cap);
}
