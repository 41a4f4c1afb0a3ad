//! End-to-end downloader behavior against a local HTTP server.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    Router,
    extract::{Path, Request, State},
    http::StatusCode,
    response::Response,
    routing::get,
};
use bytes::Bytes;
use parking_lot::Mutex;
use rill_cache::{CacheLayout, RemoteStream};
use rill_fetch::Downloader;
use rill_net::{NetOptions, ReqwestNet};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const B: u64 = 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 13) as u8).collect()
}

#[derive(Default)]
struct ServerState {
    hits: Mutex<Vec<String>>,
    range_requests: AtomicUsize,
    /// When non-zero, ranged responses after this many requests come back
    /// truncated.
    truncate_after: AtomicUsize,
}

async fn blob_endpoint(
    State(state): State<Arc<ServerState>>,
    Path(total): Path<usize>,
    request: Request,
) -> Result<Response, StatusCode> {
    state.hits.lock().push(request.uri().path().to_owned());

    let blob = pattern(total);
    let range = request
        .headers()
        .get("Range")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("bytes="))
        .and_then(|h| h.split_once('-'));

    let Some((start, end)) = range else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let start: usize = start.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let end: usize = end.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if start >= blob.len() {
        return Err(StatusCode::RANGE_NOT_SATISFIABLE);
    }
    let end = end.min(blob.len() - 1);

    let served = state.range_requests.fetch_add(1, Ordering::SeqCst);
    let truncate_after = state.truncate_after.load(Ordering::SeqCst);
    let mut body = blob[start..=end].to_vec();
    if truncate_after > 0 && served >= truncate_after {
        body.truncate(body.len() / 2);
    }

    Ok(Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            "Content-Range",
            format!("bytes {}-{}/{}", start, end, blob.len()),
        )
        .body(axum::body::Body::from(Bytes::from(body)))
        .unwrap())
}

async fn live_ok_endpoint(State(state): State<Arc<ServerState>>) -> Response {
    state.hits.lock().push("/live/ok".into());
    Response::builder()
        .status(StatusCode::OK)
        .header("X-Head-Seqnum", "42")
        .header("X-Sequence-Num", "40")
        .body(axum::body::Body::from(pattern(3000)))
        .unwrap()
}

async fn live_bad_seq_endpoint() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("X-Head-Seqnum", "42")
        .header("X-Sequence-Num", "4x0")
        .body(axum::body::Body::from(pattern(3000)))
        .unwrap()
}

async fn live_over_endpoint() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn live_gone_endpoint() -> StatusCode {
    StatusCode::FORBIDDEN
}

struct TestServer {
    base: String,
    state: Arc<ServerState>,
}

async fn run_server() -> TestServer {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/blob/{total}", get(blob_endpoint))
        .route("/live/ok", get(live_ok_endpoint))
        .route("/live/badseq", get(live_bad_seq_endpoint))
        .route("/live/over", get(live_over_endpoint))
        .route("/live/gone", get(live_gone_endpoint))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{}", addr.port()),
        state,
    }
}

fn downloader() -> Downloader {
    let net = Arc::new(ReqwestNet::new(NetOptions::default()).unwrap());
    Downloader::new(net, CancellationToken::new())
}

fn layout() -> CacheLayout {
    CacheLayout::default()
        .with_block_size(B)
        .with_max_cached_blocks(256)
        .with_max_forward_blocks(16)
}

fn ranged_stream(server: &TestServer, total: u64) -> RemoteStream {
    RemoteStream::new(
        format!("{}/blob/{total}", server.base).parse().unwrap(),
        false,
        layout(),
    )
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn linear_download_completes() {
    let server = run_server().await;
    let dl = downloader();
    let total = 10 * B;
    let stream = ranged_stream(&server, total);
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("full download", || stream.download_percent() >= 100.0).await;

    assert_eq!(stream.len(), total);
    assert_eq!(stream.block_count(), 10);
    let data = stream.read(0, total).unwrap();
    assert_eq!(&data[..], &pattern(total as usize)[..]);

    dl.shutdown();
    handle.await.unwrap();
    assert!(stream.is_quit_requested());
}

#[tokio::test]
async fn forward_seek_fetches_urgent_block() {
    let server = run_server().await;
    let dl = downloader();
    let total = 100 * B;
    let stream = ranged_stream(&server, total);
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("initial blocks", || stream.is_available(0, 4 * B)).await;

    stream.set_read_head(50 * B);
    wait_until("sought block", || stream.is_available(50 * B, B)).await;

    let data = stream.read(50 * B, B).unwrap();
    assert_eq!(
        &data[..],
        &pattern(total as usize)[50 * B as usize..51 * B as usize]
    );

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn length_learned_from_content_range() {
    let server = run_server().await;
    let dl = downloader();
    let stream = ranged_stream(&server, 5 * B + 123);
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("ready", || stream.is_ready()).await;
    assert_eq!(stream.len(), 5 * B + 123);
    assert_eq!(stream.block_count(), 6);

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn not_ready_stream_served_first() {
    let server = run_server().await;
    let dl = downloader();

    // known length, missing block 5 blocks ahead of the playhead
    let settled = ranged_stream(&server, 100 * B);
    settled.mark_ready(100 * B);
    for i in 0..5u64 {
        settled.insert(i, Bytes::from(pattern(B as usize)));
    }
    dl.register(&settled);

    let fresh = ranged_stream(&server, 50 * B);
    dl.register(&fresh);

    let handle = dl.spawn();
    wait_until("first request", || !server.state.hits.lock().is_empty()).await;
    assert_eq!(server.state.hits.lock()[0], "/blob/51200");

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn zero_margin_stream_wins() {
    let server = run_server().await;
    let dl = downloader();

    // missing block sits right at the playhead -> margin 0
    let urgent = ranged_stream(&server, 100 * B);
    urgent.mark_ready(100 * B);
    dl.register(&urgent);

    // playhead block cached, first gap 5 blocks out
    let relaxed = ranged_stream(&server, 50 * B);
    relaxed.mark_ready(50 * B);
    for i in 0..5u64 {
        relaxed.insert(i, Bytes::from(pattern(B as usize)));
    }
    dl.register(&relaxed);

    let handle = dl.spawn();
    wait_until("first request", || !server.state.hits.lock().is_empty()).await;
    assert_eq!(server.state.hits.lock()[0], "/blob/102400");

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn suspended_stream_not_scheduled() {
    let server = run_server().await;
    let dl = downloader();
    let stream = ranged_stream(&server, 10 * B);
    stream.set_suspended(true);
    dl.register(&stream);
    let handle = dl.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stream.is_ready());
    assert_eq!(stream.cached_blocks(), 0);

    stream.set_suspended(false);
    wait_until("resume", || stream.is_ready()).await;

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn whole_download_caches_body_and_sequence() {
    let server = run_server().await;
    let dl = downloader();
    let stream = RemoteStream::new(
        format!("{}/live/ok", server.base).parse().unwrap(),
        true,
        layout(),
    );
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("ready", || stream.is_ready()).await;
    assert_eq!(stream.len(), 3000);
    assert_eq!(stream.sequence(), (42, 40));
    assert_eq!(&stream.read(0, 3000).unwrap()[..], &pattern(3000)[..]);
    // 3000 bytes over 1 KiB blocks: two full blocks and a short tail
    assert_eq!(stream.block_count(), 3);

    // a whole-download stream is never scheduled again once ready
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(server.state.hits.lock().len(), 1);

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn malformed_sequence_header_faults_stream() {
    let server = run_server().await;
    let dl = downloader();
    let stream = RemoteStream::new(
        format!("{}/live/badseq", server.base).parse().unwrap(),
        true,
        layout(),
    );
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("fault", || stream.is_faulted()).await;
    assert!(!stream.is_ready());
    assert_eq!(stream.sequence(), (42, -1));

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn livestream_gone_marks_private() {
    let server = run_server().await;
    let dl = downloader();
    let stream = RemoteStream::new(
        format!("{}/live/gone", server.base).parse().unwrap(),
        true,
        layout(),
    );
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("fault", || stream.is_faulted()).await;
    assert!(stream.is_live_private());
    assert!(!stream.is_live_ended());

    // faulted stream is no longer scheduled
    let hits = server.state.hits.lock().len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(server.state.hits.lock().len(), hits);

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn livestream_over_marks_ended() {
    let server = run_server().await;
    let dl = downloader();
    let stream = RemoteStream::new(
        format!("{}/live/over", server.base).parse().unwrap(),
        true,
        layout(),
    );
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("fault", || stream.is_faulted()).await;
    assert!(stream.is_live_ended());
    assert!(!stream.is_live_private());

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn body_length_mismatch_faults_stream() {
    let server = run_server().await;
    // first response is served intact (it establishes the length), later
    // ones come back truncated
    server.state.truncate_after.store(1, Ordering::SeqCst);

    let dl = downloader();
    let stream = ranged_stream(&server, 10 * B);
    dl.register(&stream);
    let handle = dl.spawn();

    wait_until("fault", || stream.is_faulted()).await;
    assert!(stream.is_ready());
    assert!(stream.cached_blocks() < 10);

    dl.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn detach_all_quits_streams() {
    let server = run_server().await;
    let dl = downloader();
    let a = ranged_stream(&server, 10 * B);
    let b = ranged_stream(&server, 10 * B);
    dl.register(&a);
    dl.register(&b);

    dl.detach_all();
    assert!(a.is_quit_requested());
    assert!(b.is_quit_requested());

    // slots were cleared, so registration reuses slot 0
    assert_eq!(dl.register(&ranged_stream(&server, B)), 0);
}
