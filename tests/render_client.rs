use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{Router, body::Bytes, extract::State, http::StatusCode, routing::post};
use report_press::application::render::{
    FatalRenderError, PdfRenderer, RenderClient, RenderClientConfig, RetryPolicy,
    TransientRenderError,
};

const STUB_PDF: &[u8] = b"%PDF-1.7 stub";

struct Stub {
    hits: AtomicUsize,
    script: Mutex<VecDeque<StatusCode>>,
    fallback: StatusCode,
    bodies: Mutex<Vec<Bytes>>,
    delay: Duration,
}

impl Stub {
    fn new(script: &[StatusCode], fallback: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            bodies: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    /// Answers 200 only after `delay`.
    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            hits: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback: StatusCode::OK,
            bodies: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn convert(State(stub): State<Arc<Stub>>, body: Bytes) -> (StatusCode, Bytes) {
    stub.hits.fetch_add(1, Ordering::SeqCst);
    stub.bodies.lock().expect("bodies").push(body);
    if !stub.delay.is_zero() {
        tokio::time::sleep(stub.delay).await;
    }
    let status = stub
        .script
        .lock()
        .expect("script")
        .pop_front()
        .unwrap_or(stub.fallback);
    if status == StatusCode::OK {
        (status, Bytes::from_static(STUB_PDF))
    } else {
        (status, Bytes::from_static(b"stub failure"))
    }
}

async fn spawn_stub(stub: Arc<Stub>) -> SocketAddr {
    let router = Router::new()
        .route("/forms/chromium/convert/html", post(convert))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    addr
}

fn client(base_url: String, max_retries: u32, backoff_ms: u64) -> RenderClient {
    client_with_timeout(base_url, max_retries, backoff_ms, Duration::from_secs(5))
}

fn client_with_timeout(
    base_url: String,
    max_retries: u32,
    backoff_ms: u64,
    timeout: Duration,
) -> RenderClient {
    let mut config = RenderClientConfig::new(base_url);
    config.timeout = timeout;
    config.retry = RetryPolicy {
        max_retries,
        backoff_base: Duration::from_millis(backoff_ms),
    };
    RenderClient::new(&config).expect("client")
}

#[tokio::test]
async fn bad_gateway_is_retried_until_success() {
    let stub = Stub::new(
        &[StatusCode::BAD_GATEWAY, StatusCode::BAD_GATEWAY],
        StatusCode::OK,
    );
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let client = client(format!("http://{addr}"), 3, 20);

    let started = Instant::now();
    let pdf = client.render("<p>hello</p>").await.expect("rendered");

    assert_eq!(&pdf[..], STUB_PDF);
    assert_eq!(stub.hits(), 3);
    // 20ms + 40ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn html_is_uploaded_as_index_document() {
    let stub = Stub::new(&[], StatusCode::OK);
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let client = client(format!("http://{addr}/"), 0, 10);

    client.render("<p>upload me</p>").await.expect("rendered");

    let bodies = stub.bodies.lock().expect("bodies");
    let body = String::from_utf8_lossy(&bodies[0]);
    assert!(body.contains("name=\"files\""));
    assert!(body.contains("filename=\"index.html\""));
    assert!(body.contains("<p>upload me</p>"));
}

#[tokio::test]
async fn other_statuses_fail_without_retry() {
    let stub = Stub::new(&[], StatusCode::NOT_FOUND);
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let client = client(format!("http://{addr}"), 3, 10);

    let err = client.render("<p>missing</p>").await.expect_err("rejected");

    assert!(matches!(
        err,
        FatalRenderError::Rejected { status: 404, ref body } if body == "stub failure"
    ));
    assert_eq!(stub.hits(), 1);
}

#[tokio::test]
async fn persistent_bad_gateway_exhausts_retries() {
    let stub = Stub::new(&[], StatusCode::BAD_GATEWAY);
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let client = client(format!("http://{addr}"), 2, 10);

    let err = client.render("<p>busy</p>").await.expect_err("exhausted");

    assert!(matches!(
        err,
        FatalRenderError::Exhausted {
            attempts: 3,
            last: TransientRenderError::BadGateway { .. }
        }
    ));
    assert_eq!(stub.hits(), 3);
}

#[tokio::test]
async fn unreachable_renderer_is_a_transport_failure() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = client(format!("http://{addr}"), 1, 10);

    let err = client.render("<p>nobody home</p>").await.expect_err("unreachable");

    assert!(matches!(
        err,
        FatalRenderError::Exhausted {
            attempts: 2,
            last: TransientRenderError::Transport(_)
        }
    ));
}

#[tokio::test]
async fn slow_renderer_times_out_and_is_retried() {
    let stub = Stub::slow(Duration::from_millis(500));
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let client = client_with_timeout(format!("http://{addr}"), 1, 10, Duration::from_millis(100));

    let started = Instant::now();
    let err = client.render("<p>too slow</p>").await.expect_err("timed out");

    assert!(matches!(
        err,
        FatalRenderError::Exhausted {
            attempts: 2,
            last: TransientRenderError::Transport(_)
        }
    ));
    assert_eq!(stub.hits(), 2);
    // Two timed-out attempts, well short of two full stub delays.
    assert!(started.elapsed() < Duration::from_millis(1000));
}
