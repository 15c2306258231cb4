//! Local HTTP server recording the requests it receives.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Captured {
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Captured {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Captured>>>);

impl Recorder {
    fn record(&self, uri: Uri, headers: HeaderMap, body: Bytes) {
        self.0.lock().push(Captured {
            path: uri.path().to_string(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
}

pub struct TestServer {
    addr: SocketAddr,
    recorder: Recorder,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.recorder.0.lock().clone()
    }
}

async fn ok(State(r): State<Recorder>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    r.record(uri, headers, body);
    StatusCode::OK
}

async fn fail(State(r): State<Recorder>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    r.record(uri, headers, body);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn slow(State(r): State<Recorder>, uri: Uri, headers: HeaderMap, body: Bytes) -> StatusCode {
    r.record(uri, headers, body);
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

/// Serves `/ok`, `/relay` (200), `/fail` (500) and `/slow` (200 after 2s).
pub async fn spawn_server() -> TestServer {
    let recorder = Recorder::default();
    let app = Router::new()
        .route("/ok", post(ok))
        .route("/relay", post(ok))
        .route("/fail", post(fail))
        .route("/slow", post(slow))
        .with_state(recorder.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, recorder }
}
