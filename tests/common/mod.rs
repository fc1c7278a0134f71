//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use site_edge::config::ServerConfig;
use site_edge::http::{EdgeServer, PageRenderer, RequestHead, TunnelEngine};
use site_edge::lifecycle::Shutdown;
use site_edge::net::Listener;

pub const APP_JS: &str = "console.log('edge');\n";

/// Renderer that answers `rendered:<path>` and counts calls.
#[derive(Debug, Clone, Default)]
pub struct CountingRenderer {
    calls: Arc<AtomicUsize>,
}

impl CountingRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRenderer for CountingRenderer {
    async fn render(&self, request: Request<Body>) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (StatusCode::OK, format!("rendered:{}", request.uri().path())).into_response()
    }
}

/// What the engine saw for one upgrade.
#[derive(Debug)]
pub struct Handoff {
    pub target: String,
    pub raw_head: Bytes,
    pub buffered: Bytes,
    /// `buffered` followed by everything read off the socket until EOF.
    pub payload: Vec<u8>,
}

/// Engine that reports each hand-off and answers `engine-ok`.
#[derive(Debug, Clone)]
pub struct RecordingEngine {
    tx: mpsc::UnboundedSender<Handoff>,
}

impl RecordingEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Handoff>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TunnelEngine for RecordingEngine {
    async fn accept_upgrade(&self, head: RequestHead, mut socket: TcpStream, buffered: Bytes) {
        let mut payload = buffered.to_vec();
        let _ = socket.read_to_end(&mut payload).await;
        let _ = socket.write_all(b"engine-ok").await;
        let _ = socket.shutdown().await;

        let _ = self.tx.send(Handoff {
            target: head.target.clone(),
            raw_head: head.raw().clone(),
            buffered,
            payload,
        });
    }
}

/// A compiled-site tree: `dist/client` with a few assets.
pub fn site_fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let client = dir.path().join("dist/client");
    std::fs::create_dir_all(client.join("_astro")).unwrap();
    std::fs::write(client.join("_astro/app.js"), APP_JS).unwrap();
    std::fs::write(client.join("styles.css"), "body { color: black; }\n".repeat(200)).unwrap();
    dir
}

pub fn test_config(root: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".into();
    config.site.root = root.to_path_buf();
    config.listener.shutdown_grace_secs = 1;
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Bind an ephemeral port and run the server in the background.
pub async fn start_server(
    config: ServerConfig,
    renderer: Arc<dyn PageRenderer>,
    engine: Arc<dyn TunnelEngine>,
) -> TestServer {
    let listener = Listener::bind("127.0.0.1:0", config.listener.max_connections)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = EdgeServer::new(&config, renderer, engine);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer { addr, shutdown, handle }
}

/// Write `request` on a fresh connection and read until the server closes.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    assert!(read.is_ok(), "server did not close the connection");
    response
}

/// Read until `needle` has arrived, leaving the connection open.
pub async fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    while !received.windows(needle.len()).any(|w| w == needle) {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("server stalled")
            .unwrap();
        assert!(n > 0, "server closed early");
        received.extend_from_slice(&chunk[..n]);
    }
    received
}

pub fn upgrade_request(target: &str) -> String {
    format!(
        "GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n"
    )
}

/// Like [`raw_exchange`], but half-closes after writing so a tunnel engine
/// reading to EOF can finish.
pub async fn tunnel_exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    assert!(read.is_ok(), "tunnel engine did not finish");
    response
}
