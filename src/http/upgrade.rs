//! Tunnel upgrade hand-off.
//!
//! # Responsibilities
//! - Define the seam to the tunnel engine
//! - Pass the raw socket, the original request head and any over-read
//!   bytes across untouched
//!
//! # Data Flow
//! ```text
//! Client ──raw bytes──→ edge (head pre-read) ──head + buffered + socket──→ TunnelEngine
//! ```
//!
//! # Design Decisions
//! - No HTTP response is ever written here; the engine owns the handshake
//! - The engine owns the socket's lifetime, including timeouts

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::http::head::RequestHead;

/// The external tunneling-protocol engine.
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Take ownership of an upgraded connection.
    ///
    /// `buffered` holds bytes the client sent after the request head that
    /// were already read off `socket`.
    async fn accept_upgrade(&self, head: RequestHead, socket: TcpStream, buffered: Bytes);
}

/// Relays upgraded connections to a tunnel server listening on TCP.
///
/// The original request head and buffered bytes are replayed upstream, so
/// the tunnel server performs the protocol handshake itself.
#[derive(Debug, Clone)]
pub struct RelayEngine {
    upstream: String,
    connect_timeout: Duration,
}

impl RelayEngine {
    pub fn new(upstream: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            upstream: upstream.into(),
            connect_timeout,
        }
    }

    async fn relay(&self, head: RequestHead, mut socket: TcpStream, buffered: Bytes) -> std::io::Result<(u64, u64)> {
        let mut upstream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.upstream))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tunnel engine connect timed out"))??;
        upstream.set_nodelay(true)?;

        upstream.write_all(head.raw()).await?;
        if !buffered.is_empty() {
            upstream.write_all(&buffered).await?;
        }

        tokio::io::copy_bidirectional(&mut socket, &mut upstream).await
    }
}

#[async_trait]
impl TunnelEngine for RelayEngine {
    async fn accept_upgrade(&self, head: RequestHead, socket: TcpStream, buffered: Bytes) {
        let target = head.target.clone();
        match self.relay(head, socket, buffered).await {
            Ok((to_engine, to_client)) => tracing::debug!(
                path = %target,
                to_engine,
                to_client,
                "Tunnel connection finished"
            ),
            Err(e) => tracing::warn!(
                path = %target,
                upstream = %self.upstream,
                error = %e,
                "Tunnel relay ended with error"
            ),
        }
    }
}

/// Used when no tunnel engine is configured: closes every hand-off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropEngine;

#[async_trait]
impl TunnelEngine for DropEngine {
    async fn accept_upgrade(&self, head: RequestHead, socket: TcpStream, _buffered: Bytes) {
        tracing::warn!(path = %head.target, "No tunnel engine configured, closing upgraded connection");
        drop(socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use crate::http::head::parse_head;

    #[tokio::test]
    async fn relay_replays_head_and_buffered_bytes() {
        let engine_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let engine_addr = engine_listener.local_addr().unwrap();

        let edge_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let edge_addr = edge_listener.local_addr().unwrap();
        let _client = TcpStream::connect(edge_addr).await.unwrap();
        let (socket, _) = edge_listener.accept().await.unwrap();

        let raw = "GET /f/ HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n";
        let mut buf = BytesMut::from(raw.as_bytes());
        let head = parse_head(&mut buf).unwrap().unwrap();

        let engine = RelayEngine::new(engine_addr.to_string(), Duration::from_secs(2));
        tokio::spawn(async move {
            engine.accept_upgrade(head, socket, Bytes::from_static(b"early")).await;
        });

        let (mut upstream, _) = engine_listener.accept().await.unwrap();
        let mut received = vec![0u8; raw.len() + 5];
        upstream.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..raw.len()], raw.as_bytes());
        assert_eq!(&received[raw.len()..], b"early");
    }
}
