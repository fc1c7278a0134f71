//! HTTP server setup and connection dispatch.
//!
//! # Responsibilities
//! - Accept connections and pre-read the first request head
//! - Send upgrade connections to the tunnel engine or tear them down, whether
//!   the upgrade is the first request or follows kept-alive ones
//! - Serve everything else through the Axum router:
//!   request id → trace → encoding negotiation → compression → access gate
//!   → static asset or rendered page
//! - Drain in-flight connections on shutdown

use std::future::{poll_fn, Future};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeFile,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::{ListenerConfig, ServerConfig};
use crate::http::dispatch::{DispatchTarget, Dispatcher};
use crate::http::framing::HandoffStream;
use crate::http::head::{self, CapturedHead, HeadError};
use crate::http::middleware::{access_gate_middleware, negotiate_encoding, AccessGate, Shaping};
use crate::http::render::PageRenderer;
use crate::http::upgrade::TunnelEngine;
use crate::net::{ConnectionGuard, ConnectionTracker, Listener};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub renderer: Arc<dyn PageRenderer>,
}

/// Returned to hyper for an upgrade head that reached it, which only happens
/// once a connection's framing was lost; hyper closes without a response.
#[derive(Debug, Error)]
#[error("upgrade request on an established HTTP connection")]
pub struct LateUpgrade;

type ServiceFuture = Pin<Box<dyn Future<Output = Result<Response, LateUpgrade>> + Send>>;

/// State shared by every connection task.
struct ConnectionContext {
    router: Router,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<dyn TunnelEngine>,
    limits: ListenerConfig,
    tracker: ConnectionTracker,
}

/// The edge server: HTTP pipeline plus raw upgrade hand-off.
pub struct EdgeServer {
    context: Arc<ConnectionContext>,
}

impl EdgeServer {
    /// Create a new server with the given collaborators.
    pub fn new(
        config: &ServerConfig,
        renderer: Arc<dyn PageRenderer>,
        engine: Arc<dyn TunnelEngine>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            config.tunnel.prefix.clone(),
            config.site.client_path(),
        ));

        let state = AppState {
            dispatcher: dispatcher.clone(),
            renderer,
        };
        let router = Self::build_router(config, state);

        Self {
            context: Arc::new(ConnectionContext {
                router,
                dispatcher,
                engine,
                limits: config.listener.clone(),
                tracker: ConnectionTracker::new(),
            }),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// The access gate is only installed when active.
    fn build_router(config: &ServerConfig, state: AppState) -> Router {
        let gate = AccessGate::from_config(&config.auth);
        let shaping = Shaping::from_config(&config.compression);

        tracing::info!(
            gate_active = gate.is_active(),
            users = config.auth.users.len(),
            encodings = ?shaping.preference(),
            "HTTP pipeline configured"
        );

        let mut router = Router::new()
            .route("/{*path}", any(dispatch_handler))
            .route("/", any(dispatch_handler))
            .with_state(state);

        if gate.is_active() {
            router = router.layer(middleware::from_fn_with_state(gate, access_gate_middleware));
        }

        router
            .layer(shaping.compression_layer())
            .layer(middleware::from_fn_with_state(shaping, negotiate_encoding))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires, then drain connections.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tunnel_prefix = %self.context.dispatcher.tunnel_prefix(),
            asset_root = %self.context.dispatcher.asset_root().display(),
            "Edge server accepting connections"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let context = self.context.clone();
                        let conn_shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            handle_connection(context, stream, peer, conn_shutdown).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        let grace = Duration::from_secs(self.context.limits.shutdown_grace_secs);
        let report = self.context.tracker.drain(grace).await;
        if !report.is_clean() {
            tracing::warn!(
                open = report.open,
                tunnels = report.tunnels,
                "Connections still open after shutdown grace period"
            );
        }

        tracing::info!("Edge server stopped");
        Ok(())
    }
}

async fn handle_connection(
    context: Arc<ConnectionContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
    shutdown: broadcast::Receiver<()>,
) {
    let mut guard = context.tracker.track();
    metrics::set_active_connections(context.tracker.active_count());
    let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer);

    async move {
        let _ = stream.set_nodelay(true);

        let timeout = Duration::from_secs(context.limits.header_read_timeout_secs);
        match head::read_head(&mut stream, context.limits.max_head_bytes, timeout).await {
            Ok(Some(captured)) if captured.head.is_upgrade() => {
                dispatch_upgrade(&context, captured, stream, &mut guard).await;
            }
            Ok(Some(captured)) => serve_http(&context, captured, stream, shutdown, &mut guard).await,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Unusable request head");
                reject_head(&mut stream, &e).await;
            }
        }

        drop(guard);
        metrics::set_active_connections(context.tracker.active_count());
    }
    .instrument(span)
    .await;
}

/// Upgrade path: tunnel engine or silent teardown. No HTTP layer runs here.
async fn dispatch_upgrade(
    context: &ConnectionContext,
    captured: CapturedHead,
    stream: TcpStream,
    guard: &mut ConnectionGuard,
) {
    let CapturedHead { head, buffered } = captured;
    let target = context.dispatcher.classify_upgrade(&head.target);
    metrics::record_dispatch(&target);

    match target {
        DispatchTarget::TunnelUpgrade => {
            tracing::debug!(path = %head.target, buffered = buffered.len(), "Handing upgrade to tunnel engine");
            metrics::record_upgrade("forwarded");
            guard.mark_tunnel();
            context.engine.accept_upgrade(head, stream, buffered).await;
        }
        _ => {
            tracing::debug!(path = %head.target, "Upgrade outside tunnel prefix, closing socket");
            metrics::record_upgrade("rejected");
            drop(stream);
        }
    }
}

/// Normal path: serve the router until the client goes away or sends an
/// upgrade, which then takes the same route as a first-request upgrade.
async fn serve_http(
    context: &ConnectionContext,
    captured: CapturedHead,
    stream: TcpStream,
    mut shutdown: broadcast::Receiver<()>,
    guard: &mut ConnectionGuard,
) {
    let io = TokioIo::new(HandoffStream::new(stream, captured, context.limits.max_head_bytes));

    let router = context.router.clone();
    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        let response: ServiceFuture = Box::pin(async move {
            if head::is_upgrade(req.headers()) {
                tracing::debug!(path = %req.uri().path(), "Upgrade reached the HTTP stack, closing");
                metrics::record_upgrade("rejected");
                return Err(LateUpgrade);
            }
            match router.oneshot(req.map(Body::new)).await {
                Ok(response) => Ok(response),
                Err(never) => match never {},
            }
        });
        response
    });

    // Half-close keeps a response in flight when the stream reports the
    // end of HTTP traffic ahead of a held upgrade.
    let mut conn = hyper::server::conn::http1::Builder::new()
        .half_close(true)
        .serve_connection(io, service);

    let mut draining = false;
    let result = tokio::select! {
        result = poll_fn(|cx| conn.poll_without_shutdown(cx)) => result,
        _ = shutdown.recv() => {
            draining = true;
            Pin::new(&mut conn).graceful_shutdown();
            poll_fn(|cx| conn.poll_without_shutdown(cx)).await
        }
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "HTTP connection ended with error");
        return;
    }

    let parts = conn.into_parts();
    let (stream, held) = parts.io.into_inner().into_parts();
    match held {
        Some(captured) if !draining && parts.read_buf.is_empty() => {
            dispatch_upgrade(context, captured, stream, guard).await;
        }
        Some(captured) => {
            tracing::debug!(path = %captured.head.target, "Late upgrade during shutdown, closing socket");
            metrics::record_upgrade("rejected");
        }
        None => {}
    }
}

/// Best-effort error status for a head we could not use.
async fn reject_head(stream: &mut TcpStream, error: &HeadError) {
    use tokio::io::AsyncWriteExt;

    let response: &[u8] = match error {
        HeadError::Parse(_) => b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        HeadError::TooLarge(_) => {
            b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        }
        HeadError::Timeout => b"HTTP/1.1 408 Request Timeout\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        HeadError::Io(_) | HeadError::Truncated => return,
    };
    let _ = stream.write_all(response).await;
    let _ = stream.shutdown().await;
}

/// Static asset first, rendered page otherwise.
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let target = state
        .dispatcher
        .classify_request(request.method(), request.uri().path())
        .await;
    metrics::record_dispatch(&target);

    tracing::debug!(
        method = %request.method(),
        path = %request.uri().path(),
        dispatch = target.label(),
        "Dispatching request"
    );

    match target {
        DispatchTarget::StaticAsset(file) => match ServeFile::new(&file).oneshot(request).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        },
        DispatchTarget::RenderedPage => state.renderer.render(request).await,
        // Upgrades are settled before the router is reached.
        DispatchTarget::TunnelUpgrade | DispatchTarget::Rejected => {
            (StatusCode::BAD_REQUEST, "Unexpected upgrade").into_response()
        }
    }
}
