//! Server-rendered page handling.
//!
//! # Responsibilities
//! - Define the seam to the rendered-page handler
//! - Forward requests to an SSR upstream when one is configured
//! - Map upstream failures to gateway errors
//!
//! # Design Decisions
//! - The renderer owns every path the asset root does not, including its
//!   own not-found policy
//! - Responses are streamed, never buffered

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        uri::{Authority, Scheme},
        Request, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

/// The server-rendered page handler.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: Request<Body>) -> Response;
}

/// Answers every request with 404. Used when no SSR upstream is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundRenderer;

#[async_trait]
impl PageRenderer for NotFoundRenderer {
    async fn render(&self, _request: Request<Body>) -> Response {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    }
}

/// Reverse-proxies rendered pages to an SSR server.
#[derive(Debug, Clone)]
pub struct UpstreamRenderer {
    authority: Authority,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl UpstreamRenderer {
    /// `upstream` is an http URL such as "http://127.0.0.1:4321".
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self, String> {
        let url = Url::parse(upstream).map_err(|e| format!("invalid render upstream {upstream:?}: {e}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("render upstream {upstream:?} has no host"))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&authority)
            .map_err(|e| format!("invalid render upstream {upstream:?}: {e}"))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            authority,
            client,
            timeout,
        })
    }

    fn upstream_uri(&self, uri: &Uri) -> Result<Uri, axum::http::Error> {
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse()?);
        }
        Ok(Uri::from_parts(parts)?)
    }
}

#[async_trait]
impl PageRenderer for UpstreamRenderer {
    async fn render(&self, request: Request<Body>) -> Response {
        let (mut parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        parts.uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Cannot build upstream URI");
                return (StatusCode::BAD_REQUEST, "Bad request target").into_response();
            }
        };

        let forwarded = Request::from_parts(parts, body);
        match tokio::time::timeout(self.timeout, self.client.request(forwarded)).await {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                tracing::error!(path = %path, upstream = %self.authority, error = %e, "Render upstream error");
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
            Err(_) => {
                tracing::error!(path = %path, upstream = %self.authority, "Render upstream timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Upstream timed out").into_response()
            }
        }
    }
}
