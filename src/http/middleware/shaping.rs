//! Response compression negotiation.
//!
//! The codec work is done by tower-http's `CompressionLayer`. This module
//! decides which single coding a response may use: the first entry of the
//! configured preference list that the client accepts. The request's
//! `Accept-Encoding` is rewritten to that coding (or `identity`) before the
//! compression layer sees it.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tower_http::compression::CompressionLayer;

use crate::config::CompressionConfig;

/// Supported content codings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Br,
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Br => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br" => Ok(Encoding::Br),
            "gzip" | "x-gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            other => Err(format!("unsupported encoding: {other}")),
        }
    }
}

/// Ordered encoding preference shared by all requests.
#[derive(Debug, Clone)]
pub struct Shaping {
    preference: Arc<[Encoding]>,
}

impl Shaping {
    pub fn new(preference: Vec<Encoding>) -> Self {
        Self {
            preference: preference.into(),
        }
    }

    /// Unknown names are skipped; validation reports them at load time.
    pub fn from_config(config: &CompressionConfig) -> Self {
        let mut preference = Vec::new();
        for encoding in config.encodings.iter().filter_map(|e| e.parse().ok()) {
            if !preference.contains(&encoding) {
                preference.push(encoding);
            }
        }
        Self::new(preference)
    }

    pub fn preference(&self) -> &[Encoding] {
        &self.preference
    }

    pub fn negotiate(&self, accept_encoding: Option<&str>) -> Option<Encoding> {
        negotiate(&self.preference, accept_encoding.unwrap_or(""))
    }

    /// Compression layer with exactly the preferred codecs enabled.
    pub fn compression_layer(&self) -> CompressionLayer {
        CompressionLayer::new()
            .br(self.preference.contains(&Encoding::Br))
            .gzip(self.preference.contains(&Encoding::Gzip))
            .deflate(self.preference.contains(&Encoding::Deflate))
    }
}

/// First entry of `preference` accepted by `accept_encoding`.
///
/// A coding is accepted when listed with `q > 0`, or when not listed and
/// `*` carries `q > 0`.
pub fn negotiate(preference: &[Encoding], accept_encoding: &str) -> Option<Encoding> {
    let mut listed: Vec<(Encoding, f32)> = Vec::new();
    let mut wildcard: Option<f32> = None;

    for item in accept_encoding.split(',') {
        let mut parts = item.split(';');
        let name = parts.next().unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|v| v.trim().parse::<f32>().ok())
            .unwrap_or(1.0);

        if name == "*" {
            wildcard = Some(q);
        } else if let Ok(encoding) = name.parse::<Encoding>() {
            listed.push((encoding, q));
        }
    }

    preference.iter().copied().find(|encoding| {
        let q = listed
            .iter()
            .find(|(e, _)| e == encoding)
            .map(|(_, q)| *q)
            .or(wildcard)
            .unwrap_or(0.0);
        q > 0.0
    })
}

pub async fn negotiate_encoding(
    State(shaping): State<Shaping>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let accept = req
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok());

    let chosen = shaping.negotiate(accept);
    let value = chosen.map_or("identity", |e| e.as_str());
    req.headers_mut()
        .insert(header::ACCEPT_ENCODING, HeaderValue::from_static(value));

    next.run(req).await
}
