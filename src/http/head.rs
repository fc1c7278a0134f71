//! Request head capture.
//!
//! # Responsibilities
//! - Read raw bytes off a fresh connection until the request head is complete
//! - Parse later heads on the same connection for `framing.rs`
//! - Parse method, target and headers without consuming the socket
//! - Keep the raw head and any over-read bytes so the connection can be
//!   replayed into the HTTP stack or handed to the tunnel engine verbatim
//!
//! # Design Decisions
//! - Runs before hyper sees the connection, so upgrade classification never
//!   depends on HTTP middleware
//! - Bounded by size and by time

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEADERS: usize = 100;

/// Errors while reading the first request head.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("connection read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("connection closed mid-head")]
    Truncated,

    #[error("request head not received in time")]
    Timeout,
}

/// A parsed request head plus the exact bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub headers: HeaderMap,
    raw: Bytes,
}

impl RequestHead {
    /// Raw head bytes, including the terminating blank line.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Whether this request asks to switch protocols.
    pub fn is_upgrade(&self) -> bool {
        is_upgrade(&self.headers)
    }
}

/// A request head and whatever bytes arrived after it.
#[derive(Debug)]
pub struct CapturedHead {
    pub head: RequestHead,
    pub buffered: Bytes,
}

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    let wants_upgrade = headers
        .get_all(axum::http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    wants_upgrade && headers.contains_key(axum::http::header::UPGRADE)
}

/// Read until a full request head is buffered.
///
/// Returns `Ok(None)` if the peer closes before sending anything.
pub async fn read_head<S>(
    stream: &mut S,
    max_bytes: usize,
    timeout: Duration,
) -> Result<Option<CapturedHead>, HeadError>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_head_inner(stream, max_bytes))
        .await
        .map_err(|_| HeadError::Timeout)?
}

async fn read_head_inner<S>(stream: &mut S, max_bytes: usize) -> Result<Option<CapturedHead>, HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        if let Some(head) = parse_head(&mut buf)? {
            return Ok(Some(CapturedHead {
                head,
                buffered: buf.freeze(),
            }));
        }
        if buf.len() >= max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(HeadError::Truncated)
            };
        }
    }
}

/// Try to parse a head from `buf`; on success the head bytes are split off.
pub fn parse_head(buf: &mut BytesMut) -> Result<Option<RequestHead>, HeadError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut storage);

    let len = match req.parse(&buf[..])? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(HeadError::Parse(httparse::Error::Token))?;
    let target = req.path.unwrap_or("/").to_string();

    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HeadError::Parse(httparse::Error::HeaderName))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HeadError::Parse(httparse::Error::HeaderValue))?;
        headers.append(name, value);
    }

    let raw = buf.split_to(len).freeze();
    Ok(Some(RequestHead {
        method,
        target,
        headers,
        raw,
    }))
}
