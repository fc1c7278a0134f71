//! Request framing on a kept-alive connection.
//!
//! # Responsibilities
//! - Sit between the socket and hyper for the whole life of an HTTP
//!   connection
//! - Parse every request head before hyper sees it, then release exactly
//!   the body bytes that head announces
//! - Hold back an upgrade head: hyper reads end-of-stream, finishes the
//!   response it is writing, and the socket comes back out of
//!   [`HandoffStream::into_parts`] with the head and its trailing bytes
//!
//! # Design Decisions
//! - Bodies are tracked by `Content-Length` or by scanning chunked framing;
//!   anything else switches to pass-through and hyper owns the rest of the
//!   connection
//! - Writes go straight to the socket

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::http::head::{parse_head, CapturedHead};

const READ_CHUNK: usize = 8 * 1024;

/// What the next bytes from the client are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// A request head.
    Head,
    /// This many body bytes.
    Fixed(u64),
    /// A chunked body.
    Chunked(ChunkedScanner),
    /// Unknown; everything passes through untouched.
    Raw,
}

fn framing_for(headers: &HeaderMap) -> Framing {
    let mut codings = headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .peekable();
    if codings.peek().is_some() {
        let last = codings
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .last();
        return match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Framing::Chunked(ChunkedScanner::new()),
            _ => Framing::Raw,
        };
    }

    let mut lengths = headers.get_all(header::CONTENT_LENGTH).iter();
    let Some(first) = lengths.next() else {
        return Framing::Head;
    };
    if lengths.any(|other| other != first) {
        return Framing::Raw;
    }
    match first.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(0) => Framing::Head,
        Some(len) => Framing::Fixed(len),
        None => Framing::Raw,
    }
}

/// Chunked body could not be followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BadChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size { value: u64, digits: u8 },
    Extension { value: u64 },
    SizeLf { value: u64 },
    Data(u64),
    DataCr,
    DataLf,
    TrailerStart,
    Trailer,
    TrailerLf,
    EndLf,
    Done,
}

/// Finds where a chunked body ends without decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkedScanner {
    state: ChunkState,
}

impl ChunkedScanner {
    fn new() -> Self {
        Self {
            state: ChunkState::Size { value: 0, digits: 0 },
        }
    }

    fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Advance over `bytes`; returns how many of them belong to the body.
    fn scan(&mut self, bytes: &[u8]) -> Result<usize, BadChunk> {
        let mut at = 0;
        while at < bytes.len() {
            if let ChunkState::Data(remaining) = self.state {
                let take = remaining.min((bytes.len() - at) as u64);
                at += take as usize;
                self.state = if take == remaining {
                    ChunkState::DataCr
                } else {
                    ChunkState::Data(remaining - take)
                };
                continue;
            }

            let byte = bytes[at];
            self.state = match self.state {
                ChunkState::Size { value, digits } => match byte {
                    b'\r' if digits > 0 => ChunkState::SizeLf { value },
                    b';' | b' ' | b'\t' if digits > 0 => ChunkState::Extension { value },
                    _ => {
                        let digit = (byte as char).to_digit(16).ok_or(BadChunk)?;
                        if digits >= 16 {
                            return Err(BadChunk);
                        }
                        ChunkState::Size {
                            value: value * 16 + u64::from(digit),
                            digits: digits + 1,
                        }
                    }
                },
                ChunkState::Extension { value } => match byte {
                    b'\r' => ChunkState::SizeLf { value },
                    b'\n' => return Err(BadChunk),
                    _ => ChunkState::Extension { value },
                },
                ChunkState::SizeLf { value } => match byte {
                    b'\n' if value == 0 => ChunkState::TrailerStart,
                    b'\n' => ChunkState::Data(value),
                    _ => return Err(BadChunk),
                },
                ChunkState::DataCr => match byte {
                    b'\r' => ChunkState::DataLf,
                    _ => return Err(BadChunk),
                },
                ChunkState::DataLf => match byte {
                    b'\n' => ChunkState::Size { value: 0, digits: 0 },
                    _ => return Err(BadChunk),
                },
                ChunkState::TrailerStart => match byte {
                    b'\r' => ChunkState::EndLf,
                    _ => ChunkState::Trailer,
                },
                ChunkState::Trailer => match byte {
                    b'\r' => ChunkState::TrailerLf,
                    _ => ChunkState::Trailer,
                },
                ChunkState::TrailerLf => match byte {
                    b'\n' => ChunkState::TrailerStart,
                    _ => return Err(BadChunk),
                },
                ChunkState::EndLf => match byte {
                    b'\n' => ChunkState::Done,
                    _ => return Err(BadChunk),
                },
                ChunkState::Data(_) | ChunkState::Done => break,
            };
            at += 1;
            if self.is_done() {
                break;
            }
        }
        Ok(at)
    }
}

/// The connection as hyper reads it.
#[derive(Debug)]
pub struct HandoffStream<S> {
    inner: S,
    /// Read from the socket, not yet released.
    pending: BytesMut,
    /// Released, not yet read by hyper.
    outgoing: Bytes,
    framing: Framing,
    max_head_bytes: usize,
    held: Option<CapturedHead>,
    eof: bool,
}

impl<S> HandoffStream<S> {
    /// Start after `first`, which was read off `inner` already.
    pub fn new(inner: S, first: CapturedHead, max_head_bytes: usize) -> Self {
        let CapturedHead { head, buffered } = first;
        Self {
            inner,
            pending: BytesMut::from(&buffered[..]),
            outgoing: head.raw().clone(),
            framing: framing_for(&head.headers),
            max_head_bytes,
            held: None,
            eof: false,
        }
    }

    /// The socket, plus the upgrade head that stopped the HTTP exchange.
    pub fn into_parts(self) -> (S, Option<CapturedHead>) {
        (self.inner, self.held)
    }

    /// Move what the current framing allows from `pending` to `outgoing`.
    /// Returns false when more socket bytes are needed.
    fn release(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }

        match self.framing {
            Framing::Raw => {
                self.outgoing = self.pending.split().freeze();
            }
            Framing::Fixed(remaining) => {
                let take = remaining.min(self.pending.len() as u64);
                self.outgoing = self.pending.split_to(take as usize).freeze();
                self.framing = if take == remaining {
                    Framing::Head
                } else {
                    Framing::Fixed(remaining - take)
                };
            }
            Framing::Chunked(mut scanner) => match scanner.scan(&self.pending) {
                Ok(body) => {
                    self.outgoing = self.pending.split_to(body).freeze();
                    self.framing = if scanner.is_done() {
                        Framing::Head
                    } else {
                        Framing::Chunked(scanner)
                    };
                }
                Err(BadChunk) => {
                    tracing::debug!("Unreadable chunked body, passing connection through");
                    self.framing = Framing::Raw;
                }
            },
            Framing::Head => match parse_head(&mut self.pending) {
                Ok(Some(head)) if head.is_upgrade() => {
                    tracing::debug!(path = %head.target, "Upgrade on kept-alive connection, taking socket back");
                    let buffered = self.pending.split().freeze();
                    self.held = Some(CapturedHead { head, buffered });
                }
                Ok(Some(head)) => {
                    self.framing = framing_for(&head.headers);
                    self.outgoing = head.raw().clone();
                }
                Ok(None) if self.pending.len() < self.max_head_bytes => return false,
                // Let hyper answer heads it cannot use.
                Ok(None) | Err(_) => self.framing = Framing::Raw,
            },
        }
        true
    }
}

impl<S: AsyncRead + Unpin> HandoffStream<S> {
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut read = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read))?;
        if read.filled().is_empty() {
            self.eof = true;
        } else {
            self.pending.extend_from_slice(read.filled());
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HandoffStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.outgoing.is_empty() {
                let n = this.outgoing.len().min(buf.remaining());
                buf.put_slice(&this.outgoing.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.held.is_some() {
                return Poll::Ready(Ok(()));
            }
            if this.release() {
                continue;
            }
            if this.eof {
                if !this.pending.is_empty() {
                    this.outgoing = this.pending.split().freeze();
                    continue;
                }
                return Poll::Ready(Ok(()));
            }
            ready!(this.poll_fill(cx))?;
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HandoffStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
