//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, in-flight tracking)
//!     → http::head (first request head pre-read)
//!     → upgrade: raw socket to tunnel engine
//!     → otherwise: http::framing carries the connection into the HTTP stack
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, DrainReport};
pub use listener::{Listener, ListenerError};
