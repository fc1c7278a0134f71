//! Bounded TCP accept.
//!
//! The socket is bound only after the site build succeeded, on the address
//! resolved from `PORT`, config, then the default port. At most
//! `max_connections` sockets (HTTP and tunnel alike) are held at once; further
//! clients wait in the kernel backlog until a slot frees up.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection slots closed")]
    SlotsClosed,
}

#[derive(Debug)]
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
}

impl Listener {
    /// Bind `address` (e.g. "0.0.0.0:8080").
    pub async fn bind(address: &str, max_connections: usize) -> Result<Self, ListenerError> {
        match TcpListener::bind(address).await {
            Ok(socket) => Ok(Self::from_tcp(socket, max_connections)),
            Err(source) => Err(ListenerError::Bind {
                address: address.to_owned(),
                source,
            }),
        }
    }

    pub fn from_tcp(socket: TcpListener, max_connections: usize) -> Self {
        Self {
            socket,
            slots: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Wait for a free slot, then for a client.
    ///
    /// The returned [`ConnectionPermit`] holds the slot; keep it for as long
    /// as the socket (or the tunnel it became) is open.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::SlotsClosed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;

        tracing::trace!(peer = %peer, free_slots = self.slots.available_permits(), "Accepted");
        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Slots not held by an open connection.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One held connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}
