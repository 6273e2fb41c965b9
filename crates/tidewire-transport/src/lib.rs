//! Transport abstraction layer for Tidewire.
//!
//! Provides the [`Listener`], [`Handshake`] and [`Connection`] traits that
//! abstract over a byte-level network protocol, plus the [`DeliveryMode`]
//! that callers pick per message and LZ4 snapshot compression helpers.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod snapshot;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use snapshot::{compress_snapshot, decompress_snapshot};
#[cfg(feature = "websocket")]
pub use websocket::{PendingUpgrade, WebSocketConnection, WebSocketListener};

use std::fmt;

/// Identifies one peer connection for as long as the process lives.
///
/// Ordered so providers can keep connections in join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying `u32` value.
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a single message travels to its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMode {
    /// Delivered in order, no loss. TCP semantics.
    #[default]
    Reliable,
    /// May be lost or reordered. UDP semantics.
    Unreliable,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => write!(f, "tcp"),
            Self::Unreliable => write!(f, "udp"),
        }
    }
}

/// Accepts new incoming connections.
pub trait Listener: Send + Sync + 'static {
    /// An accepted socket that still has to finish its protocol handshake.
    type Pending: Handshake;
    /// The error type for listener operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming socket.
    ///
    /// The handshake is left to the caller so a slow peer cannot hold up
    /// the accept loop.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Gracefully shuts down the listener, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// The second half of accepting a connection.
pub trait Handshake: Send + 'static {
    /// The connection produced once the handshake succeeds.
    type Connection: Connection;
    /// The error type for handshake failures.
    type Error: std::error::Error + Send + Sync;

    /// Completes the protocol handshake.
    async fn complete(self) -> Result<Self::Connection, Self::Error>;
}

/// An established, message-framed byte pipe to one peer.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends one message reliably.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Waits for the next message. `Ok(None)` means the peer closed
    /// cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Sends one message that may be dropped. Falls back to [`send`]
    /// on transports without a lossy channel.
    ///
    /// [`send`]: Connection::send
    async fn send_unreliable(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send(data).await
    }

    /// Sends data with the given delivery mode.
    async fn send_with(
        &self,
        data: &[u8],
        mode: DeliveryMode,
    ) -> Result<(), Self::Error> {
        match mode {
            DeliveryMode::Reliable => self.send(data).await,
            DeliveryMode::Unreliable => self.send_unreliable(data).await,
        }
    }

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
