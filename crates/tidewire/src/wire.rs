//! What the WebSocket providers put on the wire, and the writer task both
//! sides use.
//!
//! Every WebSocket message is one encoded [`Frame`]. A client opens with
//! either `Hello` (to join) or `HostQuery` (to ask for host info and
//! leave). After `Hello`, every frame is a `Packet`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidewire_protocol::{Codec, Host, PROTOCOL_VERSION, Packet};
use tidewire_transport::{Connection, TransportError, WebSocketConnection};
use tokio::sync::mpsc;

/// One WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Client asks to join as a player.
    Hello,
    /// A simulation packet.
    Packet(Packet),
    /// Client asks for host info without joining.
    HostQuery,
    /// Server's answer to `HostQuery`.
    HostInfo(Host),
}

/// The `Sec-WebSocket-Protocol` value for this protocol version.
pub fn subprotocol() -> String {
    format!("tidewire.v{PROTOCOL_VERSION}")
}

/// Work for a connection's writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Vec<u8>),
    Ping,
    Close,
}

/// Encodes a frame, logging instead of failing: a packet that cannot be
/// encoded is a bug in the sender, not a network condition.
pub(crate) fn encode<C: Codec>(codec: &C, frame: &Frame) -> Option<Vec<u8>> {
    match codec.encode(frame) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            None
        }
    }
}

/// Queues a packet on a writer channel.
pub(crate) fn queue_packet<C: Codec>(
    codec: &C,
    outbound: &mpsc::UnboundedSender<Outbound>,
    packet: &Packet,
) {
    if let Some(bytes) = encode(codec, &Frame::Packet(packet.clone())) {
        if outbound.send(Outbound::Frame(bytes)).is_err() {
            tracing::trace!(kind = %packet.kind(), "writer gone, dropping packet");
        }
    }
}

/// Drains `outbound` into `conn` until the channel closes, a `Close` is
/// requested, or a send fails.
pub(crate) async fn write_loop(
    conn: Arc<WebSocketConnection>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        let result: Result<(), TransportError> = match item {
            Outbound::Frame(bytes) => conn.send(&bytes).await,
            Outbound::Ping => conn.ping().await,
            Outbound::Close => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(id = %conn.id(), error = %e, "close failed");
                }
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(id = %conn.id(), error = %e, "write failed");
            break;
        }
    }
}

/// Wraps a codec failure so it can travel as a transport failure while
/// keeping the codec error as its cause.
pub(crate) fn codec_failure(err: tidewire_protocol::ProtocolError) -> TransportError {
    TransportError::ReceiveFailed(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err,
    ))
}
