//! Unified error type for Tidewire.

use tidewire_net::NetError;
use tidewire_protocol::ProtocolError;
use tidewire_transport::TransportError;

/// Top-level error that wraps the errors of every Tidewire crate.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TidewireError {
    /// A transport-level error (bind, connect, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A dispatch-core error (session misuse, stream violation).
    #[error(transparent)]
    Net(#[from] NetError),

    /// No Tokio runtime was given and none is running.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
