//! Error type for the dispatch core.

use tidewire_protocol::ProtocolError;
use tidewire_transport::TransportError;

use crate::StreamError;

/// Errors returned by [`NetworkCore`](crate::NetworkCore) operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// `connect` was called while a session is already active.
    /// The existing session is left untouched.
    #[error("already connected")]
    AlreadyConnected,

    /// A client operation was requested but no client provider is set.
    #[error("no client provider installed")]
    NoClientProvider,

    /// A server operation was requested but no server provider is set.
    #[error("no server provider installed")]
    NoServerProvider,

    /// A transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A stream transfer broke the protocol.
    #[error(transparent)]
    Stream(#[from] StreamError),
}
