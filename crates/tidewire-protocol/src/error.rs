//! Error types for the protocol layer.
//!
//! Each crate in Tidewire defines its own error enum. A `ProtocolError`
//! means the problem is in turning packets into bytes or back, not in
//! networking or dispatch.

use crate::PacketKind;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed input, missing fields, or
    /// truncated bytes.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// A stream transfer named a kind that cannot be streamed.
    #[error("packet kind {0} cannot be sent as a stream")]
    NotStreamable(PacketKind),

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Whether decoding ran out of input before the value was complete.
    pub fn is_truncated(&self) -> bool {
        match self {
            #[cfg(feature = "json")]
            Self::Decode(e) => e.is_eof(),
            _ => false,
        }
    }
}
