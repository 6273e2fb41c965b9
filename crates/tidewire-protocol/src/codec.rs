//! Codec trait and implementations for serializing/deserializing packets.
//!
//! The protocol layer does not care how packets are serialized; it only
//! needs something that implements [`Codec`]. [`JsonCodec`] is the
//! reference implementation: readable on the wire and in logs.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec is shared by every connection
/// task of a provider.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use tidewire_protocol::{Codec, JsonCodec, Kick, KickReason, Packet};
///
/// let codec = JsonCodec;
/// let packet: Packet = Kick { reason: KickReason::ServerClose }.into();
///
/// let bytes = codec.encode(&packet).unwrap();
/// let decoded: Packet = codec.decode(&bytes).unwrap();
/// assert_eq!(packet, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Packet, PacketKind, StreamBegin};

    #[test]
    fn test_packet_json_is_externally_tagged() {
        let packet: Packet = StreamBegin {
            id: 4,
            total: 1024,
            kind: PacketKind::WorldStream,
        }
        .into();
        let json = String::from_utf8(JsonCodec.encode(&packet).unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"StreamBegin":{"id":4,"total":1024,"kind":"WorldStream"}}"#
        );
    }

    #[test]
    fn test_decode_garbage_returns_error() {
        let result: Result<Packet, _> = JsonCodec.decode(b"not json at all");
        let err = result.unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(!err.is_truncated());
    }

    #[test]
    fn test_truncated_input_is_reported() {
        let result: Result<Packet, _> = JsonCodec.decode(br#"{"Kick":{"reas"#);
        assert!(result.unwrap_err().is_truncated());
    }

    #[test]
    fn test_decode_unknown_variant_returns_error() {
        let result: Result<Packet, _> = JsonCodec.decode(br#"{"Teleport":{}}"#);
        assert!(result.is_err());
    }
}
