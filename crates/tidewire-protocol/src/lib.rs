//! Wire protocol for Tidewire.
//!
//! This crate defines what clients and servers say to each other:
//!
//! - **Packets** ([`Packet`], [`PacketKind`], [`Priority`]): the closed
//!   set of messages, each with a routing tag and a loading-gate priority.
//! - **Stream records** ([`StreamBegin`], [`StreamChunk`]): how payloads
//!   too large for one frame are split.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how packets become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Net core (routing, gating)
//! ```

mod codec;
mod error;
mod packet;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packet::{
    Connect, Disconnect, Handshake, Invoke, Kick, Packet, PacketBody,
    PacketKind, Priority, Snapshot, StreamBegin, StreamChunk, Streamable,
    WorldStream,
};
pub use types::{Host, KickReason};

/// The current protocol version. Peers on another version are refused.
pub const PROTOCOL_VERSION: u32 = 1;
