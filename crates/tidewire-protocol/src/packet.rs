//! The closed set of packets that travel between client and server.
//!
//! Every wire message is one variant of [`Packet`]. Each variant has a
//! matching [`PacketKind`] tag, used as the routing key, and a static
//! [`Priority`] that decides how a client treats it before it has
//! finished loading.
//!
//! Packet bodies are plain structs. Simulation code registers handlers
//! per body type through the [`PacketBody`] trait, so a handler receives
//! `Kick` rather than a `Packet` it would have to match on again.

use serde::{Deserialize, Serialize};

use crate::{KickReason, ProtocolError};

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// How a not-yet-loaded client treats a packet.
///
/// A packet is at most one of important or unimportant; having a single
/// enum makes the third combination unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Delivered immediately, even while loading.
    Important,
    /// Deferred until loading completes.
    Normal,
    /// Silently dropped while loading.
    Unimportant,
}

// ---------------------------------------------------------------------------
// Packet bodies
// ---------------------------------------------------------------------------

/// Raised by a transport when a peer connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connect {
    /// Remote address of the peer.
    pub address: String,
}

/// Raised by a transport when a peer goes away.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Disconnect {
    /// Why the peer left, when known.
    pub reason: Option<String>,
}

/// First packet a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Client's protocol version.
    pub version: u32,
    /// Display name.
    pub name: String,
    /// Stable client identifier.
    pub uuid: String,
}

/// Server tells a client it is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kick {
    /// Why.
    pub reason: KickReason,
}

/// Serialized world state, normally delivered as a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorldStream {
    /// Raw world bytes.
    pub data: Vec<u8>,
}

/// Compressed entity snapshot. Stale as soon as the next one arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulation tick the snapshot was taken at.
    pub tick: u64,
    /// Uncompressed length of `data`.
    pub size: u32,
    /// Compressed snapshot bytes.
    pub data: Vec<u8>,
}

/// A remote call into the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoke {
    /// Simulation-defined method id.
    pub method: u16,
    /// Encoded arguments.
    pub payload: Vec<u8>,
}

/// Opens a stream transfer of `total` bytes that materializes as `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBegin {
    /// Transfer id shared by every chunk of this stream.
    pub id: u32,
    /// Total payload length in bytes.
    pub total: u32,
    /// Packet kind the payload becomes once complete.
    pub kind: PacketKind,
}

/// One slice of a stream transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Transfer id from the matching [`StreamBegin`].
    pub id: u32,
    /// Bytes of this slice.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Packet / PacketKind
// ---------------------------------------------------------------------------

/// A packet body that can be registered for and extracted from a [`Packet`].
pub trait PacketBody: Sized + Into<Packet> {
    /// The routing tag of this body type.
    const KIND: PacketKind;

    /// Extracts the body, handing the packet back if it is another kind.
    fn from_packet(packet: Packet) -> Result<Self, Packet>;
}

macro_rules! packets {
    ($( $(#[$doc:meta])* $name:ident => $priority:ident ),* $(,)?) => {
        /// Every message that can travel on the wire.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum Packet {
            $( $(#[$doc])* $name($name), )*
        }

        /// Routing tag for a [`Packet`] variant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum PacketKind {
            $( $(#[$doc])* $name, )*
        }

        impl Packet {
            /// The routing tag of this packet.
            pub fn kind(&self) -> PacketKind {
                match self {
                    $( Packet::$name(_) => PacketKind::$name, )*
                }
            }
        }

        impl PacketKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [PacketKind] = &[$( PacketKind::$name ),*];

            /// The loading-gate priority of this kind.
            pub const fn priority(self) -> Priority {
                match self {
                    $( PacketKind::$name => Priority::$priority, )*
                }
            }
        }

        $(
            impl From<$name> for Packet {
                fn from(body: $name) -> Self {
                    Packet::$name(body)
                }
            }

            impl PacketBody for $name {
                const KIND: PacketKind = PacketKind::$name;

                fn from_packet(packet: Packet) -> Result<Self, Packet> {
                    match packet {
                        Packet::$name(body) => Ok(body),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

packets! {
    /// Peer connected.
    Connect => Important,
    /// Peer disconnected.
    Disconnect => Important,
    /// Client hello.
    Handshake => Normal,
    /// Removal notice.
    Kick => Important,
    /// World payload.
    WorldStream => Important,
    /// Entity snapshot.
    Snapshot => Unimportant,
    /// Remote call.
    Invoke => Normal,
    /// Stream header.
    StreamBegin => Important,
    /// Stream slice.
    StreamChunk => Important,
}

impl Packet {
    /// The loading-gate priority of this packet.
    pub fn priority(&self) -> Priority {
        self.kind().priority()
    }

    /// Delivered even before the client has loaded.
    pub fn is_important(&self) -> bool {
        self.priority() == Priority::Important
    }

    /// Discarded if it arrives before the client has loaded.
    pub fn is_unimportant(&self) -> bool {
        self.priority() == Priority::Unimportant
    }

    /// Whether this is a stream record that reassembly consumes.
    pub fn is_stream_record(&self) -> bool {
        matches!(self, Packet::StreamBegin(_) | Packet::StreamChunk(_))
    }

    /// Materializes a completed stream payload as a packet of `kind`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::NotStreamable`] if `kind` cannot be sent
    /// as a stream.
    pub fn from_stream(
        kind: PacketKind,
        data: Vec<u8>,
    ) -> Result<Packet, ProtocolError> {
        match kind {
            PacketKind::WorldStream => Ok(WorldStream { data }.into()),
            other => Err(ProtocolError::NotStreamable(other)),
        }
    }
}

impl PacketKind {
    /// Whether a stream transfer may materialize as this kind.
    pub fn is_streamable(self) -> bool {
        matches!(self, PacketKind::WorldStream)
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A body that is sent to a single peer as a stream transfer.
pub trait Streamable: PacketBody {
    /// The bytes that travel in the stream's chunks.
    fn stream_bytes(&self) -> &[u8];
}

impl Streamable for WorldStream {
    fn stream_bytes(&self) -> &[u8] {
        &self.data
    }
}
