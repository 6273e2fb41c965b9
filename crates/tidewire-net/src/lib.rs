//! Network dispatch core for Tidewire.
//!
//! This crate sits between a transport provider, which turns bytes into
//! [`Packet`]s, and the simulation, which registers handlers for them.
//! It owns:
//!
//! - **Session state** ([`Session`]): whether networking is active and
//!   in which [`Role`], and whether the client has finished loading.
//! - **Routing** ([`PacketRouter`]): one handler per [`PacketKind`] and
//!   role, with the client loading gate and its [`PendingQueue`].
//! - **Stream reassembly** ([`StreamReassembler`]): turns a
//!   `StreamBegin` and its chunks back into one packet.
//! - **Failure classification** ([`classify`]): maps raw transport
//!   errors onto a closed set of [`FailureKind`]s.
//! - **Provider contracts** ([`ClientProvider`], [`ServerProvider`],
//!   [`NetConnection`]) and an in-process [`loopback`] implementation.
//!
//! [`NetworkCore`] ties these together and is driven from the
//! simulation's tick thread by calling [`NetworkCore::update`].
//!
//! ```text
//! Provider (Packet) → NetworkCore → PacketRouter → handler(Packet, NetContext)
//!                          ↑                                  │
//!                          └──────── NetContext actions ──────┘
//! ```

mod config;
mod context;
mod error;
mod failure;
pub mod loopback;
mod network;
mod provider;
mod queue;
mod router;
mod session;
mod stream;

pub use config::NetConfig;
pub use context::{Action, NetContext};
pub use error::NetError;
pub use failure::{Failure, FailureKind, classify, describe};
pub use network::{ConnectCallback, NetworkCore};
pub use provider::{
    ClientEvent, ClientProvider, DoneCallback, HostCallback, NetConnection,
    PingFailure, PingSuccess, ServerEvent, ServerProvider,
};
pub use queue::PendingQueue;
pub use router::{Dispatch, PacketRouter};
pub use session::{Role, Session};
pub use stream::{StreamError, StreamReassembler, StreamTransfer, chunk_stream};

pub use tidewire_protocol::{Packet, PacketBody, PacketKind};
pub use tidewire_transport::{ConnectionId, DeliveryMode, TransportError};
