//! # Tidewire
//!
//! Network packet dispatch and stream reassembly for multiplayer game
//! simulations.
//!
//! The simulation owns a [`NetworkCore`](tidewire_net::NetworkCore),
//! registers one handler per packet kind, and calls `update()` once per
//! tick. This crate adds WebSocket providers for the core
//! ([`WsClient`], [`WsServer`]), a [`NetworkBuilder`] that wires them up,
//! and [`init_logging`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tidewire::prelude::*;
//!
//! # async fn run() -> Result<(), TidewireError> {
//! let mut net = NetworkBuilder::new().build()?;
//!
//! net.on_client::<Kick>(|kick, _| {
//!     tracing::warn!(reason = kick.reason.message_key(), "kicked");
//! });
//! net.connect("127.0.0.1", 6567, |_| tracing::info!("joined"))?;
//!
//! loop {
//!     for failure in net.update() {
//!         tracing::error!(kind = failure.kind.message_key(), "{}", failure.detail);
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(16)).await;
//! }
//! # }
//! ```

mod builder;
mod client;
mod config;
mod error;
mod logging;
mod server;
mod wire;

pub use builder::NetworkBuilder;
pub use client::WsClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::TidewireError;
pub use logging::init_logging;
pub use server::{WsConnection, WsServer};
pub use wire::{Frame, subprotocol};

pub use tidewire_net as net;
pub use tidewire_protocol as protocol;
pub use tidewire_transport as transport;

/// Common imports for simulation code.
pub mod prelude {
    pub use crate::{
        ClientConfig, NetworkBuilder, ServerConfig, TidewireError, WsClient,
        WsServer, init_logging,
    };
    pub use tidewire_net::{
        Dispatch, Failure, FailureKind, NetConfig, NetConnection, NetContext,
        NetError, NetworkCore,
    };
    pub use tidewire_protocol::{
        Connect, Disconnect, Handshake, Host, Invoke, Kick, KickReason,
        Packet, PacketBody, PacketKind, Snapshot, WorldStream,
    };
    pub use tidewire_transport::{ConnectionId, DeliveryMode};
}
