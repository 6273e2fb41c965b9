//! The handle a packet handler uses to act on the network.
//!
//! Handlers run while the router is borrowed, so they cannot call back
//! into [`NetworkCore`](crate::NetworkCore) directly. Instead they record
//! [`Action`]s on a [`NetContext`]; the core applies them, in order, once
//! the handler returns.

use tidewire_protocol::{KickReason, Packet, PacketKind, Streamable};
use tidewire_transport::{ConnectionId, DeliveryMode};

/// Something a handler asked the network to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send to the server (as client) or to every connection (as server).
    Send { packet: Packet, mode: DeliveryMode },
    /// Send to one connection.
    SendTo {
        connection: ConnectionId,
        packet: Packet,
        mode: DeliveryMode,
    },
    /// Send to every connection except one.
    SendExcept {
        connection: ConnectionId,
        packet: Packet,
        mode: DeliveryMode,
    },
    /// Stream a payload to one connection.
    SendStream {
        connection: ConnectionId,
        kind: PacketKind,
        data: Vec<u8>,
    },
    /// Send a kick notice and close the connection.
    Kick {
        connection: ConnectionId,
        reason: KickReason,
    },
    /// Mark the client as loaded (draining deferred packets) or not.
    SetClientLoaded(bool),
    /// Leave the client session.
    Disconnect,
}

/// Outbox of [`Action`]s filled by handlers.
#[derive(Debug, Default)]
pub struct NetContext {
    actions: Vec<Action>,
}

impl NetContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, packet: impl Into<Packet>, mode: DeliveryMode) {
        self.actions.push(Action::Send {
            packet: packet.into(),
            mode,
        });
    }

    pub fn send_to(
        &mut self,
        connection: ConnectionId,
        packet: impl Into<Packet>,
        mode: DeliveryMode,
    ) {
        self.actions.push(Action::SendTo {
            connection,
            packet: packet.into(),
            mode,
        });
    }

    pub fn send_except(
        &mut self,
        connection: ConnectionId,
        packet: impl Into<Packet>,
        mode: DeliveryMode,
    ) {
        self.actions.push(Action::SendExcept {
            connection,
            packet: packet.into(),
            mode,
        });
    }

    /// Streams `body` to `connection` as a chunked transfer.
    pub fn send_stream<T: Streamable>(&mut self, connection: ConnectionId, body: &T) {
        self.actions.push(Action::SendStream {
            connection,
            kind: T::KIND,
            data: body.stream_bytes().to_vec(),
        });
    }

    pub fn kick(&mut self, connection: ConnectionId, reason: KickReason) {
        self.actions.push(Action::Kick { connection, reason });
    }

    pub fn set_client_loaded(&mut self, loaded: bool) {
        self.actions.push(Action::SetClientLoaded(loaded));
    }

    pub fn disconnect(&mut self) {
        self.actions.push(Action::Disconnect);
    }

    /// Actions recorded so far.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Removes and returns the recorded actions.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
