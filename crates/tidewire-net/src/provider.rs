//! Contracts between the dispatch core and a concrete transport.
//!
//! A provider owns sockets and threads; the core owns state and
//! handlers. Providers never call handlers themselves. Anything they
//! receive on a network thread is queued and handed over when the core
//! calls [`ClientProvider::poll_events`] or
//! [`ServerProvider::poll_events`] from the tick thread.

use tidewire_protocol::{Host, Packet, PacketKind};
use tidewire_transport::{ConnectionId, DeliveryMode, TransportError};

use crate::{StreamError, chunk_stream};

/// Called once for each host found by discovery.
pub type HostCallback = Box<dyn FnMut(Host) + Send>;
/// Called once when discovery has finished.
pub type DoneCallback = Box<dyn FnOnce() + Send>;
/// Called with the host's reply to a ping.
pub type PingSuccess = Box<dyn FnOnce(Host) + Send>;
/// Called when a ping fails.
pub type PingFailure = Box<dyn FnOnce(TransportError) + Send>;

/// Something that happened on the client transport.
#[derive(Debug)]
pub enum ClientEvent {
    /// The connection to the server is established.
    Connected,
    /// A packet arrived. Transport connect/disconnect is reported as
    /// `Connect`/`Disconnect` packets.
    Received(Packet),
    /// The connection failed or broke.
    Failed(TransportError),
}

/// Something that happened on the server transport.
#[derive(Debug)]
pub enum ServerEvent {
    /// A packet arrived from a connection.
    Received(ConnectionId, Packet),
    /// The server transport failed outside any one connection.
    Failed(TransportError),
}

/// The client half of a transport.
pub trait ClientProvider {
    /// Starts connecting to `address:port`.
    ///
    /// May complete in the background, reporting
    /// [`ClientEvent::Connected`] or [`ClientEvent::Failed`] later.
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError>;

    /// Sends a packet to the server.
    fn send(&mut self, packet: &Packet, mode: DeliveryMode);

    /// Round trip to the server in milliseconds.
    fn ping(&self) -> u32;

    /// Requests a fresh round-trip measurement.
    fn update_ping(&mut self);

    /// Closes the connection.
    fn disconnect(&mut self);

    /// Searches the local network for servers. `on_done` is always
    /// called exactly once.
    fn discover(&mut self, on_found: HostCallback, on_done: DoneCallback);

    /// Asks one server for its host info.
    fn ping_host(
        &mut self,
        address: &str,
        port: u16,
        on_success: PingSuccess,
        on_failure: PingFailure,
    );

    /// Releases every resource held by the provider.
    fn dispose(&mut self);

    /// Events received since the last call, oldest first.
    fn poll_events(&mut self) -> Vec<ClientEvent>;

    /// Decompresses a snapshot whose uncompressed length is `size`.
    fn decompress_snapshot(
        &self,
        input: &[u8],
        size: usize,
    ) -> Result<Vec<u8>, TransportError> {
        tidewire_transport::decompress_snapshot(input, size)
    }
}

/// One client as seen from the server.
pub trait NetConnection {
    fn id(&self) -> ConnectionId;

    /// Remote address of the client.
    fn address(&self) -> &str;

    fn send(&self, packet: &Packet, mode: DeliveryMode);

    /// Closes the connection. A `Disconnect` packet follows through
    /// [`ServerProvider::poll_events`].
    fn close(&self);
}

/// The server half of a transport.
pub trait ServerProvider {
    /// Starts listening on `port`.
    fn host(&mut self, port: u16) -> Result<(), TransportError>;

    /// Stops listening and drops every connection.
    fn close(&mut self);

    /// Every live connection.
    fn connections(&self) -> Vec<&dyn NetConnection>;

    fn connection(&self, id: ConnectionId) -> Option<&dyn NetConnection> {
        self.connections().into_iter().find(|c| c.id() == id)
    }

    /// Events received since the last call, oldest first.
    fn poll_events(&mut self) -> Vec<ServerEvent>;

    fn compress_snapshot(&self, input: &[u8]) -> Vec<u8> {
        tidewire_transport::compress_snapshot(input)
    }

    /// Sends to every connection.
    fn send(&self, packet: &Packet, mode: DeliveryMode) {
        for connection in self.connections() {
            connection.send(packet, mode);
        }
    }

    /// Sends to one connection.
    fn send_to(&self, id: ConnectionId, packet: &Packet, mode: DeliveryMode) {
        match self.connection(id) {
            Some(connection) => connection.send(packet, mode),
            None => tracing::error!(%id, kind = %packet.kind(), "no connection to send to"),
        }
    }

    /// Sends to every connection except `id`.
    fn send_except(&self, id: ConnectionId, packet: &Packet, mode: DeliveryMode) {
        for connection in self.connections() {
            if connection.id() != id {
                connection.send(packet, mode);
            }
        }
    }

    /// Sends `data` to one connection as a stream transfer that
    /// materializes as `kind`. All records go over the reliable channel.
    /// A missing connection is skipped.
    fn send_stream(
        &self,
        id: ConnectionId,
        kind: PacketKind,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<(), StreamError> {
        let Some(connection) = self.connection(id) else {
            tracing::debug!(%id, "stream target has disconnected");
            return Ok(());
        };
        for record in chunk_stream(kind, data, chunk_size)? {
            connection.send(&record, DeliveryMode::Reliable);
        }
        Ok(())
    }
}
