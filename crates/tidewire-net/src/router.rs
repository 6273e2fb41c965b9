//! Packet routing: one handler per packet kind and role, plus the client
//! loading gate.
//!
//! The [`PacketRouter`] maps [`PacketKind`] values to boxed handlers,
//! separately for the client and server roles. Stream records never reach
//! a handler: they are consumed by a [`StreamReassembler`] and the
//! materialized packet is dispatched in their place.
//!
//! On the client, a packet that arrives before loading completes is
//! handled according to its priority:
//!
//! | Priority      | Not loaded                    |
//! |---------------|-------------------------------|
//! | `Important`   | handled immediately           |
//! | `Normal`      | queued until loading finishes |
//! | `Unimportant` | dropped                       |

use std::collections::HashMap;

use tidewire_protocol::{Packet, PacketBody, PacketKind};
use tidewire_transport::ConnectionId;

use crate::{NetContext, PendingQueue, StreamError, StreamReassembler};

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type ClientHandler = Box<dyn FnMut(Packet, &mut NetContext)>;
type ServerHandler = Box<dyn FnMut(ConnectionId, Packet, &mut NetContext)>;

/// What happened to a dispatched packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// Deferred until the client finishes loading.
    Queued,
    /// Discarded by the loading gate.
    Dropped,
    /// No handler is registered for this kind.
    Unhandled,
    /// A stream record was absorbed; the transfer is not complete yet.
    Buffered,
}

// ---------------------------------------------------------------------------
// PacketRouter
// ---------------------------------------------------------------------------

/// Routes packets to registered handlers.
pub struct PacketRouter {
    client_handlers: HashMap<PacketKind, ClientHandler>,
    server_handlers: HashMap<PacketKind, ServerHandler>,
    pending: PendingQueue,
    client_streams: StreamReassembler,
    server_streams: HashMap<ConnectionId, StreamReassembler>,
    max_stream_size: usize,
    unhandled: u64,
}

impl PacketRouter {
    /// Creates a router with no handlers.
    ///
    /// `max_stream_size` bounds every incoming stream transfer.
    pub fn new(max_stream_size: usize) -> Self {
        Self {
            client_handlers: HashMap::new(),
            server_handlers: HashMap::new(),
            pending: PendingQueue::new(),
            client_streams: StreamReassembler::new(max_stream_size),
            server_streams: HashMap::new(),
            max_stream_size,
            unhandled: 0,
        }
    }

    /// Registers the client-side handler for `kind`, replacing any
    /// previous one.
    pub fn handle_client(
        &mut self,
        kind: PacketKind,
        handler: impl FnMut(Packet, &mut NetContext) + 'static,
    ) {
        self.client_handlers.insert(kind, Box::new(handler));
    }

    /// Registers the server-side handler for `kind`, replacing any
    /// previous one.
    pub fn handle_server(
        &mut self,
        kind: PacketKind,
        handler: impl FnMut(ConnectionId, Packet, &mut NetContext) + 'static,
    ) {
        self.server_handlers.insert(kind, Box::new(handler));
    }

    /// Registers a client handler that receives the typed body.
    pub fn on_client<T: PacketBody + 'static>(
        &mut self,
        mut handler: impl FnMut(T, &mut NetContext) + 'static,
    ) {
        self.handle_client(T::KIND, move |packet, ctx| {
            if let Ok(body) = T::from_packet(packet) {
                handler(body, ctx);
            }
        });
    }

    /// Registers a server handler that receives the typed body.
    pub fn on_server<T: PacketBody + 'static>(
        &mut self,
        mut handler: impl FnMut(ConnectionId, T, &mut NetContext) + 'static,
    ) {
        self.handle_server(T::KIND, move |connection, packet, ctx| {
            if let Ok(body) = T::from_packet(packet) {
                handler(connection, body, ctx);
            }
        });
    }

    pub fn has_client_handler(&self, kind: PacketKind) -> bool {
        self.client_handlers.contains_key(&kind)
    }

    pub fn has_server_handler(&self, kind: PacketKind) -> bool {
        self.server_handlers.contains_key(&kind)
    }

    // -----------------------------------------------------------------------
    // Client side
    // -----------------------------------------------------------------------

    /// Routes a packet received from the server.
    ///
    /// # Errors
    /// Returns a [`StreamError`] when a stream record breaks the protocol.
    /// The caller should stop processing this peer.
    pub fn dispatch_client(
        &mut self,
        packet: Packet,
        loaded: bool,
        ctx: &mut NetContext,
    ) -> Result<Dispatch, StreamError> {
        let complete = match packet {
            Packet::StreamBegin(begin) => self.client_streams.begin(begin)?,
            Packet::StreamChunk(chunk) => self.client_streams.chunk(chunk)?,
            packet => return Ok(self.deliver_client(packet, loaded, ctx)),
        };
        match complete {
            Some(packet) => self.dispatch_client(packet, loaded, ctx),
            None => Ok(Dispatch::Buffered),
        }
    }

    fn deliver_client(
        &mut self,
        packet: Packet,
        loaded: bool,
        ctx: &mut NetContext,
    ) -> Dispatch {
        let kind = packet.kind();
        let Some(handler) = self.client_handlers.get_mut(&kind) else {
            self.unhandled += 1;
            tracing::warn!(%kind, "unhandled client packet");
            return Dispatch::Unhandled;
        };

        if loaded || packet.is_important() {
            handler(packet, ctx);
            Dispatch::Handled
        } else if !packet.is_unimportant() {
            tracing::trace!(%kind, "client not loaded, deferring packet");
            self.pending.push(packet);
            Dispatch::Queued
        } else {
            tracing::trace!(%kind, "client not loaded, dropping packet");
            Dispatch::Dropped
        }
    }

    /// Hands every deferred packet to its handler, in arrival order, and
    /// empties the queue. Returns how many packets were delivered.
    pub fn drain_pending(&mut self, ctx: &mut NetContext) -> usize {
        let queued = self.pending.take();
        let count = queued.len();
        for packet in queued {
            self.deliver_client(packet, true, ctx);
        }
        count
    }

    /// Discards every deferred packet.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Open client-side stream transfers.
    pub fn client_streams(&self) -> &StreamReassembler {
        &self.client_streams
    }

    pub fn clear_client_streams(&mut self) {
        self.client_streams.clear();
    }

    // -----------------------------------------------------------------------
    // Server side
    // -----------------------------------------------------------------------

    /// Routes a packet received from `connection`.
    ///
    /// Server-side dispatch has no loading gate. Stream transfers are
    /// tracked per connection and dropped when that connection
    /// disconnects.
    ///
    /// # Errors
    /// Returns a [`StreamError`] when a stream record breaks the protocol.
    pub fn dispatch_server(
        &mut self,
        connection: ConnectionId,
        packet: Packet,
        ctx: &mut NetContext,
    ) -> Result<Dispatch, StreamError> {
        let complete = match packet {
            Packet::StreamBegin(begin) => {
                self.connection_streams(connection).begin(begin)?
            }
            Packet::StreamChunk(chunk) => {
                self.connection_streams(connection).chunk(chunk)?
            }
            packet => return Ok(self.deliver_server(connection, packet, ctx)),
        };
        match complete {
            Some(packet) => self.dispatch_server(connection, packet, ctx),
            None => Ok(Dispatch::Buffered),
        }
    }

    fn deliver_server(
        &mut self,
        connection: ConnectionId,
        packet: Packet,
        ctx: &mut NetContext,
    ) -> Dispatch {
        if matches!(packet, Packet::Disconnect(_)) {
            self.drop_connection_streams(connection);
        }

        let kind = packet.kind();
        match self.server_handlers.get_mut(&kind) {
            Some(handler) => {
                handler(connection, packet, ctx);
                Dispatch::Handled
            }
            None => {
                self.unhandled += 1;
                tracing::warn!(%kind, %connection, "unhandled server packet");
                Dispatch::Unhandled
            }
        }
    }

    fn connection_streams(
        &mut self,
        connection: ConnectionId,
    ) -> &mut StreamReassembler {
        let max = self.max_stream_size;
        self.server_streams
            .entry(connection)
            .or_insert_with(|| StreamReassembler::new(max))
    }

    /// Drops the open transfers of one connection.
    pub fn drop_connection_streams(&mut self, connection: ConnectionId) {
        self.server_streams.remove(&connection);
    }

    /// Drops the open transfers of every connection.
    pub fn clear_server_streams(&mut self) {
        self.server_streams.clear();
    }

    /// Packets that arrived with no handler registered, since creation.
    pub fn unhandled_count(&self) -> u64 {
        self.unhandled
    }
}

impl std::fmt::Debug for PacketRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRouter")
            .field("client_handlers", &self.client_handlers.len())
            .field("server_handlers", &self.server_handlers.len())
            .field("pending", &self.pending.len())
            .field("unhandled", &self.unhandled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tidewire_protocol::{
        Disconnect, Invoke, Kick, KickReason, Snapshot, StreamBegin,
        StreamChunk, WorldStream,
    };

    use super::*;

    const MAX: usize = 1 << 20;

    fn invoke(method: u16) -> Packet {
        Invoke {
            method,
            payload: vec![],
        }
        .into()
    }

    fn snapshot() -> Packet {
        Snapshot {
            tick: 1,
            size: 0,
            data: vec![],
        }
        .into()
    }

    fn kick() -> Packet {
        Kick {
            reason: KickReason::Kick,
        }
        .into()
    }

    /// A router whose client handlers log every packet they see.
    fn recording_router() -> (PacketRouter, Rc<RefCell<Vec<Packet>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut router = PacketRouter::new(MAX);
        for kind in [
            PacketKind::Invoke,
            PacketKind::Snapshot,
            PacketKind::Kick,
            PacketKind::WorldStream,
        ] {
            let seen = seen.clone();
            router.handle_client(kind, move |packet, _| {
                seen.borrow_mut().push(packet);
            });
        }
        (router, seen)
    }

    #[test]
    fn test_loaded_client_handles_everything() {
        let (mut router, seen) = recording_router();
        let mut ctx = NetContext::new();
        for packet in [invoke(1), snapshot(), kick()] {
            let outcome = router.dispatch_client(packet, true, &mut ctx).unwrap();
            assert_eq!(outcome, Dispatch::Handled);
        }
        assert_eq!(*seen.borrow(), vec![invoke(1), snapshot(), kick()]);
    }

    #[test]
    fn test_loading_gate() {
        let (mut router, seen) = recording_router();
        let mut ctx = NetContext::new();

        assert_eq!(
            router.dispatch_client(invoke(1), false, &mut ctx).unwrap(),
            Dispatch::Queued
        );
        assert_eq!(
            router.dispatch_client(snapshot(), false, &mut ctx).unwrap(),
            Dispatch::Dropped
        );
        assert_eq!(
            router.dispatch_client(kick(), false, &mut ctx).unwrap(),
            Dispatch::Handled
        );

        assert_eq!(*seen.borrow(), vec![kick()]);
        assert_eq!(router.pending().len(), 1);
    }

    #[test]
    fn test_drain_pending_delivers_in_order() {
        let (mut router, seen) = recording_router();
        let mut ctx = NetContext::new();
        for method in 1..=3 {
            router.dispatch_client(invoke(method), false, &mut ctx).unwrap();
        }

        assert_eq!(router.drain_pending(&mut ctx), 3);
        assert_eq!(*seen.borrow(), vec![invoke(1), invoke(2), invoke(3)]);
        assert!(router.pending().is_empty());
    }

    #[test]
    fn test_unhandled_packet_is_counted() {
        let mut router = PacketRouter::new(MAX);
        let mut ctx = NetContext::new();
        let outcome = router.dispatch_client(invoke(1), false, &mut ctx).unwrap();
        assert_eq!(outcome, Dispatch::Unhandled);
        assert_eq!(router.unhandled_count(), 1);
        assert!(router.pending().is_empty(), "unhandled packets are not queued");
    }

    #[test]
    fn test_stream_materializes_before_loading() {
        let (mut router, seen) = recording_router();
        let mut ctx = NetContext::new();
        let begin = StreamBegin {
            id: 8,
            total: 3,
            kind: PacketKind::WorldStream,
        };
        assert_eq!(
            router.dispatch_client(begin.into(), false, &mut ctx).unwrap(),
            Dispatch::Buffered
        );
        let chunk = StreamChunk {
            id: 8,
            data: vec![1, 2, 3],
        };
        assert_eq!(
            router.dispatch_client(chunk.into(), false, &mut ctx).unwrap(),
            Dispatch::Handled
        );
        assert_eq!(
            *seen.borrow(),
            vec![Packet::from(WorldStream {
                data: vec![1, 2, 3]
            })]
        );
    }

    #[test]
    fn test_typed_handler_receives_body() {
        let reasons = Rc::new(RefCell::new(Vec::new()));
        let mut router = PacketRouter::new(MAX);
        let sink = reasons.clone();
        router.on_client::<Kick>(move |kick, _| sink.borrow_mut().push(kick.reason));

        let mut ctx = NetContext::new();
        router.dispatch_client(kick(), false, &mut ctx).unwrap();
        assert_eq!(*reasons.borrow(), vec![KickReason::Kick]);
        assert!(router.has_client_handler(PacketKind::Kick));
    }

    #[test]
    fn test_server_dispatch_ignores_loading() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut router = PacketRouter::new(MAX);
        let sink = seen.clone();
        router.handle_server(PacketKind::Snapshot, move |conn, packet, _| {
            sink.borrow_mut().push((conn, packet));
        });

        let mut ctx = NetContext::new();
        let conn = ConnectionId::new(3);
        let outcome = router.dispatch_server(conn, snapshot(), &mut ctx).unwrap();
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(*seen.borrow(), vec![(conn, snapshot())]);
    }

    #[test]
    fn test_server_streams_are_per_connection() {
        let mut router = PacketRouter::new(MAX);
        router.handle_server(PacketKind::WorldStream, |_, _, _| {});
        let mut ctx = NetContext::new();
        let a = ConnectionId::new(1);
        let b = ConnectionId::new(2);
        let begin = StreamBegin {
            id: 1,
            total: 2,
            kind: PacketKind::WorldStream,
        };
        router.dispatch_server(a, begin.into(), &mut ctx).unwrap();

        let chunk = StreamChunk {
            id: 1,
            data: vec![0, 0],
        };
        let err = router.dispatch_server(b, chunk.clone().into(), &mut ctx);
        assert!(matches!(err, Err(StreamError::ChunkWithoutBegin(1))));
        assert_eq!(
            router.dispatch_server(a, chunk.into(), &mut ctx).unwrap(),
            Dispatch::Handled
        );
    }

    #[test]
    fn test_disconnect_drops_connection_streams() {
        let mut router = PacketRouter::new(MAX);
        let mut ctx = NetContext::new();
        let conn = ConnectionId::new(1);
        let begin = StreamBegin {
            id: 1,
            total: 2,
            kind: PacketKind::WorldStream,
        };
        router.dispatch_server(conn, begin.into(), &mut ctx).unwrap();
        router
            .dispatch_server(conn, Disconnect::default().into(), &mut ctx)
            .unwrap();

        let chunk = StreamChunk {
            id: 1,
            data: vec![0],
        };
        let err = router.dispatch_server(conn, chunk.into(), &mut ctx);
        assert!(matches!(err, Err(StreamError::ChunkWithoutBegin(1))));
    }
}
