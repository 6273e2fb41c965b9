//! [`WsServer`]: the server provider backed by a WebSocket listener.
//!
//! One accept task hands every socket to its own connection task. The
//! connection task finishes the upgrade, then reads the peer's first
//! frame:
//!   1. `HostQuery` → answer with `HostInfo` and close
//!   2. `Hello` → register the peer and start its writer task
//!   3. Loop: decode frames → queue packets for the tick thread
//!
//! Registration, packets, and departures travel to the tick thread over
//! one channel and come out of [`ServerProvider::poll_events`] as
//! `Connect`, the packet itself, and `Disconnect`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tidewire_net::{NetConnection, ServerEvent, ServerProvider};
use tidewire_protocol::{
    Codec, Connect, Disconnect, Host, JsonCodec, PROTOCOL_VERSION, Packet,
};
use tidewire_transport::{
    Connection, ConnectionId, DeliveryMode, Handshake, Listener,
    PendingUpgrade, TransportError, WebSocketConnection, WebSocketListener,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ServerConfig;
use crate::wire::{self, Frame, Outbound};

// ---------------------------------------------------------------------------
// WsConnection
// ---------------------------------------------------------------------------

/// A registered peer of a [`WsServer`].
pub struct WsConnection<C: Codec + Clone = JsonCodec> {
    id: ConnectionId,
    address: String,
    codec: C,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl<C: Codec + Clone> WsConnection<C> {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl<C: Codec + Clone> NetConnection for WsConnection<C> {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn send(&self, packet: &Packet, mode: DeliveryMode) {
        if self.is_closed() {
            return;
        }
        tracing::trace!(id = %self.id, kind = %packet.kind(), %mode, "sending");
        wire::queue_packet(&self.codec, &self.outbound, packet);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

enum ServerMsg<C: Codec + Clone> {
    Joined(WsConnection<C>),
    Received(ConnectionId, Packet),
    Left(ConnectionId),
    Failed(TransportError),
}

/// State shared by the accept task and every connection task of one
/// hosting session.
struct Shared<C: Codec + Clone> {
    generation: u64,
    name: String,
    port: u16,
    codec: C,
    handshake_timeout: Duration,
    players: AtomicU32,
    events: mpsc::UnboundedSender<(u64, ServerMsg<C>)>,
}

impl<C: Codec + Clone> Shared<C> {
    fn report(&self, msg: ServerMsg<C>) {
        let _ = self.events.send((self.generation, msg));
    }

    fn host_info(&self) -> Host {
        Host {
            name: self.name.clone(),
            address: String::new(),
            port: self.port,
            players: self.players.load(Ordering::Relaxed),
            version: PROTOCOL_VERSION,
            ping: 0,
        }
    }
}

async fn accept_loop<C: Codec + Clone>(
    mut listener: WebSocketListener,
    shared: Arc<Shared<C>>,
) {
    loop {
        match listener.accept().await {
            Ok(pending) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(pending, shared).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                shared.report(ServerMsg::Failed(e));
            }
        }
    }
}

/// Handles a single socket from upgrade to close.
async fn handle_connection<C: Codec + Clone>(
    pending: PendingUpgrade,
    shared: Arc<Shared<C>>,
) -> Result<(), TransportError> {
    let address = pending.peer_addr().to_string();

    // --- Step 1: Upgrade ---
    let conn = Arc::new(pending.complete().await?);
    let id = conn.id();

    // --- Step 2: First frame ---
    let first = match tokio::time::timeout(shared.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(bytes))) => shared
            .codec
            .decode::<Frame>(&bytes)
            .map_err(wire::codec_failure)?,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            let _ = conn.close().await;
            return Err(TransportError::TimedOut);
        }
    };
    match first {
        Frame::HostQuery => return answer_query(&conn, &shared).await,
        Frame::Hello => {}
        other => {
            tracing::debug!(%id, ?other, "expected Hello, closing");
            let _ = conn.close().await;
            return Ok(());
        }
    }

    // --- Step 3: Register ---
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    shared.players.fetch_add(1, Ordering::Relaxed);
    shared.report(ServerMsg::Joined(WsConnection {
        id,
        address: address.clone(),
        codec: shared.codec.clone(),
        outbound,
        closed: AtomicBool::new(false),
    }));
    tracing::info!(%id, %address, "peer joined");
    let writer = tokio::spawn(wire::write_loop(Arc::clone(&conn), outbound_rx));

    // --- Step 4: Read until closed ---
    let result = loop {
        match conn.recv().await {
            Ok(Some(bytes)) => match shared.codec.decode::<Frame>(&bytes) {
                Ok(Frame::Packet(packet)) => shared.report(ServerMsg::Received(id, packet)),
                Ok(other) => tracing::debug!(%id, ?other, "ignoring unexpected frame"),
                Err(e) => break Err(wire::codec_failure(e)),
            },
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    shared.players.fetch_sub(1, Ordering::Relaxed);
    shared.report(ServerMsg::Left(id));
    writer.abort();
    tracing::info!(%id, "peer left");
    result
}

async fn answer_query<C: Codec + Clone>(
    conn: &WebSocketConnection,
    shared: &Shared<C>,
) -> Result<(), TransportError> {
    if let Some(bytes) = wire::encode(&shared.codec, &Frame::HostInfo(shared.host_info())) {
        conn.send(&bytes).await?;
    }
    tracing::debug!(id = %conn.id(), "answered host query");
    let _ = conn.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// A [`ServerProvider`] that accepts [`WsClient`](crate::WsClient)s.
pub struct WsServer<C: Codec + Clone = JsonCodec> {
    runtime: Handle,
    config: ServerConfig,
    codec: C,
    /// Incremented on every host and close so a closed session's late
    /// arrivals are turned away.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, ServerMsg<C>)>,
    events_rx: mpsc::UnboundedReceiver<(u64, ServerMsg<C>)>,
    connections: BTreeMap<ConnectionId, WsConnection<C>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl WsServer<JsonCodec> {
    /// Creates a server using JSON frames.
    pub fn new(runtime: Handle, config: ServerConfig) -> Self {
        Self::with_codec(runtime, config, JsonCodec)
    }
}

impl<C: Codec + Clone> WsServer<C> {
    pub fn with_codec(runtime: Handle, config: ServerConfig, codec: C) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            config: config.validated(),
            codec,
            generation: 0,
            events_tx,
            events_rx,
            connections: BTreeMap::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    /// The address being listened on, while hosting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Registered peers that have not been closed.
    pub fn player_count(&self) -> usize {
        self.connections.values().filter(|c| !c.is_closed()).count()
    }
}

impl<C: Codec + Clone> ServerProvider for WsServer<C> {
    fn host(&mut self, port: u16) -> Result<(), TransportError> {
        if self.accept_task.is_some() {
            self.close();
        }

        let addr = format!("{}:{port}", self.config.bind_host);
        let std_listener =
            std::net::TcpListener::bind(&addr).map_err(TransportError::BindFailed)?;
        let local_addr = std_listener.local_addr().map_err(TransportError::BindFailed)?;
        let listener = {
            let _runtime = self.runtime.enter();
            WebSocketListener::from_std(std_listener)?
        }
        .with_subprotocol(wire::subprotocol());

        self.generation += 1;
        let shared = Arc::new(Shared {
            generation: self.generation,
            name: self.config.name.clone(),
            port: local_addr.port(),
            codec: self.codec.clone(),
            handshake_timeout: self.config.handshake_timeout,
            players: AtomicU32::new(0),
            events: self.events_tx.clone(),
        });
        self.accept_task = Some(self.runtime.spawn(accept_loop(listener, shared)));
        self.local_addr = Some(local_addr);
        tracing::info!(%local_addr, "WebSocket server listening");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            tracing::info!("WebSocket server closed");
        }
        for connection in self.connections.values() {
            connection.close();
        }
        self.local_addr = None;
        self.generation += 1;
    }

    fn connections(&self) -> Vec<&dyn NetConnection> {
        self.connections
            .values()
            .filter(|c| !c.is_closed())
            .map(|c| c as &dyn NetConnection)
            .collect()
    }

    fn connection(&self, id: ConnectionId) -> Option<&dyn NetConnection> {
        self.connections
            .get(&id)
            .filter(|c| !c.is_closed())
            .map(|c| c as &dyn NetConnection)
    }

    fn poll_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok((generation, msg)) = self.events_rx.try_recv() {
            let current = generation == self.generation;
            match msg {
                ServerMsg::Joined(connection) if current => {
                    let id = connection.id;
                    let address = connection.address.clone();
                    self.connections.insert(id, connection);
                    events.push(ServerEvent::Received(id, Connect { address }.into()));
                }
                ServerMsg::Joined(connection) => connection.close(),
                ServerMsg::Received(id, packet) => {
                    let live = self.connections.get(&id).is_some_and(|c| !c.is_closed());
                    if live {
                        events.push(ServerEvent::Received(id, packet));
                    }
                }
                ServerMsg::Left(id) => {
                    if self.connections.remove(&id).is_some() {
                        events.push(ServerEvent::Received(id, Disconnect::default().into()));
                    }
                }
                ServerMsg::Failed(e) if current => events.push(ServerEvent::Failed(e)),
                ServerMsg::Failed(_) => {}
            }
        }
        events
    }
}

impl<C: Codec + Clone> Drop for WsServer<C> {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}
