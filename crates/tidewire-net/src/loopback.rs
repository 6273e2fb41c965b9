//! In-process providers that never touch a socket.
//!
//! Each provider comes with a handle sharing its state. Tests (or a
//! single-process game) use the handle to play the remote side: inject
//! packets and failures, and inspect what the core sent.
//!
//! ```rust
//! use tidewire_net::loopback::LoopbackClient;
//! use tidewire_net::{NetConfig, NetworkCore};
//!
//! let (client, remote) = LoopbackClient::new();
//! let mut net = NetworkCore::new(NetConfig::default()).with_client_provider(client);
//! net.connect("localhost", 6567, |_| {}).unwrap();
//! assert_eq!(remote.target(), Some(("localhost".to_string(), 6567)));
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use tidewire_protocol::{Connect, Disconnect, Host, Packet};
use tidewire_transport::{ConnectionId, DeliveryMode, TransportError};

use crate::{
    ClientEvent, ClientProvider, DoneCallback, HostCallback, NetConnection,
    PingFailure, PingSuccess, ServerEvent, ServerProvider,
};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClientState {
    target: Option<(String, u16)>,
    sent: Vec<(Packet, DeliveryMode)>,
    events: VecDeque<ClientEvent>,
    refuse_next: Option<TransportError>,
    hosts: Vec<Host>,
    ping: u32,
    ping_requests: u32,
    disconnects: u32,
    disposed: bool,
}

/// A [`ClientProvider`] driven through a [`LoopbackClientHandle`].
#[derive(Debug)]
pub struct LoopbackClient {
    state: Rc<RefCell<ClientState>>,
}

/// The server's side of a [`LoopbackClient`].
#[derive(Debug, Clone)]
pub struct LoopbackClientHandle {
    state: Rc<RefCell<ClientState>>,
}

impl LoopbackClient {
    pub fn new() -> (Self, LoopbackClientHandle) {
        let state = Rc::new(RefCell::new(ClientState::default()));
        (
            Self {
                state: state.clone(),
            },
            LoopbackClientHandle { state },
        )
    }
}

impl ClientProvider for LoopbackClient {
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.refuse_next.take() {
            return Err(err);
        }
        state.target = Some((address.to_string(), port));
        state.events.push_back(ClientEvent::Connected);
        Ok(())
    }

    fn send(&mut self, packet: &Packet, mode: DeliveryMode) {
        self.state.borrow_mut().sent.push((packet.clone(), mode));
    }

    fn ping(&self) -> u32 {
        self.state.borrow().ping
    }

    fn update_ping(&mut self) {
        self.state.borrow_mut().ping_requests += 1;
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disconnects += 1;
        if state.target.take().is_some() {
            state
                .events
                .push_back(ClientEvent::Received(Disconnect::default().into()));
        }
    }

    fn discover(&mut self, mut on_found: HostCallback, on_done: DoneCallback) {
        let hosts = self.state.borrow().hosts.clone();
        for host in hosts {
            on_found(host);
        }
        on_done();
    }

    fn ping_host(
        &mut self,
        address: &str,
        port: u16,
        on_success: PingSuccess,
        on_failure: PingFailure,
    ) {
        let found = self
            .state
            .borrow()
            .hosts
            .iter()
            .find(|h| h.address == address && h.port == port)
            .cloned();
        match found {
            Some(host) => on_success(host),
            None => on_failure(TransportError::UnknownHost(address.to_string())),
        }
    }

    fn dispose(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disposed = true;
        state.target = None;
        state.events.clear();
    }

    fn poll_events(&mut self) -> Vec<ClientEvent> {
        self.state.borrow_mut().events.drain(..).collect()
    }
}

impl LoopbackClientHandle {
    /// Delivers a packet as if the server had sent it.
    pub fn receive(&self, packet: impl Into<Packet>) {
        self.state
            .borrow_mut()
            .events
            .push_back(ClientEvent::Received(packet.into()));
    }

    /// Reports a broken connection.
    pub fn fail(&self, err: TransportError) {
        self.state
            .borrow_mut()
            .events
            .push_back(ClientEvent::Failed(err));
    }

    /// Makes the next `connect` fail with `err`.
    pub fn refuse_next_connect(&self, err: TransportError) {
        self.state.borrow_mut().refuse_next = Some(err);
    }

    /// Drops the connection from the server's side.
    pub fn close(&self, reason: Option<String>) {
        let mut state = self.state.borrow_mut();
        if state.target.take().is_some() {
            state
                .events
                .push_back(ClientEvent::Received(Disconnect { reason }.into()));
        }
    }

    /// Makes `host` answer discovery and pings.
    pub fn add_host(&self, host: Host) {
        self.state.borrow_mut().hosts.push(host);
    }

    pub fn set_ping(&self, ms: u32) {
        self.state.borrow_mut().ping = ms;
    }

    /// Everything the core sent, oldest first.
    pub fn sent(&self) -> Vec<(Packet, DeliveryMode)> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_packets(&self) -> Vec<Packet> {
        self.state.borrow().sent.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Where the client is connected, if anywhere.
    pub fn target(&self) -> Option<(String, u16)> {
        self.state.borrow().target.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().target.is_some()
    }

    pub fn disconnects(&self) -> u32 {
        self.state.borrow().disconnects
    }

    pub fn ping_requests(&self) -> u32 {
        self.state.borrow().ping_requests
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    /// Events not yet polled by the core.
    pub fn queued_events(&self) -> usize {
        self.state.borrow().events.len()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Incoming {
    Join(ConnectionId),
    Packet(ConnectionId, Packet),
    Leave(ConnectionId),
}

#[derive(Debug)]
struct PeerLog {
    address: String,
    sent: RefCell<Vec<(Packet, DeliveryMode)>>,
    closed: Cell<bool>,
}

#[derive(Debug, Default)]
struct ServerState {
    port: Option<u16>,
    next_id: u32,
    incoming: VecDeque<Incoming>,
    peers: BTreeMap<ConnectionId, Rc<PeerLog>>,
    refuse_next: Option<TransportError>,
}

/// One client of a [`LoopbackServer`].
#[derive(Debug)]
pub struct LoopbackConnection {
    id: ConnectionId,
    log: Rc<PeerLog>,
    state: Rc<RefCell<ServerState>>,
}

impl NetConnection for LoopbackConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn address(&self) -> &str {
        &self.log.address
    }

    fn send(&self, packet: &Packet, mode: DeliveryMode) {
        if !self.log.closed.get() {
            self.log.sent.borrow_mut().push((packet.clone(), mode));
        }
    }

    fn close(&self) {
        if !self.log.closed.replace(true) {
            self.state
                .borrow_mut()
                .incoming
                .push_back(Incoming::Leave(self.id));
        }
    }
}

/// A [`ServerProvider`] driven through a [`LoopbackServerHandle`].
#[derive(Debug)]
pub struct LoopbackServer {
    state: Rc<RefCell<ServerState>>,
    connections: BTreeMap<ConnectionId, LoopbackConnection>,
}

/// The clients' side of a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackServerHandle {
    state: Rc<RefCell<ServerState>>,
}

impl LoopbackServer {
    pub fn new() -> (Self, LoopbackServerHandle) {
        let state = Rc::new(RefCell::new(ServerState::default()));
        (
            Self {
                state: state.clone(),
                connections: BTreeMap::new(),
            },
            LoopbackServerHandle { state },
        )
    }
}

impl ServerProvider for LoopbackServer {
    fn host(&mut self, port: u16) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.refuse_next.take() {
            return Err(err);
        }
        state.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().port = None;
        for connection in self.connections.values() {
            connection.close();
        }
    }

    fn connections(&self) -> Vec<&dyn NetConnection> {
        self.connections
            .values()
            .filter(|c| !c.log.closed.get())
            .map(|c| c as &dyn NetConnection)
            .collect()
    }

    fn poll_events(&mut self) -> Vec<ServerEvent> {
        let incoming: Vec<_> = self.state.borrow_mut().incoming.drain(..).collect();
        let mut events = Vec::with_capacity(incoming.len());

        for item in incoming {
            match item {
                Incoming::Join(id) => {
                    let (hosting, log) = {
                        let state = self.state.borrow();
                        (state.port.is_some(), state.peers.get(&id).cloned())
                    };
                    let Some(log) = log else { continue };
                    if !hosting {
                        log.closed.set(true);
                        continue;
                    }
                    let address = log.address.clone();
                    self.connections.insert(
                        id,
                        LoopbackConnection {
                            id,
                            log,
                            state: self.state.clone(),
                        },
                    );
                    events.push(ServerEvent::Received(id, Connect { address }.into()));
                }
                Incoming::Packet(id, packet) => {
                    let live = self
                        .connections
                        .get(&id)
                        .is_some_and(|c| !c.log.closed.get());
                    if live {
                        events.push(ServerEvent::Received(id, packet));
                    }
                }
                Incoming::Leave(id) => {
                    if self.connections.remove(&id).is_some() {
                        events.push(ServerEvent::Received(id, Disconnect::default().into()));
                    }
                }
            }
        }
        events
    }
}

impl LoopbackServerHandle {
    /// Opens a connection from `address`. It appears on the next poll.
    pub fn join(&self, address: &str) -> ConnectionId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = ConnectionId::new(state.next_id);
        state.peers.insert(
            id,
            Rc::new(PeerLog {
                address: address.to_string(),
                sent: RefCell::new(Vec::new()),
                closed: Cell::new(false),
            }),
        );
        state.incoming.push_back(Incoming::Join(id));
        id
    }

    /// Delivers a packet as if `id` had sent it.
    pub fn receive(&self, id: ConnectionId, packet: impl Into<Packet>) {
        self.state
            .borrow_mut()
            .incoming
            .push_back(Incoming::Packet(id, packet.into()));
    }

    /// Drops the connection from the client's side.
    pub fn leave(&self, id: ConnectionId) {
        let mut state = self.state.borrow_mut();
        let newly_closed = state
            .peers
            .get(&id)
            .is_some_and(|log| !log.closed.replace(true));
        if newly_closed {
            state.incoming.push_back(Incoming::Leave(id));
        }
    }

    /// Makes the next `host` fail with `err`.
    pub fn refuse_next_host(&self, err: TransportError) {
        self.state.borrow_mut().refuse_next = Some(err);
    }

    /// Everything sent to `id`, oldest first.
    pub fn sent_to(&self, id: ConnectionId) -> Vec<(Packet, DeliveryMode)> {
        self.state
            .borrow()
            .peers
            .get(&id)
            .map(|log| log.sent.borrow().clone())
            .unwrap_or_default()
    }

    pub fn packets_to(&self, id: ConnectionId) -> Vec<Packet> {
        self.sent_to(id).into_iter().map(|(p, _)| p).collect()
    }

    pub fn is_closed(&self, id: ConnectionId) -> bool {
        self.state
            .borrow()
            .peers
            .get(&id)
            .is_none_or(|log| log.closed.get())
    }

    /// The port being hosted on, if any.
    pub fn port(&self) -> Option<u16> {
        self.state.borrow().port
    }
}
