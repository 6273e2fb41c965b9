//! [`NetworkCore`]: session state, routing, and providers in one place.
//!
//! The core is owned by the simulation and driven from its tick thread.
//! Providers queue whatever their network threads receive; each call to
//! [`NetworkCore::update`] pulls those events and dispatches them, so
//! every handler runs on the tick thread.

use std::error::Error;
use std::time::Instant;

use tidewire_protocol::{
    Host, Kick, KickReason, Packet, PacketBody, PacketKind, Streamable,
};
use tidewire_transport::{ConnectionId, DeliveryMode, TransportError};

use crate::{
    Action, ClientEvent, ClientProvider, Dispatch, Failure, FailureKind,
    NetConfig, NetConnection, NetContext, NetError, PacketRouter, Role,
    ServerEvent, ServerProvider, Session, classify, describe,
};

/// Runs once when the client connection is established.
pub type ConnectCallback = Box<dyn FnOnce(&mut NetworkCore)>;

/// Owns the network session of one process.
pub struct NetworkCore {
    config: NetConfig,
    session: Session,
    router: PacketRouter,
    client: Option<Box<dyn ClientProvider>>,
    server: Option<Box<dyn ServerProvider>>,
    on_connect: Option<ConnectCallback>,
    announcer: Option<Box<dyn FnMut()>>,
    announce_at: Option<Instant>,
    failures: Vec<Failure>,
    /// Bumped whenever the client session ends so the rest of an event
    /// batch polled before that is not dispatched after it.
    client_epoch: u64,
}

impl NetworkCore {
    /// Creates an inactive core with no providers.
    pub fn new(config: NetConfig) -> Self {
        let config = config.validated();
        Self {
            router: PacketRouter::new(config.max_stream_size),
            config,
            session: Session::new(),
            client: None,
            server: None,
            on_connect: None,
            announcer: None,
            announce_at: None,
            failures: Vec::new(),
            client_epoch: 0,
        }
    }

    pub fn set_client_provider(&mut self, provider: impl ClientProvider + 'static) {
        self.client = Some(Box::new(provider));
    }

    pub fn set_server_provider(&mut self, provider: impl ServerProvider + 'static) {
        self.server = Some(Box::new(provider));
    }

    pub fn with_client_provider(mut self, provider: impl ClientProvider + 'static) -> Self {
        self.set_client_provider(provider);
        self
    }

    pub fn with_server_provider(mut self, provider: impl ServerProvider + 'static) -> Self {
        self.set_server_provider(provider);
        self
    }

    /// Installs the hook that announces this server's presence. It runs
    /// once, `announce_delay` after [`host`](Self::host) succeeds.
    pub fn set_announcer(&mut self, announcer: impl FnMut() + 'static) {
        self.announcer = Some(Box::new(announcer));
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    pub fn router(&self) -> &PacketRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut PacketRouter {
        &mut self.router
    }

    pub fn handle_client(
        &mut self,
        kind: PacketKind,
        handler: impl FnMut(Packet, &mut NetContext) + 'static,
    ) {
        self.router.handle_client(kind, handler);
    }

    pub fn handle_server(
        &mut self,
        kind: PacketKind,
        handler: impl FnMut(ConnectionId, Packet, &mut NetContext) + 'static,
    ) {
        self.router.handle_server(kind, handler);
    }

    pub fn on_client<T: PacketBody + 'static>(
        &mut self,
        handler: impl FnMut(T, &mut NetContext) + 'static,
    ) {
        self.router.on_client(handler);
    }

    pub fn on_server<T: PacketBody + 'static>(
        &mut self,
        handler: impl FnMut(ConnectionId, T, &mut NetContext) + 'static,
    ) {
        self.router.on_server(handler);
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn is_server(&self) -> bool {
        self.session.is_server()
    }

    pub fn is_client(&self) -> bool {
        self.session.is_client()
    }

    pub fn is_client_loaded(&self) -> bool {
        self.session.is_loaded()
    }

    /// Connects to a server as a client.
    ///
    /// `on_success` runs on the tick thread once the provider reports the
    /// connection as established. A provider error is classified and
    /// reported through [`update`](Self::update) rather than returned.
    ///
    /// # Errors
    /// - [`NetError::AlreadyConnected`] if a session is active. The
    ///   active session is left as it is.
    /// - [`NetError::NoClientProvider`] if no client provider is set.
    pub fn connect(
        &mut self,
        address: &str,
        port: u16,
        on_success: impl FnOnce(&mut NetworkCore) + 'static,
    ) -> Result<(), NetError> {
        if let Some(role) = self.session.role() {
            tracing::warn!(%role, address, port, "connect refused, session already active");
            return Err(NetError::AlreadyConnected);
        }
        let client = self.client.as_mut().ok_or(NetError::NoClientProvider)?;

        match client.connect(address, port) {
            Ok(()) => {
                tracing::info!(address, port, "connecting");
                self.session.begin(Role::Client);
                self.on_connect = Some(Box::new(on_success));
            }
            Err(err) => {
                self.handle_failure(&err);
            }
        }
        Ok(())
    }

    /// Starts hosting on `port`.
    ///
    /// # Errors
    /// - [`NetError::NoServerProvider`] if no server provider is set.
    /// - [`NetError::Transport`] if the provider cannot listen. The
    ///   session is left inactive.
    pub fn host(&mut self, port: u16) -> Result<(), NetError> {
        let server = self.server.as_mut().ok_or(NetError::NoServerProvider)?;
        server.host(port)?;

        self.session.begin(Role::Server);
        self.announce_at = Some(Instant::now() + self.config.announce_delay);
        tracing::info!(port, "hosting");
        Ok(())
    }

    /// Kicks every client with [`KickReason::ServerClose`] and stops
    /// hosting.
    pub fn close_server(&mut self) {
        if let Some(server) = self.server.as_mut() {
            let notice = Packet::from(Kick {
                reason: KickReason::ServerClose,
            });
            for connection in server.connections() {
                connection.send(&notice, DeliveryMode::Reliable);
            }
            server.close();
        }
        self.router.clear_server_streams();
        self.announce_at = None;
        if self.session.is_server() {
            self.session.end();
            tracing::info!("server closed");
        }
    }

    /// Leaves the client session. The provider reports the resulting
    /// `Disconnect` packet on the next [`update`](Self::update).
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.disconnect();
        }
        self.end_client_session();
    }

    /// Leaves the client session without dispatching anything the
    /// provider has already received, including its `Disconnect` packet.
    pub fn disconnect_quietly(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.disconnect();
            let dropped = client.poll_events().len();
            if dropped > 0 {
                tracing::debug!(dropped, "discarded events from closed session");
            }
        }
        self.end_client_session();
    }

    fn end_client_session(&mut self) {
        self.client_epoch += 1;
        if self.session.is_client() {
            self.session.end();
            tracing::info!("disconnected");
        }
        self.router.clear_pending();
        self.router.clear_client_streams();
        self.on_connect = None;
    }

    /// Returns to an inactive session: stops hosting and leaves any
    /// client session quietly.
    pub fn reset(&mut self) {
        self.close_server();
        self.disconnect_quietly();
    }

    /// Shuts down and releases both providers.
    pub fn dispose(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.dispose();
        }
        if let Some(mut server) = self.server.take() {
            server.close();
        }
        self.session.end();
        self.client_epoch += 1;
        self.router.clear_pending();
        self.router.clear_client_streams();
        self.router.clear_server_streams();
        self.on_connect = None;
        self.announce_at = None;
        tracing::info!("network disposed");
    }

    /// Marks the client as loaded or not.
    ///
    /// Loading delivers every deferred packet, in arrival order. Either
    /// way the deferred queue is empty afterwards.
    pub fn set_client_loaded(&mut self, loaded: bool) {
        self.session.set_loaded(loaded);
        if loaded {
            let mut ctx = NetContext::new();
            let delivered = self.router.drain_pending(&mut ctx);
            tracing::debug!(delivered, "client loaded");
            self.apply(ctx);
        } else {
            self.router.clear_pending();
        }
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Dispatches a packet received from the server.
    ///
    /// # Errors
    /// Returns [`NetError::Stream`] when a stream record breaks the
    /// protocol. The client session has been torn down and the failure
    /// reported by then.
    pub fn handle_client_received(&mut self, packet: Packet) -> Result<Dispatch, NetError> {
        let mut ctx = NetContext::new();
        let result = self
            .router
            .dispatch_client(packet, self.session.is_loaded(), &mut ctx);
        self.apply(ctx);

        result.map_err(|err| {
            tracing::error!(error = %err, "stream protocol violation from server");
            let err = NetError::from(err);
            self.handle_failure(&err);
            err
        })
    }

    /// Dispatches a packet received from `connection`.
    ///
    /// # Errors
    /// Returns [`NetError::Stream`] when a stream record breaks the
    /// protocol. The connection has been closed by then.
    pub fn handle_server_received(
        &mut self,
        connection: ConnectionId,
        packet: Packet,
    ) -> Result<Dispatch, NetError> {
        let mut ctx = NetContext::new();
        let result = self.router.dispatch_server(connection, packet, &mut ctx);
        self.apply(ctx);

        result.map_err(|err| {
            tracing::error!(%connection, error = %err, "stream protocol violation, closing connection");
            self.router.drop_connection_streams(connection);
            if let Some(peer) = self.connection(connection) {
                peer.close();
            }
            err.into()
        })
    }

    /// Classifies and logs a failure, then leaves the client session
    /// quietly if one is active. The failure is reported by the next
    /// [`update`](Self::update).
    pub fn handle_failure(&mut self, err: &(dyn Error + 'static)) -> FailureKind {
        let kind = classify(err);
        let detail = describe(err);
        tracing::error!(%kind, error = %detail, "network failure");

        if self.session.is_client() {
            self.disconnect_quietly();
        }
        self.failures.push(Failure {
            kind: kind.clone(),
            detail,
        });
        kind
    }

    /// Runs one network tick: announces presence when due, then
    /// dispatches everything the providers received. Returns the
    /// failures reported since the last call.
    pub fn update(&mut self) -> Vec<Failure> {
        self.announce_if_due();
        self.poll_client();
        self.poll_server();
        std::mem::take(&mut self.failures)
    }

    fn announce_if_due(&mut self) {
        let Some(at) = self.announce_at else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        self.announce_at = None;
        if let Some(announce) = self.announcer.as_mut() {
            tracing::debug!("announcing server");
            announce();
        }
    }

    fn poll_client(&mut self) {
        let events = match self.client.as_mut() {
            Some(client) => client.poll_events(),
            None => return,
        };
        let epoch = self.client_epoch;
        for event in events {
            if self.client_epoch != epoch {
                break;
            }
            match event {
                ClientEvent::Connected => {
                    tracing::info!("connected");
                    if let Some(on_connect) = self.on_connect.take() {
                        on_connect(self);
                    }
                }
                ClientEvent::Received(packet) => {
                    // Violations are reported through `handle_failure`.
                    let _ = self.handle_client_received(packet);
                }
                ClientEvent::Failed(err) => {
                    self.handle_failure(&err);
                }
            }
        }
    }

    fn poll_server(&mut self) {
        let events = match self.server.as_mut() {
            Some(server) => server.poll_events(),
            None => return,
        };
        for event in events {
            match event {
                ServerEvent::Received(connection, packet) => {
                    let _ = self.handle_server_received(connection, packet);
                }
                ServerEvent::Failed(err) => {
                    self.handle_failure(&err);
                }
            }
        }
    }

    fn apply(&mut self, mut ctx: NetContext) {
        for action in ctx.take_actions() {
            match action {
                Action::Send { packet, mode } => self.send_packet(&packet, mode),
                Action::SendTo {
                    connection,
                    packet,
                    mode,
                } => self.send_to(connection, packet, mode),
                Action::SendExcept {
                    connection,
                    packet,
                    mode,
                } => self.send_except(connection, packet, mode),
                Action::SendStream {
                    connection,
                    kind,
                    data,
                } => {
                    if let Err(err) = self.send_stream_bytes(connection, kind, &data) {
                        tracing::error!(%connection, %kind, error = %err, "failed to send stream");
                    }
                }
                Action::Kick { connection, reason } => self.kick(connection, reason),
                Action::SetClientLoaded(loaded) => self.set_client_loaded(loaded),
                Action::Disconnect => self.disconnect(),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends to every connection when hosting, otherwise to the server.
    pub fn send(&mut self, packet: impl Into<Packet>, mode: DeliveryMode) {
        let packet = packet.into();
        self.send_packet(&packet, mode);
    }

    fn send_packet(&mut self, packet: &Packet, mode: DeliveryMode) {
        if self.session.is_server() {
            if let Some(server) = self.server.as_ref() {
                server.send(packet, mode);
            }
        } else if let Some(client) = self.client.as_mut() {
            client.send(packet, mode);
        } else {
            tracing::warn!(kind = %packet.kind(), "no provider to send through");
        }
    }

    /// Sends to one connection.
    pub fn send_to(
        &self,
        connection: ConnectionId,
        packet: impl Into<Packet>,
        mode: DeliveryMode,
    ) {
        let packet = packet.into();
        match self.server.as_ref() {
            Some(server) => server.send_to(connection, &packet, mode),
            None => tracing::error!(%connection, "send_to without a server provider"),
        }
    }

    /// Sends to every connection except one.
    pub fn send_except(
        &self,
        connection: ConnectionId,
        packet: impl Into<Packet>,
        mode: DeliveryMode,
    ) {
        let packet = packet.into();
        match self.server.as_ref() {
            Some(server) => server.send_except(connection, &packet, mode),
            None => tracing::error!(%connection, "send_except without a server provider"),
        }
    }

    /// Streams `body` to one connection in `stream_chunk_size` pieces.
    ///
    /// # Errors
    /// - [`NetError::NoServerProvider`] if no server provider is set.
    /// - [`NetError::Stream`] if the payload cannot be split.
    pub fn send_stream<T: Streamable>(
        &self,
        connection: ConnectionId,
        body: &T,
    ) -> Result<(), NetError> {
        self.send_stream_bytes(connection, T::KIND, body.stream_bytes())
    }

    fn send_stream_bytes(
        &self,
        connection: ConnectionId,
        kind: PacketKind,
        data: &[u8],
    ) -> Result<(), NetError> {
        let server = self.server.as_ref().ok_or(NetError::NoServerProvider)?;
        server.send_stream(connection, kind, data, self.config.stream_chunk_size)?;
        Ok(())
    }

    /// Tells a client why it is being removed, then closes its connection.
    pub fn kick(&self, connection: ConnectionId, reason: KickReason) {
        let Some(peer) = self.connection(connection) else {
            tracing::debug!(%connection, "kick target already gone");
            return;
        };
        tracing::info!(%connection, ?reason, "kicking");
        peer.send(&Kick { reason }.into(), DeliveryMode::Reliable);
        peer.close();
    }

    // -----------------------------------------------------------------------
    // Provider pass-throughs
    // -----------------------------------------------------------------------

    /// Every live connection. Empty when no server provider is set.
    pub fn connections(&self) -> Vec<&dyn NetConnection> {
        self.server
            .as_ref()
            .map(|server| server.connections())
            .unwrap_or_default()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&dyn NetConnection> {
        self.server.as_ref().and_then(|server| server.connection(id))
    }

    pub fn compress_snapshot(&self, input: &[u8]) -> Vec<u8> {
        match self.server.as_ref() {
            Some(server) => server.compress_snapshot(input),
            None => tidewire_transport::compress_snapshot(input),
        }
    }

    pub fn decompress_snapshot(&self, input: &[u8], size: usize) -> Result<Vec<u8>, NetError> {
        let bytes = match self.client.as_ref() {
            Some(client) => client.decompress_snapshot(input, size)?,
            None => tidewire_transport::decompress_snapshot(input, size)?,
        };
        Ok(bytes)
    }

    /// Searches for servers. `on_done` is always called, immediately if
    /// there is no client provider.
    pub fn discover_servers(
        &mut self,
        on_found: impl FnMut(Host) + Send + 'static,
        on_done: impl FnOnce() + Send + 'static,
    ) {
        match self.client.as_mut() {
            Some(client) => client.discover(Box::new(on_found), Box::new(on_done)),
            None => on_done(),
        }
    }

    /// Asks one server for its host info.
    pub fn ping_host(
        &mut self,
        address: &str,
        port: u16,
        on_success: impl FnOnce(Host) + Send + 'static,
        on_failure: impl FnOnce(TransportError) + Send + 'static,
    ) {
        match self.client.as_mut() {
            Some(client) => {
                client.ping_host(address, port, Box::new(on_success), Box::new(on_failure))
            }
            None => on_failure(TransportError::Shutdown),
        }
    }

    /// Round trip to the server in milliseconds. Always 0 when hosting.
    pub fn ping(&self) -> u32 {
        if self.session.is_server() {
            return 0;
        }
        self.client.as_ref().map_or(0, |client| client.ping())
    }

    pub fn update_ping(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.update_ping();
        }
    }
}

impl Default for NetworkCore {
    fn default() -> Self {
        Self::new(NetConfig::default())
    }
}

impl std::fmt::Debug for NetworkCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCore")
            .field("session", &self.session)
            .field("router", &self.router)
            .field("client", &self.client.is_some())
            .field("server", &self.server.is_some())
            .field("failures", &self.failures.len())
            .finish()
    }
}
