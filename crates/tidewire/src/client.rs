//! [`WsClient`]: the client provider backed by a WebSocket connection.
//!
//! Network work runs as Tokio tasks. Everything they produce, including
//! discovery and ping callbacks, is queued and handed to the core from
//! [`ClientProvider::poll_events`] on the tick thread.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tidewire_net::{
    ClientEvent, ClientProvider, DoneCallback, HostCallback, PingFailure,
    PingSuccess,
};
use tidewire_protocol::{Codec, Connect, Disconnect, Host, JsonCodec, Packet};
use tidewire_transport::{
    Connection, DeliveryMode, TransportError, WebSocketConnection,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ClientConfig;
use crate::wire::{self, Frame, Outbound};

type Deferred = Box<dyn FnOnce() + Send>;

/// An event tagged with the connection attempt that produced it.
type Tagged = (u64, ClientEvent);

/// The live side of one connection attempt.
struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    connection: Arc<OnceLock<Arc<WebSocketConnection>>>,
    task: JoinHandle<()>,
}

/// A [`ClientProvider`] that talks to a [`WsServer`](crate::WsServer).
pub struct WsClient<C: Codec + Clone = JsonCodec> {
    runtime: Handle,
    config: ClientConfig,
    codec: C,
    /// Incremented on every connect and disconnect; events from older
    /// attempts are dropped.
    attempt: u64,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
    deferred_tx: mpsc::UnboundedSender<Deferred>,
    deferred_rx: mpsc::UnboundedReceiver<Deferred>,
    link: Option<Link>,
}

impl WsClient<JsonCodec> {
    /// Creates a client using JSON frames.
    pub fn new(runtime: Handle, config: ClientConfig) -> Self {
        Self::with_codec(runtime, config, JsonCodec)
    }
}

impl<C: Codec + Clone> WsClient<C> {
    pub fn with_codec(runtime: Handle, config: ClientConfig, codec: C) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            config: config.validated(),
            codec,
            attempt: 0,
            events_tx,
            events_rx,
            deferred_tx,
            deferred_rx,
            link: None,
        }
    }

    fn close_link(&mut self) -> bool {
        let Some(link) = self.link.take() else {
            return false;
        };
        if link.outbound.send(Outbound::Close).is_err() {
            link.task.abort();
        }
        self.attempt += 1;
        true
    }

    /// Runs `callback` on the tick thread once `work` completes.
    fn defer<T: Send + 'static>(
        &self,
        work: impl Future<Output = T> + Send + 'static,
        callback: impl FnOnce(T) + Send + 'static,
    ) {
        let deferred = self.deferred_tx.clone();
        self.runtime.spawn(async move {
            let value = work.await;
            let _ = deferred.send(Box::new(move || callback(value)));
        });
    }
}

impl<C: Codec + Clone> ClientProvider for WsClient<C> {
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        if address.trim().is_empty() {
            return Err(TransportError::InvalidAddress("empty host".into()));
        }
        if port == 0 {
            return Err(TransportError::InvalidAddress("invalid port: 0".into()));
        }
        self.close_link();
        self.attempt += 1;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(OnceLock::new());
        let session = ClientSession {
            attempt: self.attempt,
            address: address.to_string(),
            port,
            timeout: self.config.connect_timeout,
            codec: self.codec.clone(),
            events: self.events_tx.clone(),
            connection: Arc::clone(&connection),
        };
        let task = self.runtime.spawn(session.run(outbound_rx));
        self.link = Some(Link {
            outbound,
            connection,
            task,
        });
        Ok(())
    }

    fn send(&mut self, packet: &Packet, mode: DeliveryMode) {
        match &self.link {
            Some(link) => {
                tracing::trace!(kind = %packet.kind(), %mode, "sending to server");
                wire::queue_packet(&self.codec, &link.outbound, packet);
            }
            None => tracing::debug!(kind = %packet.kind(), "not connected, dropping packet"),
        }
    }

    fn ping(&self) -> u32 {
        self.link
            .as_ref()
            .and_then(|link| link.connection.get())
            .map_or(0, |conn| conn.rtt_ms())
    }

    fn update_ping(&mut self) {
        if let Some(link) = &self.link {
            let _ = link.outbound.send(Outbound::Ping);
        }
    }

    fn disconnect(&mut self) {
        if self.close_link() {
            let _ = self.events_tx.send((
                self.attempt,
                ClientEvent::Received(Disconnect::default().into()),
            ));
        }
    }

    fn discover(&mut self, mut on_found: HostCallback, on_done: DoneCallback) {
        let targets = self.config.discovery_targets.clone();
        let codec = self.codec.clone();
        let limit = self.config.ping_timeout;
        let search = async move {
            let queries = targets
                .iter()
                .map(|(address, port)| query_host(&codec, address, *port, limit));
            futures_util::future::join_all(queries)
                .await
                .into_iter()
                .filter_map(Result::ok)
                .collect::<Vec<_>>()
        };
        self.defer(search, move |hosts| {
            tracing::debug!(found = hosts.len(), "discovery finished");
            for host in hosts {
                on_found(host);
            }
            on_done();
        });
    }

    fn ping_host(
        &mut self,
        address: &str,
        port: u16,
        on_success: PingSuccess,
        on_failure: PingFailure,
    ) {
        let codec = self.codec.clone();
        let address = address.to_string();
        let limit = self.config.ping_timeout;
        self.defer(
            async move { query_host(&codec, &address, port, limit).await },
            move |result| match result {
                Ok(host) => on_success(host),
                Err(e) => on_failure(e),
            },
        );
    }

    fn dispose(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
        self.attempt += 1;
        while self.deferred_rx.try_recv().is_ok() {}
        while self.events_rx.try_recv().is_ok() {}
    }

    fn poll_events(&mut self) -> Vec<ClientEvent> {
        while let Ok(callback) = self.deferred_rx.try_recv() {
            callback();
        }

        let mut events = Vec::new();
        while let Ok((attempt, event)) = self.events_rx.try_recv() {
            if attempt == self.attempt {
                events.push(event);
            }
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

/// Everything the connection task needs, moved into it.
struct ClientSession<C> {
    attempt: u64,
    address: String,
    port: u16,
    timeout: Duration,
    codec: C,
    events: mpsc::UnboundedSender<Tagged>,
    connection: Arc<OnceLock<Arc<WebSocketConnection>>>,
}

impl<C: Codec> ClientSession<C> {
    fn report(&self, event: ClientEvent) {
        let _ = self.events.send((self.attempt, event));
    }

    async fn run(self, outbound: mpsc::UnboundedReceiver<Outbound>) {
        // --- Step 1: Connect ---
        let subprotocol = wire::subprotocol();
        let attempt =
            WebSocketConnection::connect(&self.address, self.port, Some(&subprotocol));
        let conn = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(conn)) => Arc::new(conn),
            Ok(Err(e)) => return self.report(ClientEvent::Failed(e)),
            Err(_) => return self.report(ClientEvent::Failed(TransportError::TimedOut)),
        };

        // --- Step 2: Join ---
        let Some(hello) = wire::encode(&self.codec, &Frame::Hello) else {
            return;
        };
        if let Err(e) = conn.send(&hello).await {
            return self.report(ClientEvent::Failed(e));
        }
        let _ = self.connection.set(Arc::clone(&conn));
        tracing::info!(id = %conn.id(), peer = conn.peer_addr(), "joined server");
        self.report(ClientEvent::Connected);
        self.report(ClientEvent::Received(
            Connect {
                address: conn.peer_addr().to_string(),
            }
            .into(),
        ));

        // --- Step 3: Read until closed ---
        let writer = tokio::spawn(wire::write_loop(Arc::clone(&conn), outbound));
        loop {
            match conn.recv().await {
                Ok(Some(bytes)) => match self.codec.decode::<Frame>(&bytes) {
                    Ok(Frame::Packet(packet)) => self.report(ClientEvent::Received(packet)),
                    Ok(other) => tracing::debug!(?other, "ignoring unexpected frame"),
                    Err(e) => {
                        self.report(ClientEvent::Failed(wire::codec_failure(e)));
                        break;
                    }
                },
                Ok(None) => {
                    tracing::info!(id = %conn.id(), "server closed the connection");
                    self.report(ClientEvent::Received(
                        Disconnect {
                            reason: Some("closed by server".into()),
                        }
                        .into(),
                    ));
                    break;
                }
                Err(e) => {
                    self.report(ClientEvent::Failed(e));
                    break;
                }
            }
        }
        writer.abort();
    }
}

/// Asks a server for its [`Host`] info over a short-lived connection.
async fn query_host<C: Codec>(
    codec: &C,
    address: &str,
    port: u16,
    limit: Duration,
) -> Result<Host, TransportError> {
    let started = Instant::now();
    let exchange = async {
        let subprotocol = wire::subprotocol();
        let conn = WebSocketConnection::connect(address, port, Some(&subprotocol)).await?;
        let query = codec.encode(&Frame::HostQuery).map_err(wire::codec_failure)?;
        conn.send(&query).await?;

        loop {
            let Some(bytes) = conn.recv().await? else {
                return Err(TransportError::ConnectionClosed(
                    "closed before host info".into(),
                ));
            };
            if let Ok(Frame::HostInfo(mut host)) = codec.decode::<Frame>(&bytes) {
                let _ = conn.close().await;
                host.address = address.to_string();
                host.port = port;
                host.ping = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                return Ok(host);
            }
        }
    };
    tokio::time::timeout(limit, exchange)
        .await
        .map_err(|_| TransportError::TimedOut)?
}
