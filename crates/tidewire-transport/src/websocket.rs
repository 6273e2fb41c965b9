//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Handshake, Listener, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket [`Listener`] bound to a local TCP port.
pub struct WebSocketListener {
    listener: TcpListener,
    subprotocol: Option<String>,
}

impl WebSocketListener {
    /// Binds a new WebSocket listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).await.map_err(TransportError::BindFailed)?;
        tracing::info!(addr, "WebSocket listener bound");
        Ok(Self {
            listener,
            subprotocol: None,
        })
    }

    /// Wraps an already bound std listener.
    ///
    /// Must be called from within a Tokio runtime context.
    pub fn from_std(
        listener: std::net::TcpListener,
    ) -> Result<Self, TransportError> {
        listener
            .set_nonblocking(true)
            .map_err(TransportError::BindFailed)?;
        let listener =
            TcpListener::from_std(listener).map_err(TransportError::BindFailed)?;
        Ok(Self {
            listener,
            subprotocol: None,
        })
    }

    /// Requires peers to offer this `Sec-WebSocket-Protocol` value.
    ///
    /// Peers that offer anything else are refused with
    /// `426 Upgrade Required`.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for WebSocketListener {
    type Pending = PendingUpgrade;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%addr, "accepted TCP socket");
        Ok(PendingUpgrade {
            stream,
            addr,
            subprotocol: self.subprotocol.clone(),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// An accepted TCP socket waiting for its WebSocket upgrade.
pub struct PendingUpgrade {
    stream: TcpStream,
    addr: SocketAddr,
    subprotocol: Option<String>,
}

impl PendingUpgrade {
    /// The remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Handshake for PendingUpgrade {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn complete(self) -> Result<Self::Connection, Self::Error> {
        let expected = self.subprotocol;
        let check = move |req: &Request,
                          mut resp: Response|
              -> Result<Response, ErrorResponse> {
            let Some(expected) = expected else {
                return Ok(resp);
            };
            let offered = req
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if offered.split(',').any(|p| p.trim() == expected) {
                if let Ok(value) = HeaderValue::from_str(&expected) {
                    resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                }
                Ok(resp)
            } else {
                let mut refusal = ErrorResponse::new(Some("mismatch".into()));
                *refusal.status_mut() = StatusCode::UPGRADE_REQUIRED;
                Err(refusal)
            }
        };

        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(self.stream),
            check,
        )
        .await
        .map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let conn = WebSocketConnection::from_stream(ws, self.addr.to_string());
        tracing::debug!(id = %conn.id, addr = %self.addr, "accepted WebSocket connection");
        Ok(conn)
    }
}

/// A single WebSocket connection.
///
/// The socket is split so that one task can block in [`Connection::recv`]
/// while another sends.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    ping_sent: std::sync::Mutex<Option<Instant>>,
    rtt_ms: AtomicU32,
}

impl WebSocketConnection {
    fn from_stream(ws: WsStream, peer: String) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            peer,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            ping_sent: std::sync::Mutex::new(None),
            rtt_ms: AtomicU32::new(0),
        }
    }

    /// Opens a WebSocket connection to `host:port`.
    ///
    /// The host is resolved first so that resolution failures surface as
    /// [`TransportError::UnknownHost`] rather than a generic I/O error.
    pub async fn connect(
        host: &str,
        port: u16,
        subprotocol: Option<&str>,
    ) -> Result<Self, TransportError> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| TransportError::UnknownHost(host.to_string()))?;

        let mut request = format!("ws://{addr}")
            .into_client_request()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        if let Some(subprotocol) = subprotocol {
            let value = HeaderValue::from_str(subprotocol)
                .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;
        let conn = Self::from_stream(ws, addr.to_string());
        tracing::debug!(id = %conn.id, %addr, "opened WebSocket connection");
        Ok(conn)
    }

    /// The remote address this connection talks to.
    pub fn peer_addr(&self) -> &str {
        &self.peer
    }

    /// Sends a ping frame. The round trip is measured when the pong
    /// arrives through [`Connection::recv`].
    pub async fn ping(&self) -> Result<(), TransportError> {
        if let Ok(mut sent) = self.ping_sent.lock() {
            *sent = Some(Instant::now());
        }
        self.sink
            .lock()
            .await
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(send_error)
    }

    /// Last measured round trip in milliseconds (0 before the first pong).
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms.load(Ordering::Relaxed)
    }

    fn record_pong(&self) {
        let sent = self.ping_sent.lock().ok().and_then(|mut s| s.take());
        if let Some(sent) = sent {
            let ms = sent.elapsed().as_millis().min(u32::MAX as u128) as u32;
            self.rtt_ms.store(ms, Ordering::Relaxed);
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(send_error)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Pong(_))) => self.record_pong(),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/frame
                Some(Err(WsError::ConnectionClosed)) => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(send_error)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::AlreadyClosed | WsError::ConnectionClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}

fn map_connect_error(e: WsError) -> TransportError {
    match e {
        WsError::Io(io) => TransportError::ConnectFailed(io),
        WsError::Http(resp) if resp.status() == StatusCode::UPGRADE_REQUIRED => {
            TransportError::VersionMismatch
        }
        WsError::Url(url) => TransportError::InvalidAddress(url.to_string()),
        other => TransportError::ConnectFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            other,
        )),
    }
}
