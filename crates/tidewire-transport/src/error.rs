/// Errors that can occur in the transport layer.
///
/// Variants that wrap an [`std::io::Error`] keep it as their `source`, so
/// callers walking the cause chain see the OS-level error kind
/// (`ConnectionRefused`, `TimedOut`, ...).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listening socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting or upgrading an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outgoing connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The host name could not be resolved.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// The address could not be used to open a connection.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The peer did not answer in time.
    #[error("timed out")]
    TimedOut,

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch")]
    VersionMismatch,

    /// A decode wrote past the end of its output buffer.
    #[error("buffer overflow: {0}")]
    BufferOverflow(String),

    /// A decode ran out of input before it was complete.
    #[error("buffer underflow: {0}")]
    BufferUnderflow(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
