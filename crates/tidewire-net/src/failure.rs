//! Turning raw network errors into a small set of user-facing categories.
//!
//! Transports fail in many ways, but a player only needs to know a
//! handful of things: the address is bad, the host is unreachable, the
//! versions differ, and so on. [`classify`] looks at the innermost cause
//! of an error and picks the first matching [`FailureKind`], in a fixed
//! priority order:
//!
//! 1. a buffer overflow or underflow anywhere in the chain → `IoError`
//! 2. a version mismatch → `ProtocolVersionMismatch`
//! 3. a malformed address or port → `InvalidAddress`
//! 4. a refused connection, missing route, or unknown host → `HostUnreachable`
//! 5. a timeout → `TimedOut`
//! 6. an already-connected or closed-connection condition → `AlreadyConnected`
//! 7. any other non-empty message → `Generic`
//! 8. otherwise → `Unknown`
//!
//! Typed errors from this workspace are recognized by downcasting; for
//! anything else the lowercased message text decides.

use std::error::Error;
use std::fmt;
use std::io;

use tidewire_protocol::ProtocolError;
use tidewire_transport::TransportError;

use crate::{NetError, StreamError};

/// Category of a network failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    IoError,
    ProtocolVersionMismatch,
    InvalidAddress,
    HostUnreachable,
    TimedOut,
    AlreadyConnected,
    /// Unrecognized failure, with the full description of the error.
    Generic(String),
    Unknown,
}

impl FailureKind {
    /// Presentation key for the failure message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::IoError => "error.io",
            Self::ProtocolVersionMismatch => "error.mismatch",
            Self::InvalidAddress => "error.invalidaddress",
            Self::HostUnreachable => "error.unreachable",
            Self::TimedOut => "error.timedout",
            Self::AlreadyConnected => "error.alreadyconnected",
            Self::Generic(_) => "error.any",
            Self::Unknown => "error.unknown",
        }
    }

    /// Only unrecognized failures are presented as errors; the rest are
    /// shown as plain messages.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Generic(_))
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError => write!(f, "network I/O error"),
            Self::ProtocolVersionMismatch => {
                write!(f, "client and server versions do not match")
            }
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::TimedOut => write!(f, "timed out"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::Generic(detail) => write!(f, "{detail}"),
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

/// A classified failure, as reported by
/// [`NetworkCore::update`](crate::NetworkCore::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Description of the underlying error chain.
    pub detail: String,
}

impl Failure {
    pub fn is_error(&self) -> bool {
        self.kind.is_error()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What a typed error says about itself, independent of its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Buffer,
    VersionMismatch,
    UnknownHost,
    TimedOut,
    AlreadyConnected,
    Other,
}

fn tag(err: &(dyn Error + 'static)) -> Tag {
    if let Some(e) = err.downcast_ref::<TransportError>() {
        return match e {
            TransportError::BufferOverflow(_)
            | TransportError::BufferUnderflow(_) => Tag::Buffer,
            TransportError::VersionMismatch => Tag::VersionMismatch,
            TransportError::UnknownHost(_) => Tag::UnknownHost,
            TransportError::TimedOut => Tag::TimedOut,
            _ => Tag::Other,
        };
    }
    if let Some(e) = err.downcast_ref::<io::Error>() {
        return match e.kind() {
            io::ErrorKind::TimedOut => Tag::TimedOut,
            _ => Tag::Other,
        };
    }
    if let Some(e) = err.downcast_ref::<ProtocolError>() {
        return if e.is_truncated() { Tag::Buffer } else { Tag::Other };
    }
    // Transparent wrappers forward `source()` past the wrapped error, so
    // look inside them here.
    if let Some(e) = err.downcast_ref::<StreamError>() {
        return match e {
            StreamError::Overflow { .. } => Tag::Buffer,
            StreamError::Materialize(inner) => tag(inner),
            _ => Tag::Other,
        };
    }
    if let Some(e) = err.downcast_ref::<NetError>() {
        return match e {
            NetError::AlreadyConnected => Tag::AlreadyConnected,
            NetError::Transport(inner) => tag(inner),
            NetError::Protocol(inner) => tag(inner),
            NetError::Stream(inner) => tag(inner),
            _ => Tag::Other,
        };
    }
    Tag::Other
}

/// The error followed by each of its causes.
///
/// `io::Error::source` skips the error it wraps, so the wrapped error is
/// visited explicitly.
fn chain<'a>(
    err: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |&e| {
        match e.downcast_ref::<io::Error>().and_then(|wrapped| wrapped.get_ref()) {
            Some(inner) => Some(inner as &(dyn Error + 'static)),
            None => e.source(),
        }
    })
}

/// Describes an error and its causes on one line.
///
/// Causes whose text already appears in an outer message are skipped, so
/// wrappers that embed their source do not repeat it.
pub fn describe(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    for cause in chain(err).skip(1) {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
    }
    out
}

/// Classifies an error into a [`FailureKind`].
pub fn classify(err: &(dyn Error + 'static)) -> FailureKind {
    if chain(err).any(|e| tag(e) == Tag::Buffer) {
        return FailureKind::IoError;
    }

    let innermost = chain(err).last().unwrap_or(err);
    // The innermost typed signal wins; plain messages carry none.
    let tag = chain(err)
        .map(tag)
        .filter(|t| *t != Tag::Other)
        .last()
        .unwrap_or(Tag::Other);
    let text = innermost.to_string().to_lowercase();
    let full = describe(err).to_lowercase();

    if text == "mismatch" || tag == Tag::VersionMismatch {
        FailureKind::ProtocolVersionMismatch
    } else if text.contains("port out of range")
        || text.contains("invalid port")
        || text.contains("invalid argument")
        || (text.contains("invalid") && text.contains("address"))
        || full.contains("address associated")
    {
        FailureKind::InvalidAddress
    } else if text.contains("connection refused")
        || text.contains("route to host")
        || tag == Tag::UnknownHost
    {
        FailureKind::HostUnreachable
    } else if tag == Tag::TimedOut {
        FailureKind::TimedOut
    } else if text == "alreadyconnected"
        || tag == Tag::AlreadyConnected
        || text.contains("connection is closed")
        || text.contains("closed connection")
    {
        FailureKind::AlreadyConnected
    } else if !text.trim().is_empty() {
        FailureKind::Generic(describe(err))
    } else {
        FailureKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Message(&'static str);

    impl fmt::Display for Message {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl Error for Message {}

    fn io(kind: io::ErrorKind, msg: &'static str) -> io::Error {
        io::Error::new(kind, Message(msg))
    }

    #[test]
    fn test_buffer_errors_are_io() {
        let err = TransportError::BufferUnderflow("short read".into());
        assert_eq!(classify(&err), FailureKind::IoError);

        let err = NetError::Stream(StreamError::Overflow {
            id: 1,
            total: 4,
            received: 5,
        });
        assert_eq!(classify(&err), FailureKind::IoError);
    }

    #[test]
    fn test_buffer_error_outranks_timeout_in_chain() {
        // A timeout wrapping a buffer error is still an I/O error.
        let err = io::Error::new(
            io::ErrorKind::TimedOut,
            TransportError::BufferOverflow("frame".into()),
        );
        assert_eq!(classify(&err), FailureKind::IoError);
    }

    #[test]
    fn test_version_mismatch() {
        assert_eq!(
            classify(&TransportError::VersionMismatch),
            FailureKind::ProtocolVersionMismatch
        );
        assert_eq!(
            classify(&Message("mismatch")),
            FailureKind::ProtocolVersionMismatch
        );
    }

    #[test]
    fn test_invalid_address() {
        for msg in [
            "port out of range: 70000",
            "Invalid argument",
            "invalid socket address syntax",
            "No address associated with hostname",
        ] {
            assert_eq!(classify(&Message(msg)), FailureKind::InvalidAddress, "{msg}");
        }
        assert_eq!(
            classify(&TransportError::InvalidAddress("ws://[".into())),
            FailureKind::InvalidAddress
        );
    }

    #[test]
    fn test_host_unreachable() {
        let refused = TransportError::ConnectFailed(io(
            io::ErrorKind::ConnectionRefused,
            "Connection refused (os error 111)",
        ));
        assert_eq!(classify(&refused), FailureKind::HostUnreachable);
        assert_eq!(
            classify(&Message("No route to host")),
            FailureKind::HostUnreachable
        );
        assert_eq!(
            classify(&TransportError::UnknownHost("nowhere".into())),
            FailureKind::HostUnreachable
        );
    }

    #[test]
    fn test_timeout() {
        assert_eq!(classify(&TransportError::TimedOut), FailureKind::TimedOut);
        let err = TransportError::ConnectFailed(io(
            io::ErrorKind::TimedOut,
            "operation took too long",
        ));
        assert_eq!(classify(&err), FailureKind::TimedOut);
    }

    #[test]
    fn test_already_connected() {
        assert_eq!(
            classify(&NetError::AlreadyConnected),
            FailureKind::AlreadyConnected
        );
        assert_eq!(
            classify(&Message("Connection is closed.")),
            FailureKind::AlreadyConnected
        );
        assert_eq!(
            classify(&Message("AlreadyConnected")),
            FailureKind::AlreadyConnected
        );
    }

    #[test]
    fn test_generic_keeps_full_description() {
        let err = TransportError::SendFailed(io(
            io::ErrorKind::BrokenPipe,
            "something odd happened",
        ));
        let kind = classify(&err);
        assert_eq!(
            kind,
            FailureKind::Generic("send failed: something odd happened".into())
        );
        assert!(kind.is_error());
        assert_eq!(kind.message_key(), "error.any");
    }

    #[test]
    fn test_empty_message_is_unknown() {
        let kind = classify(&Message(""));
        assert_eq!(kind, FailureKind::Unknown);
        assert!(!kind.is_error());
    }

    #[test]
    fn test_wrapped_version_mismatch() {
        let err = io::Error::new(
            io::ErrorKind::Other,
            TransportError::VersionMismatch,
        );
        assert_eq!(classify(&err), FailureKind::ProtocolVersionMismatch);
    }

    #[test]
    fn test_refused_outranks_timeout() {
        let err = io(io::ErrorKind::TimedOut, "connection refused after retry");
        assert_eq!(classify(&err), FailureKind::HostUnreachable);
    }

    #[test]
    fn test_describe_skips_repeated_causes() {
        let err = TransportError::ConnectFailed(io(
            io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(describe(&err), "connect failed: refused");
    }
}
