//! Settings for the WebSocket providers.

use std::time::Duration;

/// Settings for a [`WsClient`](crate::WsClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a connection attempt may take. Default: 5 seconds.
    pub connect_timeout: Duration,

    /// How long a host query may take. Default: 2 seconds.
    pub ping_timeout: Duration,

    /// Servers queried by discovery, as `(host, port)`.
    pub discovery_targets: Vec<(String, u16)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(2),
            discovery_targets: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Replaces zero timeouts with the defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.connect_timeout.is_zero() {
            tracing::warn!("connect_timeout is zero, using default");
            self.connect_timeout = defaults.connect_timeout;
        }
        if self.ping_timeout.is_zero() {
            tracing::warn!("ping_timeout is zero, using default");
            self.ping_timeout = defaults.ping_timeout;
        }
        self
    }

    /// Adds a server for discovery to query.
    pub fn discover(mut self, host: impl Into<String>, port: u16) -> Self {
        self.discovery_targets.push((host.into(), port));
        self
    }
}

/// Settings for a [`WsServer`](crate::WsServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported to host queries.
    pub name: String,

    /// Interface to listen on. Default: `0.0.0.0`.
    pub bind_host: String,

    /// How long a new peer has to say what it wants. Default: 5 seconds.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Tidewire server".to_string(),
            bind_host: "0.0.0.0".to_string(),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn validated(mut self) -> Self {
        if self.handshake_timeout.is_zero() {
            tracing::warn!("handshake_timeout is zero, using default");
            self.handshake_timeout = Self::default().handshake_timeout;
        }
        self
    }
}
