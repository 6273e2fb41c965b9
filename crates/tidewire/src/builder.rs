//! [`NetworkBuilder`]: wires the WebSocket providers into a
//! [`NetworkCore`].

use tidewire_net::{NetConfig, NetworkCore};
use tokio::runtime::Handle;

use crate::{ClientConfig, ServerConfig, TidewireError, WsClient, WsServer};

/// Builder for a [`NetworkCore`] backed by [`WsClient`] and [`WsServer`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use tidewire::prelude::*;
///
/// # fn run(runtime: tokio::runtime::Handle) -> Result<(), TidewireError> {
/// let mut net = NetworkBuilder::new()
///     .runtime(runtime)
///     .net_config(NetConfig::default().with_chunk_size(1024))
///     .client_config(ClientConfig {
///         connect_timeout: Duration::from_secs(3),
///         ..ClientConfig::default()
///     })
///     .build()?;
/// net.host(6567)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    net: NetConfig,
    client: ClientConfig,
    server: ServerConfig,
    runtime: Option<Handle>,
}

impl NetworkBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dispatch and stream settings of the core.
    pub fn net_config(mut self, config: NetConfig) -> Self {
        self.net = config;
        self
    }

    /// Sets the client provider's settings.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client = config;
        self
    }

    /// Sets the server provider's settings.
    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.server = config;
        self
    }

    /// Sets the runtime the providers spawn their tasks on.
    ///
    /// Without one, [`build`](Self::build) uses the runtime it is
    /// called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the core with both providers installed.
    ///
    /// # Errors
    /// Returns [`TidewireError::NoRuntime`] if no runtime was given and
    /// none is current.
    pub fn build(self) -> Result<NetworkCore, TidewireError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };
        tracing::debug!(
            chunk_size = self.net.stream_chunk_size,
            bind_host = %self.server.bind_host,
            "building network core"
        );

        Ok(NetworkCore::new(self.net)
            .with_client_provider(WsClient::new(runtime.clone(), self.client))
            .with_server_provider(WsServer::new(runtime, self.server)))
    }
}
