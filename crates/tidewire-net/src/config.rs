//! Configuration for the dispatch core.

use std::time::Duration;

/// Settings for a [`NetworkCore`](crate::NetworkCore).
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Bytes per `StreamChunk` when sending a stream. Default: 512.
    pub stream_chunk_size: usize,

    /// Largest stream a peer may announce in a `StreamBegin`.
    /// Default: 64 MiB.
    pub max_stream_size: usize,

    /// Delay between hosting and the first presence announcement.
    /// Default: 1 second.
    pub announce_delay: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: 512,
            max_stream_size: 64 * 1024 * 1024,
            announce_delay: Duration::from_secs(1),
        }
    }
}

impl NetConfig {
    /// Largest accepted chunk size.
    pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called by [`NetworkCore::new`](crate::NetworkCore::new). Rules:
    /// - `stream_chunk_size` clamped to `1..=MAX_CHUNK_SIZE`.
    /// - `max_stream_size` capped to `u32::MAX` (the wire length field).
    pub fn validated(mut self) -> Self {
        let chunk = self.stream_chunk_size.clamp(1, Self::MAX_CHUNK_SIZE);
        if chunk != self.stream_chunk_size {
            tracing::warn!(
                requested = self.stream_chunk_size,
                used = chunk,
                "stream_chunk_size out of range, clamping"
            );
            self.stream_chunk_size = chunk;
        }
        self.max_stream_size = self.max_stream_size.min(u32::MAX as usize);
        self
    }

    /// Sets the outgoing stream chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.stream_chunk_size = size;
        self
    }
}
