//! Stream transfers: splitting a large payload into a `StreamBegin` and a
//! run of `StreamChunk`s, and putting it back together on arrival.
//!
//! A transfer is keyed by the id in its `StreamBegin`. Chunks append in
//! arrival order (the reliable channel keeps them ordered). Once the
//! buffer holds exactly `total` bytes the transfer is removed and its
//! payload is materialized as a packet of the announced kind.
//!
//! Two conditions are protocol violations, not recoverable states:
//! a chunk whose id has no open transfer, and a chunk that would take
//! the buffer past `total`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tidewire_protocol::{
    Packet, PacketKind, ProtocolError, StreamBegin, StreamChunk,
};

/// Counter for outgoing transfer ids.
static NEXT_TRANSFER_ID: AtomicU32 = AtomicU32::new(1);

/// Errors raised while reassembling or splitting a stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A chunk arrived for a transfer that was never opened.
    #[error("received stream chunk for transfer {0} without a StreamBegin")]
    ChunkWithoutBegin(u32),

    /// A chunk would grow the transfer past its declared total.
    #[error(
        "buffer overflow in stream transfer {id}: {received} bytes received, {total} declared"
    )]
    Overflow {
        id: u32,
        total: usize,
        received: usize,
    },

    /// A transfer declared more bytes than this side accepts.
    #[error("stream transfer {id} is {total} bytes, limit is {limit}")]
    TooLarge { id: u32, total: usize, limit: usize },

    /// The payload could not be turned into a packet.
    #[error(transparent)]
    Materialize(#[from] ProtocolError),
}

// ---------------------------------------------------------------------------
// StreamTransfer
// ---------------------------------------------------------------------------

/// One transfer in progress.
#[derive(Debug)]
pub struct StreamTransfer {
    id: u32,
    kind: PacketKind,
    total: usize,
    buffer: Vec<u8>,
}

impl StreamTransfer {
    fn new(begin: StreamBegin) -> Self {
        let total = begin.total as usize;
        Self {
            id: begin.id,
            kind: begin.kind,
            total,
            buffer: Vec::with_capacity(total),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Declared length.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Fraction received, in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.buffer.len() as f32 / self.total as f32
        }
    }

    pub fn is_done(&self) -> bool {
        self.buffer.len() == self.total
    }

    fn into_packet(self) -> Result<Packet, StreamError> {
        Ok(Packet::from_stream(self.kind, self.buffer)?)
    }
}

// ---------------------------------------------------------------------------
// StreamReassembler
// ---------------------------------------------------------------------------

/// Rebuilds streamed payloads from their records.
#[derive(Debug)]
pub struct StreamReassembler {
    transfers: HashMap<u32, StreamTransfer>,
    max_size: usize,
}

impl StreamReassembler {
    /// Creates a reassembler that refuses transfers above `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            transfers: HashMap::new(),
            max_size,
        }
    }

    /// Opens a transfer.
    ///
    /// A transfer that declares zero bytes is complete on arrival and its
    /// packet is returned immediately. Reusing an open id replaces the
    /// earlier transfer.
    ///
    /// # Errors
    /// - [`StreamError::TooLarge`] if `total` exceeds the limit.
    /// - [`StreamError::Materialize`] if `kind` cannot be streamed.
    pub fn begin(
        &mut self,
        begin: StreamBegin,
    ) -> Result<Option<Packet>, StreamError> {
        if !begin.kind.is_streamable() {
            return Err(ProtocolError::NotStreamable(begin.kind).into());
        }
        let total = begin.total as usize;
        if total > self.max_size {
            return Err(StreamError::TooLarge {
                id: begin.id,
                total,
                limit: self.max_size,
            });
        }

        if self.transfers.remove(&begin.id).is_some() {
            tracing::warn!(id = begin.id, "stream id reused, dropping earlier transfer");
        }
        let transfer = StreamTransfer::new(begin);
        if transfer.is_done() {
            return transfer.into_packet().map(Some);
        }
        self.transfers.insert(begin.id, transfer);
        tracing::debug!(id = begin.id, total, kind = %begin.kind, "stream started");
        Ok(None)
    }

    /// Appends a chunk, returning the materialized packet once the
    /// transfer is complete.
    ///
    /// # Errors
    /// - [`StreamError::ChunkWithoutBegin`] if no transfer has this id.
    /// - [`StreamError::Overflow`] if the chunk would exceed the declared
    ///   total. The transfer is discarded and nothing is appended.
    pub fn chunk(
        &mut self,
        chunk: StreamChunk,
    ) -> Result<Option<Packet>, StreamError> {
        let Some(transfer) = self.transfers.get_mut(&chunk.id) else {
            return Err(StreamError::ChunkWithoutBegin(chunk.id));
        };

        let received = transfer.buffer.len() + chunk.data.len();
        if received > transfer.total {
            let total = transfer.total;
            self.transfers.remove(&chunk.id);
            return Err(StreamError::Overflow {
                id: chunk.id,
                total,
                received,
            });
        }

        transfer.buffer.extend_from_slice(&chunk.data);
        if !transfer.is_done() {
            return Ok(None);
        }

        match self.transfers.remove(&chunk.id) {
            Some(done) => {
                tracing::debug!(id = chunk.id, total = done.total, "stream complete");
                done.into_packet().map(Some)
            }
            None => Ok(None),
        }
    }

    /// The transfer with this id, if it is still open.
    pub fn transfer(&self, id: u32) -> Option<&StreamTransfer> {
        self.transfers.get(&id)
    }

    /// Number of open transfers.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Drops every open transfer.
    pub fn clear(&mut self) {
        self.transfers.clear();
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Splits `data` into the records of one stream transfer.
///
/// Yields a `StreamBegin` with a fresh transfer id followed by
/// `StreamChunk`s of at most `chunk_size` bytes. Every record must go
/// over the reliable channel, in order.
///
/// # Errors
/// - [`StreamError::Materialize`] if `kind` cannot be streamed.
/// - [`StreamError::TooLarge`] if `data` does not fit the wire length.
pub fn chunk_stream(
    kind: PacketKind,
    data: &[u8],
    chunk_size: usize,
) -> Result<impl Iterator<Item = Packet> + '_, StreamError> {
    if !kind.is_streamable() {
        return Err(ProtocolError::NotStreamable(kind).into());
    }
    let id = NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed);
    let total = u32::try_from(data.len()).map_err(|_| StreamError::TooLarge {
        id,
        total: data.len(),
        limit: u32::MAX as usize,
    })?;

    let begin = StreamBegin { id, total, kind };
    let chunks = data.chunks(chunk_size.max(1)).map(move |slice| {
        Packet::from(StreamChunk {
            id,
            data: slice.to_vec(),
        })
    });
    Ok(std::iter::once(Packet::from(begin)).chain(chunks))
}

#[cfg(test)]
mod tests {
    use tidewire_protocol::WorldStream;

    use super::*;

    const MAX: usize = 1024 * 1024;

    fn begin(id: u32, total: u32) -> StreamBegin {
        StreamBegin {
            id,
            total,
            kind: PacketKind::WorldStream,
        }
    }

    fn chunk(id: u32, data: &[u8]) -> StreamChunk {
        StreamChunk {
            id,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_reassembles_in_order() {
        let mut streams = StreamReassembler::new(MAX);
        assert!(streams.begin(begin(5, 6)).unwrap().is_none());
        assert!(streams.chunk(chunk(5, &[1, 2])).unwrap().is_none());
        assert!(streams.chunk(chunk(5, &[3, 4])).unwrap().is_none());

        let packet = streams.chunk(chunk(5, &[5, 6])).unwrap().unwrap();
        assert_eq!(
            packet,
            WorldStream {
                data: vec![1, 2, 3, 4, 5, 6]
            }
            .into()
        );
        assert!(streams.is_empty());
    }

    #[test]
    fn test_chunk_without_begin_is_error() {
        let mut streams = StreamReassembler::new(MAX);
        let err = streams.chunk(chunk(9, &[1])).unwrap_err();
        assert!(matches!(err, StreamError::ChunkWithoutBegin(9)));
    }

    #[test]
    fn test_overflow_discards_transfer() {
        let mut streams = StreamReassembler::new(MAX);
        streams.begin(begin(1, 4)).unwrap();
        streams.chunk(chunk(1, &[1, 2, 3])).unwrap();

        let err = streams.chunk(chunk(1, &[4, 5])).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Overflow {
                id: 1,
                total: 4,
                received: 5
            }
        ));
        assert!(streams.transfer(1).is_none());
    }

    #[test]
    fn test_interleaved_transfers_are_independent() {
        let mut streams = StreamReassembler::new(MAX);
        streams.begin(begin(1, 2)).unwrap();
        streams.begin(begin(2, 2)).unwrap();
        streams.chunk(chunk(2, &[20])).unwrap();
        streams.chunk(chunk(1, &[10])).unwrap();
        assert_eq!(streams.len(), 2);

        let first = streams.chunk(chunk(1, &[11])).unwrap().unwrap();
        assert_eq!(first, WorldStream { data: vec![10, 11] }.into());
        let second = streams.chunk(chunk(2, &[21])).unwrap().unwrap();
        assert_eq!(second, WorldStream { data: vec![20, 21] }.into());
    }

    #[test]
    fn test_duplicate_begin_replaces_transfer() {
        let mut streams = StreamReassembler::new(MAX);
        streams.begin(begin(1, 4)).unwrap();
        streams.chunk(chunk(1, &[9, 9, 9])).unwrap();

        streams.begin(begin(1, 2)).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams.transfer(1).unwrap().received(), 0);
        let packet = streams.chunk(chunk(1, &[1, 2])).unwrap().unwrap();
        assert_eq!(packet, WorldStream { data: vec![1, 2] }.into());
    }

    #[test]
    fn test_empty_transfer_completes_on_begin() {
        let mut streams = StreamReassembler::new(MAX);
        let packet = streams.begin(begin(3, 0)).unwrap().unwrap();
        assert_eq!(packet, WorldStream::default().into());
        assert!(streams.is_empty());
    }

    #[test]
    fn test_zero_length_begin_replaces_open_transfer() {
        let mut streams = StreamReassembler::new(MAX);
        streams.begin(begin(1, 4)).unwrap();
        streams.chunk(chunk(1, &[9, 9])).unwrap();

        let packet = streams.begin(begin(1, 0)).unwrap().unwrap();
        assert_eq!(packet, WorldStream::default().into());
        assert!(streams.is_empty());
        assert!(matches!(
            streams.chunk(chunk(1, &[9, 9])),
            Err(StreamError::ChunkWithoutBegin(1))
        ));
    }

    #[test]
    fn test_too_large_is_refused() {
        let mut streams = StreamReassembler::new(8);
        let err = streams.begin(begin(1, 9)).unwrap_err();
        assert!(matches!(err, StreamError::TooLarge { limit: 8, .. }));
        assert!(streams.is_empty());
    }

    #[test]
    fn test_unstreamable_kind_is_refused() {
        let mut streams = StreamReassembler::new(MAX);
        let err = streams
            .begin(StreamBegin {
                id: 1,
                total: 4,
                kind: PacketKind::Kick,
            })
            .unwrap_err();
        assert!(matches!(err, StreamError::Materialize(_)));
    }

    #[test]
    fn test_progress() {
        let mut streams = StreamReassembler::new(MAX);
        streams.begin(begin(1, 4)).unwrap();
        streams.chunk(chunk(1, &[0])).unwrap();
        let transfer = streams.transfer(1).unwrap();
        assert_eq!(transfer.received(), 1);
        assert!((transfer.progress() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_chunk_stream_splits_at_chunk_size() {
        let data = vec![7u8; 1200];
        let records: Vec<_> =
            chunk_stream(PacketKind::WorldStream, &data, 512).unwrap().collect();
        assert_eq!(records.len(), 4);

        let Packet::StreamBegin(head) = &records[0] else {
            panic!("first record must be StreamBegin");
        };
        assert_eq!(head.total, 1200);
        let sizes: Vec<_> = records[1..]
            .iter()
            .map(|p| match p {
                Packet::StreamChunk(c) => {
                    assert_eq!(c.id, head.id);
                    c.data.len()
                }
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![512, 512, 176]);
    }

    #[test]
    fn test_chunk_stream_round_trips_through_reassembler() {
        let data: Vec<u8> = (0..=255).cycle().take(2000).collect();
        let mut streams = StreamReassembler::new(MAX);
        let mut out = None;
        for record in chunk_stream(PacketKind::WorldStream, &data, 512).unwrap() {
            out = match record {
                Packet::StreamBegin(b) => streams.begin(b).unwrap(),
                Packet::StreamChunk(c) => streams.chunk(c).unwrap(),
                other => panic!("unexpected record {other:?}"),
            };
        }
        assert_eq!(out, Some(WorldStream { data }.into()));
    }

    #[test]
    fn test_chunk_stream_ids_are_fresh() {
        let first: Vec<_> =
            chunk_stream(PacketKind::WorldStream, &[1], 512).unwrap().collect();
        let second: Vec<_> =
            chunk_stream(PacketKind::WorldStream, &[1], 512).unwrap().collect();
        let (Packet::StreamBegin(a), Packet::StreamBegin(b)) =
            (&first[0], &second[0])
        else {
            panic!("expected StreamBegin records");
        };
        assert_ne!(a.id, b.id);
    }
}
