//! LZ4 compression for bulk state snapshots.
//!
//! Snapshots are compressed with the LZ4 block format. The block format
//! carries no length header; the receiver is told the uncompressed size
//! out of band (it travels alongside the snapshot in its packet).

use lz4_flex::block::{self, DecompressError};

use crate::TransportError;

/// Compresses a snapshot byte array.
pub fn compress_snapshot(input: &[u8]) -> Vec<u8> {
    block::compress(input)
}

/// Decompresses a snapshot produced by [`compress_snapshot`].
///
/// `size` is the uncompressed length announced by the sender.
///
/// # Errors
/// Returns [`TransportError::BufferOverflow`] when the data expands past
/// `size`, and [`TransportError::BufferUnderflow`] when it expands to
/// less than `size` or the input is otherwise malformed.
pub fn decompress_snapshot(
    input: &[u8],
    size: usize,
) -> Result<Vec<u8>, TransportError> {
    let out = block::decompress(input, size).map_err(|e| match e {
        DecompressError::OutputTooSmall { .. } => {
            TransportError::BufferOverflow(e.to_string())
        }
        _ => TransportError::BufferUnderflow(e.to_string()),
    })?;
    if out.len() != size {
        return Err(TransportError::BufferUnderflow(format!(
            "snapshot expanded to {} bytes, expected {size}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_compression() {
        let mut data = Vec::with_capacity(4096);
        data.extend(std::iter::repeat_n(3u8, 2048));
        data.extend((0..2048u32).map(|i| (i % 251) as u8));

        let packed = compress_snapshot(&data);
        let unpacked = decompress_snapshot(&packed, data.len()).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn test_repetitive_snapshot_shrinks() {
        let data = vec![0u8; 8192];
        let packed = compress_snapshot(&data);
        assert!(packed.len() < data.len() / 4);
    }

    #[test]
    fn test_declared_size_too_small_is_rejected() {
        let data = vec![9u8; 1024];
        let packed = compress_snapshot(&data);
        assert!(decompress_snapshot(&packed, 16).is_err());
    }

    #[test]
    fn test_declared_size_too_large_is_underflow() {
        let data = vec![5u8; 100];
        let packed = compress_snapshot(&data);
        let err = decompress_snapshot(&packed, 4096).unwrap_err();
        assert!(matches!(err, TransportError::BufferUnderflow(_)));
    }
}
