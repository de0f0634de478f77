//! Reassembly of a completed chunked upload
//!
//! Chunks are concatenated strictly by index, checked against the sizes the
//! client declared, and decompressed with the transform the client applied
//! before chunking.

use crate::error::{ExplorerError, Result};
use crate::upload::{Encoding, UploadSession};
use flate2::read::MultiGzDecoder;
use std::io::Read;
use tracing::debug;

/// Concatenate and decompress a complete upload.
///
/// Returns `Ok(None)` while chunks are still missing. Once the upload is
/// complete the chunk buffers are released whatever the outcome.
pub fn try_reassemble(upload: &mut UploadSession, max_decoded_bytes: u64) -> Result<Option<Vec<u8>>> {
    if !upload.is_complete() {
        return Ok(None);
    }

    let chunks = upload.take_chunks();
    let total: usize = chunks.values().map(Vec::len).sum();
    let mut compressed = Vec::with_capacity(total);
    for index in 0..upload.total_chunks {
        let chunk = chunks.get(&index).ok_or_else(|| {
            ExplorerError::MalformedChunk(format!("chunk {} missing at reassembly", index))
        })?;
        compressed.extend_from_slice(chunk);
    }
    drop(chunks);

    if let Some(expected) = upload.declared_total_size {
        if expected != compressed.len() as u64 {
            return Err(ExplorerError::SizeMismatch {
                what: "compressed",
                expected,
                actual: compressed.len() as u64,
            });
        }
    }

    let raw = decompress(compressed, upload.encoding, max_decoded_bytes)?;

    if let Some(expected) = upload.declared_original_size {
        if expected != raw.len() as u64 {
            return Err(ExplorerError::SizeMismatch {
                what: "decompressed",
                expected,
                actual: raw.len() as u64,
            });
        }
    }

    debug!(
        upload_id = %upload.upload_id,
        compressed = total,
        decompressed = raw.len(),
        "reassembled upload"
    );
    Ok(Some(raw))
}

/// Undo the client-side transform, refusing output beyond `max_len` bytes
pub fn decompress(data: Vec<u8>, encoding: Encoding, max_len: u64) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => {
            if data.len() as u64 > max_len {
                return Err(ExplorerError::TooLarge {
                    limit: max_len,
                    actual: data.len() as u64,
                });
            }
            Ok(data)
        }
        Encoding::Gzip => {
            let decoder = MultiGzDecoder::new(data.as_slice());
            let mut out = Vec::new();
            decoder
                .take(max_len.saturating_add(1))
                .read_to_end(&mut out)
                .map_err(|err| ExplorerError::Decompress(err.to_string()))?;
            if out.len() as u64 > max_len {
                return Err(ExplorerError::TooLarge {
                    limit: max_len,
                    actual: out.len() as u64,
                });
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture;
    use crate::upload::{ChunkMetadata, ChunkRequest};
    use std::time::Instant;

    fn upload_from(chunks: &[Vec<u8>], metadata: ChunkMetadata) -> UploadSession {
        let total = chunks.len() as u32;
        let first = ChunkRequest::new("u1", 0, total, chunks[0].clone(), metadata);
        let mut upload = UploadSession::new(&first, Instant::now());
        for (index, chunk) in chunks.iter().enumerate() {
            upload.insert_chunk(index as u32, chunk.clone());
        }
        upload
    }

    #[test]
    fn test_incomplete_upload_is_not_reassembled() {
        let data = fixture::gzip(b"hello world");
        let request = ChunkRequest::new("u1", 0, 2, data, ChunkMetadata::default());
        let mut upload = UploadSession::new(&request, Instant::now());
        upload.insert_chunk(0, request.payload.clone());
        assert!(try_reassemble(&mut upload, 1024).unwrap().is_none());
        assert_eq!(upload.received_count(), 1);
    }

    #[test]
    fn test_reassembles_in_index_order() {
        let original: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let chunks = fixture::split_even(&fixture::gzip(&original), 4);
        let metadata = ChunkMetadata {
            original_size: Some(original.len() as u64),
            ..ChunkMetadata::default()
        };

        let total = chunks.len() as u32;
        let first = ChunkRequest::new("u1", 0, total, chunks[0].clone(), metadata);
        let mut upload = UploadSession::new(&first, Instant::now());
        for index in (0..chunks.len()).rev() {
            upload.insert_chunk(index as u32, chunks[index].clone());
        }

        let raw = try_reassemble(&mut upload, 1 << 20).unwrap().unwrap();
        assert_eq!(raw, original);
        assert_eq!(upload.buffered_bytes(), 0);
    }

    #[test]
    fn test_original_size_mismatch() {
        let chunks = fixture::split_even(&fixture::gzip(b"0123456789"), 2);
        let metadata = ChunkMetadata {
            original_size: Some(11),
            ..ChunkMetadata::default()
        };
        let mut upload = upload_from(&chunks, metadata);
        let err = try_reassemble(&mut upload, 1024).unwrap_err();
        assert!(matches!(
            err,
            ExplorerError::SizeMismatch {
                what: "decompressed",
                expected: 11,
                actual: 10
            }
        ));
        assert!(err.is_terminal_upload_failure());
        assert_eq!(upload.buffered_bytes(), 0);
    }

    #[test]
    fn test_total_size_mismatch() {
        let compressed = fixture::gzip(b"0123456789");
        let metadata = ChunkMetadata {
            total_size: Some(compressed.len() as u64 + 1),
            ..ChunkMetadata::default()
        };
        let mut upload = upload_from(&fixture::split_even(&compressed, 2), metadata);
        assert!(matches!(
            try_reassemble(&mut upload, 1024),
            Err(ExplorerError::SizeMismatch {
                what: "compressed",
                ..
            })
        ));
    }

    #[test]
    fn test_corrupt_stream() {
        let garbage = b"this is not a gzip stream".to_vec();
        let mut upload = upload_from(&[garbage], ChunkMetadata::default());
        assert!(matches!(
            try_reassemble(&mut upload, 1 << 20),
            Err(ExplorerError::Decompress(_))
        ));
    }

    #[test]
    fn test_decompression_limit() {
        let compressed = fixture::gzip(&vec![0u8; 4096]);
        let err = decompress(compressed, Encoding::Gzip, 1024).unwrap_err();
        assert!(matches!(err, ExplorerError::TooLarge { limit: 1024, .. }));
    }

    #[test]
    fn test_identity_passthrough() {
        let data = b"raw log bytes".to_vec();
        assert_eq!(decompress(data.clone(), Encoding::Identity, 1024).unwrap(), data);
    }
}
