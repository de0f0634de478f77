//! Chunked upload behaviour through the library API

mod common;

use common::fixture;
use mav_explorer::{
    try_reassemble, ChunkMetadata, ChunkReceiver, ChunkRequest, ChunkResponse, DataFlashDecoder,
    ExplorerError, SessionCache, UploadLimits, UploadRegistry,
};
use mav_explorer::upload::Accepted;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn receiver() -> ChunkReceiver {
    let sessions = Arc::new(SessionCache::new(Arc::new(DataFlashDecoder::new()), 0));
    ChunkReceiver::new(UploadLimits::default(), sessions)
}

fn metadata(raw: &[u8], compressed: &[u8]) -> ChunkMetadata {
    ChunkMetadata {
        original_filename: Some("flight.bin".to_string()),
        original_size: Some(raw.len() as u64),
        total_size: Some(compressed.len() as u64),
        ..ChunkMetadata::default()
    }
}

fn request(upload_id: &str, index: usize, chunks: &[Vec<u8>], metadata: &ChunkMetadata) -> ChunkRequest {
    ChunkRequest::new(
        upload_id,
        index as u32,
        chunks.len() as u32,
        chunks[index].clone(),
        metadata.clone(),
    )
}

#[test]
fn test_three_chunks_out_of_order() {
    let raw = fixture::large_log(7_200_000);
    let compressed = fixture::gzip_stored(&raw);
    let chunks = fixture::split_sizes(&compressed, &[3_500_000, 3_500_000, compressed.len()]);
    assert_eq!(chunks.len(), 3);
    let meta = metadata(&raw, &compressed);
    let receiver = receiver();

    for index in [2, 0] {
        match receiver.receive_chunk(request("big", index, &chunks, &meta)).unwrap() {
            ChunkResponse::Ack(ack) => assert!(ack.received),
            ChunkResponse::Final(_) => panic!("chunk {} completed the upload early", index),
        }
    }
    let result = match receiver.receive_chunk(request("big", 1, &chunks, &meta)).unwrap() {
        ChunkResponse::Final(result) => result,
        ChunkResponse::Ack(_) => panic!("last chunk did not complete the upload"),
    };

    assert!(!result.token.is_empty());
    assert!(!result.analysis.messages.is_empty());
    assert!(result.analysis.messages["ATT"].count > 200_000);
    assert_eq!(receiver.registry().in_flight(), 0);
    assert!(receiver.sessions().get_session(&result.token).is_ok());
}

#[test]
fn test_reassembly_is_order_independent() {
    let raw = fixture::standard_log();
    let compressed = fixture::gzip(&raw);
    let chunks = fixture::split_even(&compressed, 4);
    let meta = metadata(&raw, &compressed);
    let orders: [[usize; 4]; 6] = [
        [0, 1, 2, 3],
        [3, 2, 1, 0],
        [1, 3, 0, 2],
        [2, 0, 3, 1],
        [3, 0, 1, 2],
        [1, 2, 3, 0],
    ];

    for order in orders {
        let registry = UploadRegistry::new(UploadLimits::default());
        let mut completed = None;
        for (n, &index) in order.iter().enumerate() {
            match registry.accept_chunk(request("u", index, &chunks, &meta)).unwrap() {
                Accepted::Pending(ack) => assert_eq!(ack.received_chunks, n + 1),
                Accepted::Complete(upload) => completed = Some(upload),
            }
        }
        let mut upload = completed.expect("upload should complete on the last chunk");
        let bytes = try_reassemble(&mut upload, 1 << 20).unwrap().unwrap();
        assert_eq!(bytes, raw, "order {:?}", order);
    }
}

#[test]
fn test_duplicate_chunks_are_idempotent() {
    let raw = fixture::standard_log();
    let compressed = fixture::gzip(&raw);
    let chunks = fixture::split_even(&compressed, 3);
    let meta = metadata(&raw, &compressed);
    let receiver = receiver();

    for index in [0, 0, 2, 2, 0] {
        assert!(matches!(
            receiver.receive_chunk(request("dup", index, &chunks, &meta)).unwrap(),
            ChunkResponse::Ack(_)
        ));
    }
    match receiver.receive_chunk(request("dup", 1, &chunks, &meta)).unwrap() {
        ChunkResponse::Final(result) => {
            assert_eq!(result.analysis.messages["ATT"].count, 41);
            assert_eq!(result.analysis.flight_modes.len(), 2);
        }
        ChunkResponse::Ack(_) => panic!("upload should be complete"),
    }
}

#[test]
fn test_size_mismatch_discards_upload() {
    let raw = fixture::standard_log();
    let compressed = fixture::gzip(&raw);
    let chunks = fixture::split_even(&compressed, 2);
    let mut meta = metadata(&raw, &compressed);
    meta.original_size = Some(raw.len() as u64 + 1);
    let receiver = receiver();

    receiver.receive_chunk(request("bad", 0, &chunks, &meta)).unwrap();
    let err = receiver.receive_chunk(request("bad", 1, &chunks, &meta)).unwrap_err();
    assert!(matches!(err, ExplorerError::SizeMismatch { .. }));
    assert!(err.to_string().contains("re-upload"));
    assert_eq!(receiver.registry().in_flight(), 0);
    assert!(receiver.sessions().is_empty());

    // the same id starts over
    match receiver.receive_chunk(request("bad", 1, &chunks, &meta)).unwrap() {
        ChunkResponse::Ack(ack) => assert_eq!(ack.received_chunks, 1),
        ChunkResponse::Final(_) => panic!("a discarded upload must not keep its chunks"),
    }
}

#[test]
fn test_undecodable_log_is_terminal() {
    let raw = b"this is not a DataFlash log at all".to_vec();
    let compressed = fixture::gzip(&raw);
    let chunks = vec![compressed.clone()];
    let meta = metadata(&raw, &compressed);
    let receiver = receiver();

    let err = receiver.receive_chunk(request("junk", 0, &chunks, &meta)).unwrap_err();
    assert!(matches!(err, ExplorerError::Decode(_)));
    assert!(err.is_terminal_upload_failure());
    assert_eq!(receiver.registry().in_flight(), 0);
}

#[test]
fn test_concurrent_uploads_complete_once() {
    let raw = fixture::standard_log();
    let compressed = fixture::gzip(&raw);
    let chunks = fixture::split_even(&compressed, 8);
    let meta = metadata(&raw, &compressed);
    let receiver = receiver();

    let finals: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["a", "b"]
            .iter()
            .flat_map(|upload_id| (0..chunks.len()).map(move |index| (*upload_id, index)))
            .map(|(upload_id, index)| {
                let receiver = &receiver;
                let chunks = &chunks;
                let meta = &meta;
                scope.spawn(move || receiver.receive_chunk(request(upload_id, index, chunks, meta)))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| match handle.join().unwrap().unwrap() {
                ChunkResponse::Final(result) => Some(result.token),
                ChunkResponse::Ack(_) => None,
            })
            .collect()
    });

    assert_eq!(finals.len(), 2);
    assert_ne!(finals[0], finals[1]);
    assert_eq!(receiver.sessions().len(), 2);
    assert_eq!(receiver.registry().in_flight(), 0);
}

#[test]
fn test_sweep_racing_a_chunk_never_loses_it() {
    let start = Instant::now();
    let limits = UploadLimits {
        upload_ttl: Duration::from_secs(5),
        ..UploadLimits::default()
    };
    let part = |upload_id: &str, index: u32, total: u32| {
        ChunkRequest::new(upload_id, index, total, vec![index as u8 + 1], ChunkMetadata::default())
    };

    for _ in 0..2_000 {
        let registry = UploadRegistry::new(limits);
        registry.accept_chunk_at(part("u", 0, 3), start).unwrap();

        // the second request's sweep sees "u" idle past the TTL
        let (ack, _) = std::thread::scope(|scope| {
            let a = scope.spawn(|| registry.accept_chunk_at(part("u", 1, 3), start + Duration::from_secs(5)));
            let b = scope.spawn(|| registry.accept_chunk_at(part("v", 0, 1), start + Duration::from_secs(6)));
            (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
        });
        let acked = match ack {
            Accepted::Pending(ack) => ack.received_chunks,
            Accepted::Complete(_) => panic!("upload cannot be complete after two of three chunks"),
        };

        // every acknowledged chunk is still buffered
        match registry
            .accept_chunk_at(part("u", 2, 3), start + Duration::from_secs(6))
            .unwrap()
        {
            Accepted::Pending(next) => assert_eq!(next.received_chunks, acked + 1),
            Accepted::Complete(upload) => {
                assert_eq!(acked, 2);
                assert_eq!(upload.received_count(), 3);
            }
        }
    }
}
