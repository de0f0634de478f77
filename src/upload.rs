//! Chunked upload reception
//!
//! Clients compress a log, cut it into chunks and POST each chunk as an
//! independent request tagged with a client-generated upload id. Chunks may
//! arrive in any order and over concurrent connections. The chunk completing
//! the set detaches the upload from the registry, which happens at most once,
//! and the caller then reassembles and decodes it synchronously.

use crate::error::{ExplorerError, Result};
use crate::reassembly::try_reassemble;
use crate::session::SessionCache;
use crate::types::AnalysisSummary;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transform the client applied before chunking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Gzip,
    Identity,
}

impl FromStr for Encoding {
    type Err = ExplorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "gzip" => Ok(Encoding::Gzip),
            "identity" | "none" => Ok(Encoding::Identity),
            other => Err(ExplorerError::MalformedChunk(format!(
                "unsupported encoding '{}'",
                other
            ))),
        }
    }
}

/// Descriptive fields sent with every chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkMetadata {
    pub original_filename: Option<String>,
    /// Size of the log before compression
    pub original_size: Option<u64>,
    /// Size of the compressed stream (sum of all chunks)
    pub total_size: Option<u64>,
    pub encoding: Encoding,
}

/// One chunk POST
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Vec<u8>,
    pub metadata: ChunkMetadata,
}

impl ChunkRequest {
    pub fn new(
        upload_id: impl Into<String>,
        chunk_index: u32,
        total_chunks: u32,
        payload: Vec<u8>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            chunk_index,
            total_chunks,
            payload,
            metadata,
        }
    }

    /// Checks that need no upload state
    fn validate(&self, max_upload_bytes: u64) -> Result<()> {
        if self.upload_id.trim().is_empty() {
            return Err(ExplorerError::MalformedChunk("upload_id is required".into()));
        }
        if self.total_chunks == 0 {
            return Err(ExplorerError::MalformedChunk(
                "total_chunks must be greater than 0".into(),
            ));
        }
        if self.chunk_index >= self.total_chunks {
            return Err(ExplorerError::MalformedChunk(format!(
                "chunk_index {} out of range for {} chunks",
                self.chunk_index, self.total_chunks
            )));
        }
        if self.payload.is_empty() {
            return Err(ExplorerError::MalformedChunk("chunk payload is empty".into()));
        }
        if let Some(total) = self.metadata.total_size {
            if total > max_upload_bytes {
                return Err(ExplorerError::TooLarge {
                    limit: max_upload_bytes,
                    actual: total,
                });
            }
        }
        Ok(())
    }
}

/// Reply to a chunk that did not complete its upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkAck {
    pub received: bool,
    pub chunk_index: u32,
    pub received_chunks: usize,
    pub total_chunks: u32,
}

/// Reply to the chunk that completed its upload
#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub token: String,
    pub analysis: AnalysisSummary,
}

/// Outcome of `ChunkReceiver::receive_chunk`
#[derive(Debug, Clone)]
pub enum ChunkResponse {
    Ack(ChunkAck),
    Final(FinalResult),
}

/// In-flight upload
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub total_chunks: u32,
    pub original_filename: Option<String>,
    pub declared_original_size: Option<u64>,
    pub declared_total_size: Option<u64>,
    pub encoding: Encoding,
    pub created_at: Instant,
    pub last_activity: Instant,
    chunks: BTreeMap<u32, Vec<u8>>,
    buffered_bytes: u64,
    state: UploadState,
}

/// Whether an upload entry still accepts chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadState {
    Open,
    /// Detached by the completing chunk
    Completed,
    /// Dropped by the inactivity sweep
    Expired,
}

impl UploadSession {
    /// Start an upload from its first-seen chunk (the payload is not stored)
    pub fn new(first: &ChunkRequest, now: Instant) -> Self {
        Self {
            upload_id: first.upload_id.clone(),
            total_chunks: first.total_chunks,
            original_filename: first.metadata.original_filename.clone(),
            declared_original_size: first.metadata.original_size,
            declared_total_size: first.metadata.total_size,
            encoding: first.metadata.encoding,
            created_at: now,
            last_activity: now,
            chunks: BTreeMap::new(),
            buffered_bytes: 0,
            state: UploadState::Open,
        }
    }

    /// Store a chunk; re-sending an index replaces the earlier payload
    pub fn insert_chunk(&mut self, index: u32, payload: Vec<u8>) {
        self.buffered_bytes += payload.len() as u64;
        if let Some(previous) = self.chunks.insert(index, payload) {
            self.buffered_bytes -= previous.len() as u64;
        }
    }

    /// Distinct chunk indices received so far
    pub fn received_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() == self.total_chunks as usize
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    /// Move the chunk buffers out, leaving the session empty
    pub fn take_chunks(&mut self) -> BTreeMap<u32, Vec<u8>> {
        self.buffered_bytes = 0;
        std::mem::take(&mut self.chunks)
    }

    fn fill_missing_metadata(&mut self, metadata: &ChunkMetadata) {
        if self.original_filename.is_none() {
            self.original_filename = metadata.original_filename.clone();
        }
        if self.declared_original_size.is_none() {
            self.declared_original_size = metadata.original_size;
        }
        if self.declared_total_size.is_none() {
            self.declared_total_size = metadata.total_size;
        }
    }

    /// Bytes the upload would buffer after storing `payload_len` at `index`
    fn projected_bytes(&self, index: u32, payload_len: usize) -> u64 {
        let replaced = self.chunks.get(&index).map_or(0, |c| c.len() as u64);
        self.buffered_bytes - replaced + payload_len as u64
    }
}

/// Size and lifetime limits for in-flight uploads
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    /// Compressed bytes buffered per upload
    pub max_upload_bytes: u64,
    /// Bytes produced by decompression
    pub max_decoded_bytes: u64,
    /// Inactivity after which a partial upload is dropped
    pub upload_ttl: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * 1024 * 1024,
            max_decoded_bytes: 512 * 1024 * 1024,
            upload_ttl: Duration::from_secs(600),
        }
    }
}

/// Result of storing one chunk in the registry
#[derive(Debug)]
pub enum Accepted {
    Pending(ChunkAck),
    /// The upload is complete and no longer in the registry
    Complete(UploadSession),
}

/// Outcome of storing into one registry entry
enum Stored {
    Accepted(Accepted),
    /// The entry was swept; the request is handed back for a fresh lookup
    Expired(ChunkRequest),
}

/// Process-wide map of in-flight uploads.
///
/// The outer lock only guards lookup, insertion and removal; chunk insertion
/// is serialized by the per-upload lock. The outer lock is never requested
/// while a per-upload lock is held.
#[derive(Debug, Default)]
pub struct UploadRegistry {
    uploads: Mutex<HashMap<String, Arc<Mutex<UploadSession>>>>,
    limits: UploadLimits,
}

impl UploadRegistry {
    pub fn new(limits: UploadLimits) -> Self {
        Self {
            uploads: Mutex::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Number of uploads currently buffered
    pub fn in_flight(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Store one chunk, detaching the upload when it becomes complete
    pub fn accept_chunk(&self, request: ChunkRequest) -> Result<Accepted> {
        self.accept_chunk_at(request, Instant::now())
    }

    pub fn accept_chunk_at(&self, request: ChunkRequest, now: Instant) -> Result<Accepted> {
        request.validate(self.limits.max_upload_bytes)?;
        self.sweep_expired_at(now);

        let mut request = request;
        loop {
            let entry = {
                let mut uploads = self.uploads.lock();
                uploads
                    .entry(request.upload_id.clone())
                    .or_insert_with(|| {
                        debug!(upload_id = %request.upload_id, total_chunks = request.total_chunks, "new upload");
                        Arc::new(Mutex::new(UploadSession::new(&request, now)))
                    })
                    .clone()
            };
            match self.store_chunk(&entry, request, now)? {
                Stored::Accepted(accepted) => return Ok(accepted),
                Stored::Expired(returned) => {
                    // swept between lookup and lock; the id starts over
                    debug!(upload_id = %returned.upload_id, "upload expired before chunk was stored");
                    request = returned;
                }
            }
        }
    }

    /// Store a chunk into a looked-up entry, detaching it when complete
    fn store_chunk(
        &self,
        entry: &Arc<Mutex<UploadSession>>,
        request: ChunkRequest,
        now: Instant,
    ) -> Result<Stored> {
        let mut upload = entry.lock();
        match upload.state {
            UploadState::Open => {}
            UploadState::Expired => return Ok(Stored::Expired(request)),
            UploadState::Completed => {
                return Err(ExplorerError::UploadConflict(request.upload_id));
            }
        }
        if upload.total_chunks != request.total_chunks {
            return Err(ExplorerError::MalformedChunk(format!(
                "total_chunks {} does not match {} declared for upload {}",
                request.total_chunks, upload.total_chunks, request.upload_id
            )));
        }
        let projected = upload.projected_bytes(request.chunk_index, request.payload.len());
        if projected > self.limits.max_upload_bytes {
            return Err(ExplorerError::TooLarge {
                limit: self.limits.max_upload_bytes,
                actual: projected,
            });
        }

        upload.fill_missing_metadata(&request.metadata);
        upload.insert_chunk(request.chunk_index, request.payload);
        upload.last_activity = now;
        debug!(
            upload_id = %upload.upload_id,
            chunk_index = request.chunk_index,
            received = upload.received_count(),
            total = upload.total_chunks,
            "chunk stored"
        );

        if !upload.is_complete() {
            return Ok(Stored::Accepted(Accepted::Pending(ChunkAck {
                received: true,
                chunk_index: request.chunk_index,
                received_chunks: upload.received_count(),
                total_chunks: upload.total_chunks,
            })));
        }

        upload.state = UploadState::Completed;
        let detached = UploadSession {
            upload_id: upload.upload_id.clone(),
            total_chunks: upload.total_chunks,
            original_filename: upload.original_filename.take(),
            declared_original_size: upload.declared_original_size,
            declared_total_size: upload.declared_total_size,
            encoding: upload.encoding,
            created_at: upload.created_at,
            last_activity: now,
            buffered_bytes: upload.buffered_bytes,
            chunks: upload.take_chunks(),
            state: UploadState::Completed,
        };
        drop(upload);

        let mut uploads = self.uploads.lock();
        if uploads
            .get(&detached.upload_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            uploads.remove(&detached.upload_id);
        }
        Ok(Stored::Accepted(Accepted::Complete(detached)))
    }

    /// Drop uploads idle for longer than the TTL; returns how many were dropped
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.limits.upload_ttl;
        let mut uploads = self.uploads.lock();
        let before = uploads.len();
        uploads.retain(|upload_id, entry| {
            // a locked upload is receiving a chunk right now
            let Some(mut upload) = entry.try_lock() else {
                return true;
            };
            let idle = now.saturating_duration_since(upload.last_activity);
            if idle > ttl {
                warn!(
                    upload_id = %upload_id,
                    received = upload.received_count(),
                    total = upload.total_chunks,
                    idle_secs = idle.as_secs(),
                    "dropping abandoned upload"
                );
                // a request holding a clone of this entry must not store into it
                upload.state = UploadState::Expired;
                upload.take_chunks();
                false
            } else {
                true
            }
        });
        before - uploads.len()
    }
}

/// Chunk endpoint logic: registry, reassembly and session creation
pub struct ChunkReceiver {
    registry: UploadRegistry,
    sessions: Arc<SessionCache>,
}

impl ChunkReceiver {
    pub fn new(limits: UploadLimits, sessions: Arc<SessionCache>) -> Self {
        Self {
            registry: UploadRegistry::new(limits),
            sessions,
        }
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    /// Store a chunk; the completing chunk decodes the log and returns the analysis.
    ///
    /// Blocks for the whole decode when the chunk completes the upload.
    pub fn receive_chunk(&self, request: ChunkRequest) -> Result<ChunkResponse> {
        let mut upload = match self.registry.accept_chunk(request)? {
            Accepted::Pending(ack) => return Ok(ChunkResponse::Ack(ack)),
            Accepted::Complete(upload) => upload,
        };

        let upload_id = upload.upload_id.clone();
        let result = try_reassemble(&mut upload, self.registry.limits.max_decoded_bytes)
            .and_then(|raw| {
                raw.ok_or_else(|| {
                    ExplorerError::MalformedChunk(format!("upload {} is incomplete", upload_id))
                })
            })
            .and_then(|raw| {
                self.sessions
                    .create_session(&raw, upload.original_filename.clone())
            });

        match result {
            Ok(session) => {
                info!(
                    upload_id = %upload_id,
                    token = %session.token,
                    chunks = upload.total_chunks,
                    "upload decoded"
                );
                Ok(ChunkResponse::Final(FinalResult {
                    token: session.token.clone(),
                    analysis: session.summary(),
                }))
            }
            Err(err) => {
                warn!(upload_id = %upload_id, error = %err, "upload failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(upload_id: &str, index: u32, total: u32, payload: &[u8]) -> ChunkRequest {
        ChunkRequest::new(upload_id, index, total, payload.to_vec(), ChunkMetadata::default())
    }

    fn registry() -> UploadRegistry {
        UploadRegistry::new(UploadLimits::default())
    }

    #[test]
    fn test_rejects_bad_metadata() {
        let registry = registry();
        let cases = [
            chunk("", 0, 2, b"x"),
            chunk("u", 0, 0, b"x"),
            chunk("u", 2, 2, b"x"),
            chunk("u", 0, 2, b""),
        ];
        for request in cases {
            assert!(matches!(
                registry.accept_chunk(request),
                Err(ExplorerError::MalformedChunk(_))
            ));
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_total_chunks_mismatch_keeps_upload_open() {
        let registry = registry();
        registry.accept_chunk(chunk("u", 0, 3, b"a")).unwrap();
        assert!(matches!(
            registry.accept_chunk(chunk("u", 1, 4, b"b")),
            Err(ExplorerError::MalformedChunk(_))
        ));
        assert_eq!(registry.in_flight(), 1);

        registry.accept_chunk(chunk("u", 1, 3, b"b")).unwrap();
        assert!(matches!(
            registry.accept_chunk(chunk("u", 2, 3, b"c")).unwrap(),
            Accepted::Complete(_)
        ));
    }

    #[test]
    fn test_duplicate_chunk_does_not_complete_early() {
        let registry = registry();
        registry.accept_chunk(chunk("u", 0, 3, b"a")).unwrap();
        match registry.accept_chunk(chunk("u", 0, 3, b"a")).unwrap() {
            Accepted::Pending(ack) => assert_eq!(ack.received_chunks, 1),
            Accepted::Complete(_) => panic!("duplicate chunk completed the upload"),
        }
        match registry.accept_chunk(chunk("u", 2, 3, b"c")).unwrap() {
            Accepted::Pending(ack) => assert_eq!(ack.received_chunks, 2),
            Accepted::Complete(_) => panic!("one missing index completed the upload"),
        }
        match registry.accept_chunk(chunk("u", 1, 3, b"b")).unwrap() {
            Accepted::Complete(mut upload) => {
                assert_eq!(upload.received_count(), 3);
                assert_eq!(upload.buffered_bytes(), 3);
                let chunks = upload.take_chunks();
                assert_eq!(chunks.get(&0).map(Vec::as_slice), Some(&b"a"[..]));
            }
            Accepted::Pending(_) => panic!("upload should be complete"),
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_size_limit() {
        let registry = UploadRegistry::new(UploadLimits {
            max_upload_bytes: 4,
            ..UploadLimits::default()
        });
        registry.accept_chunk(chunk("u", 0, 3, b"abc")).unwrap();
        assert!(matches!(
            registry.accept_chunk(chunk("u", 1, 3, b"de")),
            Err(ExplorerError::TooLarge { limit: 4, actual: 5 })
        ));
        // replacing chunk 0 with a smaller payload still fits
        registry.accept_chunk(chunk("u", 0, 3, b"a")).unwrap();
        registry.accept_chunk(chunk("u", 1, 3, b"de")).unwrap();
    }

    #[test]
    fn test_sweep_drops_idle_uploads() {
        let registry = UploadRegistry::new(UploadLimits {
            upload_ttl: Duration::from_secs(10),
            ..UploadLimits::default()
        });
        let start = Instant::now();
        registry.accept_chunk_at(chunk("old", 0, 2, b"a"), start).unwrap();
        registry
            .accept_chunk_at(chunk("fresh", 0, 2, b"a"), start + Duration::from_secs(8))
            .unwrap();

        assert_eq!(registry.sweep_expired_at(start + Duration::from_secs(15)), 1);
        assert_eq!(registry.in_flight(), 1);

        // the swept upload starts over from scratch
        match registry
            .accept_chunk_at(chunk("old", 1, 2, b"b"), start + Duration::from_secs(16))
            .unwrap()
        {
            Accepted::Pending(ack) => assert_eq!(ack.received_chunks, 1),
            Accepted::Complete(_) => panic!("swept chunks must not count"),
        }
    }

    #[test]
    fn test_chunk_for_swept_entry_starts_over() {
        let registry = UploadRegistry::new(UploadLimits {
            upload_ttl: Duration::from_secs(10),
            ..UploadLimits::default()
        });
        let start = Instant::now();
        registry.accept_chunk_at(chunk("u", 0, 3, b"a"), start).unwrap();
        // entry looked up before the sweep ran
        let stale = registry.uploads.lock().get("u").cloned().unwrap();
        let later = start + Duration::from_secs(11);
        assert_eq!(registry.sweep_expired_at(later), 1);

        match registry.store_chunk(&stale, chunk("u", 1, 3, b"b"), later).unwrap() {
            Stored::Expired(request) => assert_eq!(request.chunk_index, 1),
            Stored::Accepted(_) => panic!("chunk stored into a swept upload"),
        }
        assert_eq!(stale.lock().received_count(), 0);

        match registry.accept_chunk_at(chunk("u", 1, 3, b"b"), later).unwrap() {
            Accepted::Pending(ack) => assert_eq!(ack.received_chunks, 1),
            Accepted::Complete(_) => panic!("swept chunks must not count"),
        }
        let live = registry.uploads.lock().get("u").cloned().unwrap();
        assert!(!Arc::ptr_eq(&live, &stale));
        assert_eq!(live.lock().received_count(), 1);
    }

    #[test]
    fn test_chunk_racing_completion_is_conflict() {
        let registry = registry();
        registry.accept_chunk(chunk("u", 0, 2, b"a")).unwrap();
        let racing = registry.uploads.lock().get("u").cloned().unwrap();
        assert!(matches!(
            registry.accept_chunk(chunk("u", 1, 2, b"b")).unwrap(),
            Accepted::Complete(_)
        ));

        assert!(matches!(
            registry.store_chunk(&racing, chunk("u", 1, 2, b"c"), Instant::now()),
            Err(ExplorerError::UploadConflict(_))
        ));
        assert_eq!(racing.lock().received_count(), 0);
        assert_eq!(racing.lock().buffered_bytes(), 0);
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("gzip".parse::<Encoding>().unwrap(), Encoding::Gzip);
        assert_eq!("".parse::<Encoding>().unwrap(), Encoding::Gzip);
        assert_eq!("IDENTITY".parse::<Encoding>().unwrap(), Encoding::Identity);
        assert!("brotli".parse::<Encoding>().is_err());
    }
}
