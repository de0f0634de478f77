use std::fmt;

/// Error types for log decoding, upload handling and session queries
#[derive(Debug)]
pub enum ExplorerError {
    /// I/O errors
    Io(std::io::Error),
    /// CSV writer errors
    Csv(csv::Error),
    /// Parse errors with context
    Parse(String),
    /// Invalid FMT record
    InvalidFormat(String),
    /// End of data reached unexpectedly
    UnexpectedEof,
    /// Chunk rejected because of bad or inconsistent metadata
    MalformedChunk(String),
    /// Chunk arrived for an upload that is already being reassembled
    UploadConflict(String),
    /// Upload exceeds the configured size limit
    TooLarge { limit: u64, actual: u64 },
    /// Reassembled payload could not be decompressed
    Decompress(String),
    /// Declared and actual sizes differ after reassembly
    SizeMismatch {
        what: &'static str,
        expected: u64,
        actual: u64,
    },
    /// Decoder rejected the log bytes
    Decode(String),
    /// Session token unknown, evicted or from another process
    UnknownToken,
    /// Graph name not present in the catalog
    UnknownGraph(String),
    /// Message type not present in the session
    UnknownMessage(String),
    /// Graph catalog could not be loaded
    Catalog(String),
    /// Required request parameter absent or empty
    MissingParameter(String),
    /// Request parameter present but not parseable
    InvalidParameter(String),
    /// Request body over the configured limit
    RequestTooLarge(String),
    /// Failure unrelated to the request, e.g. a panicked worker
    Internal(String),
}

impl ExplorerError {
    /// Whether the error ends the upload attempt, so the client must restart
    /// the whole chunk sequence.
    pub fn is_terminal_upload_failure(&self) -> bool {
        matches!(
            self,
            ExplorerError::Decompress(_)
                | ExplorerError::SizeMismatch { .. }
                | ExplorerError::Decode(_)
        )
    }
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerError::Io(err) => write!(f, "I/O error: {}", err),
            ExplorerError::Csv(err) => write!(f, "CSV error: {}", err),
            ExplorerError::Parse(msg) => write!(f, "Parse error: {}", msg),
            ExplorerError::InvalidFormat(msg) => write!(f, "Invalid FMT record: {}", msg),
            ExplorerError::UnexpectedEof => write!(f, "Unexpected end of data"),
            ExplorerError::MalformedChunk(msg) => write!(f, "Malformed chunk: {}", msg),
            ExplorerError::UploadConflict(id) => {
                write!(f, "Upload {} is already complete; start a new upload", id)
            }
            ExplorerError::TooLarge { limit, actual } => {
                write!(f, "Upload too large: {} bytes exceeds limit of {} bytes", actual, limit)
            }
            ExplorerError::Decompress(msg) => {
                write!(f, "Upload failed, please re-upload: decompression error: {}", msg)
            }
            ExplorerError::SizeMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "Upload failed, please re-upload: {} size mismatch (expected {} bytes, got {})",
                what, expected, actual
            ),
            ExplorerError::Decode(msg) => {
                write!(f, "Upload failed, please re-upload: failed to parse log: {}", msg)
            }
            ExplorerError::UnknownToken => write!(f, "Token invalid or expired; please re-upload"),
            ExplorerError::UnknownGraph(name) => write!(f, "Graph not found: {}", name),
            ExplorerError::UnknownMessage(name) => write!(f, "Message type {} not found", name),
            ExplorerError::Catalog(msg) => write!(f, "Failed to load graphs: {}", msg),
            ExplorerError::MissingParameter(name) => write!(f, "Missing parameter: {}", name),
            ExplorerError::InvalidParameter(msg) => write!(f, "Invalid parameter {}", msg),
            ExplorerError::RequestTooLarge(msg) => write!(f, "Request too large: {}", msg),
            ExplorerError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ExplorerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExplorerError::Io(err) => Some(err),
            ExplorerError::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExplorerError {
    fn from(err: std::io::Error) -> Self {
        ExplorerError::Io(err)
    }
}

impl From<csv::Error> for ExplorerError {
    fn from(err: csv::Error) -> Self {
        ExplorerError::Csv(err)
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
