use crate::error::{ExplorerError, Result};
use crate::parser::format::{parse_fmt_payload, read_field, FMT_TYPE, HEADER_LENGTH};
use crate::parser::stream::DataStream;
use crate::types::{DecodedLog, LogMessage, MessageFormat};
use crate::vehicle::VehicleInfo;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns raw log bytes into decoded messages.
///
/// The session cache calls this exactly once per uploaded log.
pub trait LogDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DecodedLog>;
}

/// Decoder for ArduPilot DataFlash `.bin` logs
#[derive(Debug, Default, Clone)]
pub struct DataFlashDecoder;

impl DataFlashDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl LogDecoder for DataFlashDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedLog> {
        parse_dataflash_bytes(data)
    }
}

/// Parse DataFlash data from memory
pub fn parse_dataflash_bytes(data: &[u8]) -> Result<DecodedLog> {
    debug!(bytes = data.len(), "decoding DataFlash log");

    let mut log = DecodedLog::new();
    log.stats.total_bytes = data.len() as u64;

    let mut formats: HashMap<u8, Arc<MessageFormat>> = HashMap::new();
    let mut stream = DataStream::new(data);
    let mut last_timestamp = 0.0f64;

    while !stream.eof {
        match stream.skip_to_next_header() {
            Ok(skipped) => log.stats.skipped_bytes += skipped as u64,
            Err(_) => break,
        }
        let record_start = stream.pos;
        // header bytes are guaranteed by skip_to_next_header
        stream.set_position(record_start + 2);
        let type_id = stream.read_byte()?;

        if type_id == FMT_TYPE {
            match parse_fmt_payload(&mut stream) {
                Ok(format) => {
                    log.stats.format_records += 1;
                    formats.insert(format.type_id, Arc::new(format));
                }
                Err(ExplorerError::UnexpectedEof) => {
                    log.stats.truncated = true;
                    break;
                }
                Err(err) => {
                    warn!(offset = record_start, error = %err, "skipping FMT record");
                    stream.set_position(record_start + 1);
                }
            }
            continue;
        }

        let Some(format) = formats.get(&type_id).cloned() else {
            log.stats.unknown_records += 1;
            stream.set_position(record_start + 1);
            continue;
        };

        if stream.remaining() < format.length - HEADER_LENGTH {
            log.stats.truncated = true;
            break;
        }

        let mut values = Vec::with_capacity(format.columns.len());
        for type_char in format.format.chars() {
            values.push(read_field(&mut stream, type_char)?);
        }

        let mut message = LogMessage {
            format,
            timestamp: last_timestamp,
            values,
        };
        if let Some(timestamp) = message_timestamp(&message) {
            last_timestamp = timestamp;
            message.timestamp = timestamp;
        }
        log.messages.push(message);
    }

    if log.stats.format_records == 0 {
        return Err(ExplorerError::Decode(
            "no FMT records found; not a DataFlash log".to_string(),
        ));
    }

    log.stats.messages = log.messages.len() as u64;
    log.vehicle = VehicleInfo::detect(&log.messages);

    debug!(
        messages = log.stats.messages,
        formats = log.stats.format_records,
        skipped_bytes = log.stats.skipped_bytes,
        truncated = log.stats.truncated,
        "decoded DataFlash log"
    );

    Ok(log)
}

/// Seconds since boot from the TimeUS or TimeMS column
fn message_timestamp(message: &LogMessage) -> Option<f64> {
    if let Some(us) = message.get_f64("TimeUS") {
        return Some(us / 1_000_000.0);
    }
    message.get_f64("TimeMS").map(|ms| ms / 1_000.0)
}
