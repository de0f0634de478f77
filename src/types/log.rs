use crate::types::LogMessage;
use crate::vehicle::VehicleInfo;
use serde::Serialize;
use std::collections::BTreeMap;

/// Decoder counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct DecodeStats {
    pub total_bytes: u64,
    pub format_records: u32,
    pub messages: u64,
    /// Bytes skipped while resynchronising on a record header
    pub skipped_bytes: u64,
    /// Records referencing a type with no FMT definition
    pub unknown_records: u32,
    /// Set when the data ended inside a record
    pub truncated: bool,
}

/// Complete decoded log
#[derive(Debug, Default)]
pub struct DecodedLog {
    pub messages: Vec<LogMessage>,
    pub vehicle: VehicleInfo,
    pub stats: DecodeStats,
}

impl DecodedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages per type
    pub fn counts_by_type(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for msg in &self.messages {
            *counts.entry(msg.msg_type().to_string()).or_insert(0) += 1;
        }
        counts
    }
}
