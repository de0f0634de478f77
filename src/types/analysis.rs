use crate::vehicle::VehicleInfo;
use serde::Serialize;
use std::collections::BTreeMap;

/// Interval during which one flight mode was reported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightModeRange {
    pub mode: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl FlightModeRange {
    pub fn new(mode: String, start: f64, end: f64) -> Self {
        Self {
            mode,
            start,
            end,
            duration: end - start,
        }
    }
}

/// One sample of a timeseries
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub t: f64,
    pub v: f64,
}

/// Per message type summary returned after upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub count: u64,
    pub fields: Vec<String>,
}

/// Analysis payload returned with a fresh session token
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub messages: BTreeMap<String, MessageSummary>,
    pub flight_modes: Vec<FlightModeRange>,
    pub vehicle: VehicleInfo,
}

/// Aggregate counters over a whole log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStats {
    pub total_messages: u64,
    pub message_types: usize,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub duration_seconds: f64,
    pub messages_per_type: BTreeMap<String, u64>,
}

/// Raw message as returned by the dump query
#[derive(Debug, Clone, Serialize)]
pub struct DumpedMessage {
    pub timestamp: f64,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Series produced for one graph term
#[derive(Debug, Clone, Serialize)]
pub struct NamedSeries {
    pub expression: String,
    pub points: Vec<SeriesPoint>,
}

/// Evaluated predefined graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphResult {
    pub name: String,
    pub description: String,
    pub series: Vec<NamedSeries>,
}
