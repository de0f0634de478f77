//! Analysis session cache
//!
//! A decoded log is kept in memory under an opaque token together with the
//! indices the queries need, so the log is parsed only once per upload.

use crate::error::{ExplorerError, Result};
use crate::parser::LogDecoder;
use crate::types::{AnalysisSummary, DecodedLog, FlightModeRange, LogMessage, MessageSummary};
use crate::vehicle::VehicleInfo;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Message type carrying flight mode changes
pub const MODE_MESSAGE: &str = "MODE";
/// Message type carrying parameter writes
pub const PARAM_MESSAGE: &str = "PARM";

/// One decoded log and its derived indices. Read-only once built.
#[derive(Debug)]
pub struct AnalysisSession {
    pub token: String,
    pub original_filename: Option<String>,
    pub log: DecodedLog,
    /// Numeric fields per message type, in column order
    pub field_index: BTreeMap<String, Vec<String>>,
    pub flight_modes: Vec<FlightModeRange>,
    pub parameters: BTreeMap<String, f64>,
    pub created_at: Instant,
    by_type: HashMap<String, Vec<usize>>,
}

impl AnalysisSession {
    /// Build the session indices over a decoded log
    pub fn new(token: String, original_filename: Option<String>, log: DecodedLog) -> Self {
        let mut by_type: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, msg) in log.messages.iter().enumerate() {
            by_type.entry(msg.msg_type().to_string()).or_default().push(idx);
        }
        let field_index = build_field_index(&log.messages);
        let flight_modes = extract_flight_modes(&log.messages, &log.vehicle);
        let parameters = extract_parameters(&log.messages);

        Self {
            token,
            original_filename,
            log,
            field_index,
            flight_modes,
            parameters,
            created_at: Instant::now(),
            by_type,
        }
    }

    /// Messages of one type in log order
    pub fn messages_of<'a>(&'a self, msg_type: &str) -> impl Iterator<Item = &'a LogMessage> + 'a {
        self.message_indices(msg_type)
            .iter()
            .filter_map(move |&idx| self.log.messages.get(idx))
    }

    /// Messages of any of the given types, in log order
    pub fn messages_of_any<'a>(&'a self, types: &[&str]) -> Vec<&'a LogMessage> {
        let mut indices: Vec<usize> = types
            .iter()
            .filter_map(|t| self.by_type.get(*t))
            .flatten()
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .filter_map(|idx| self.log.messages.get(idx))
            .collect()
    }

    /// Positions in `log.messages` of one message type
    pub fn message_indices(&self, msg_type: &str) -> &[usize] {
        self.by_type.get(msg_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn message_count(&self, msg_type: &str) -> usize {
        self.message_indices(msg_type).len()
    }

    /// Analysis payload returned when the session is created
    pub fn summary(&self) -> AnalysisSummary {
        let messages = self
            .field_index
            .iter()
            .map(|(msg_type, fields)| {
                (
                    msg_type.clone(),
                    MessageSummary {
                        count: self.message_count(msg_type) as u64,
                        fields: fields.clone(),
                    },
                )
            })
            .collect();
        AnalysisSummary {
            messages,
            flight_modes: self.flight_modes.clone(),
            vehicle: self.log.vehicle.clone(),
        }
    }
}

/// Numeric fields of every message type present in the log
pub fn build_field_index(messages: &[LogMessage]) -> BTreeMap<String, Vec<String>> {
    let mut index = BTreeMap::new();
    for msg in messages {
        if !index.contains_key(msg.msg_type()) {
            index.insert(msg.msg_type().to_string(), msg.format.numeric_columns());
        }
    }
    index
}

/// Flight mode ranges from MODE messages
pub fn extract_flight_modes(messages: &[LogMessage], vehicle: &VehicleInfo) -> Vec<FlightModeRange> {
    let samples = messages
        .iter()
        .filter(|m| m.msg_type() == MODE_MESSAGE)
        .filter_map(|m| {
            let number = m.get_f64("Mode").or_else(|| m.get_f64("ModeNum"))?;
            if number < 0.0 {
                return None;
            }
            Some((m.timestamp, vehicle.mode_name(number as u64)))
        })
        .collect();
    collapse_mode_samples(samples)
}

/// Collapse consecutive identical mode samples into ranges.
///
/// A range starts at the first sample of a run and ends at its last sample.
/// Samples are ordered by time first; equal timestamps keep log order.
pub fn collapse_mode_samples(mut samples: Vec<(f64, String)>) -> Vec<FlightModeRange> {
    samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut ranges: Vec<FlightModeRange> = Vec::new();
    for (t, mode) in samples {
        match ranges.last_mut() {
            Some(last) if last.mode == mode => {
                last.end = t;
                last.duration = last.end - last.start;
            }
            _ => ranges.push(FlightModeRange::new(mode, t, t)),
        }
    }
    ranges
}

/// Latest value of every parameter written in the log
pub fn extract_parameters(messages: &[LogMessage]) -> BTreeMap<String, f64> {
    let mut params = BTreeMap::new();
    for msg in messages.iter().filter(|m| m.msg_type() == PARAM_MESSAGE) {
        let name = msg.get("Name").and_then(|v| v.as_str());
        let value = msg.get_f64("Value");
        if let (Some(name), Some(value)) = (name, value) {
            if !name.is_empty() {
                params.insert(name.to_string(), value);
            }
        }
    }
    params
}

#[derive(Debug, Default)]
struct SessionStore {
    sessions: HashMap<String, Arc<AnalysisSession>>,
    /// Tokens in creation order, oldest first
    order: VecDeque<String>,
}

/// Process-wide map of token to analysis session
pub struct SessionCache {
    decoder: Arc<dyn LogDecoder>,
    inner: RwLock<SessionStore>,
    /// 0 means unbounded
    max_sessions: usize,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.len())
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

impl SessionCache {
    pub fn new(decoder: Arc<dyn LogDecoder>, max_sessions: usize) -> Self {
        Self {
            decoder,
            inner: RwLock::new(SessionStore::default()),
            max_sessions,
        }
    }

    /// Decode a log once and store it under a fresh token
    pub fn create_session(
        &self,
        raw: &[u8],
        original_filename: Option<String>,
    ) -> Result<Arc<AnalysisSession>> {
        let log = self.decoder.decode(raw).map_err(|err| match err {
            ExplorerError::Decode(_) => err,
            other => ExplorerError::Decode(other.to_string()),
        })?;
        let token = Uuid::new_v4().to_string();
        let session = Arc::new(AnalysisSession::new(token.clone(), original_filename, log));

        let mut store = self.inner.write();
        store.sessions.insert(token.clone(), Arc::clone(&session));
        store.order.push_back(token);
        if self.max_sessions > 0 {
            while store.sessions.len() > self.max_sessions {
                let Some(oldest) = store.order.pop_front() else {
                    break;
                };
                store.sessions.remove(&oldest);
                debug!(token = %oldest, "evicted analysis session");
            }
        }
        let cached = store.sessions.len();
        drop(store);

        info!(
            token = %session.token,
            messages = session.log.messages.len(),
            types = session.field_index.len(),
            cached,
            "created analysis session"
        );
        Ok(session)
    }

    pub fn get_session(&self, token: &str) -> Result<Arc<AnalysisSession>> {
        self.inner
            .read()
            .sessions
            .get(token)
            .cloned()
            .ok_or(ExplorerError::UnknownToken)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
