//! Read-only queries over an analysis session
//!
//! Unknown message types and fields yield empty results rather than errors so
//! a chart with one bad series still renders the others.

use crate::expression::{split_terms, Expr, FieldRef};
use crate::graphs::GraphDefinition;
use crate::session::AnalysisSession;
use crate::types::{
    AnalysisSummary, DumpedMessage, FlightModeRange, GraphResult, LogStats, NamedSeries,
    SeriesPoint,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Default number of messages returned by `dump`
pub const DEFAULT_DUMP_LIMIT: usize = 100;

/// Keep samples 0, k, 2k, ...; a step of 0 or 1 keeps everything
pub fn decimate<T>(points: Vec<T>, step: usize) -> Vec<T> {
    if step <= 1 {
        return points;
    }
    points.into_iter().step_by(step).collect()
}

/// Timestamped values of one numeric field
pub fn timeseries(
    session: &AnalysisSession,
    msg_type: &str,
    field: &str,
    step: usize,
) -> Vec<SeriesPoint> {
    let points = session
        .messages_of(msg_type)
        .filter_map(|msg| {
            msg.get_f64(field)
                .map(|v| SeriesPoint { t: msg.timestamp, v })
        })
        .collect();
    decimate(points, step)
}

/// Evaluate one graph term.
///
/// Each message of a referenced type updates the latest value of its fields;
/// the term is evaluated once every referenced field has a value.
pub fn evaluate_term(session: &AnalysisSession, term: &str, step: usize) -> Vec<SeriesPoint> {
    let expr = match Expr::parse(term) {
        Ok(expr) => expr,
        Err(err) => {
            debug!(term, error = %err, "skipping unparsable graph term");
            return Vec::new();
        }
    };
    let refs = expr.references();
    if refs.is_empty() {
        return Vec::new();
    }
    if let Some(missing) = refs.iter().find(|r| !has_numeric_field(session, r)) {
        debug!(term, msg = %missing.msg_type, field = %missing.field, "graph term references unknown field");
        return Vec::new();
    }

    let mut types: Vec<&str> = refs.iter().map(|r| r.msg_type.as_str()).collect();
    types.dedup();

    let mut latest: Vec<Option<f64>> = vec![None; refs.len()];
    let mut points = Vec::new();
    for msg in session.messages_of_any(&types) {
        for (slot, field_ref) in latest.iter_mut().zip(&refs) {
            if field_ref.msg_type == msg.msg_type() {
                if let Some(v) = msg.get_f64(&field_ref.field) {
                    *slot = Some(v);
                }
            }
        }
        let value = expr.evaluate(&|r: &FieldRef| {
            refs.iter()
                .position(|candidate| candidate == r)
                .and_then(|idx| latest[idx])
        });
        if let Some(v) = value.filter(|v| v.is_finite()) {
            points.push(SeriesPoint { t: msg.timestamp, v });
        }
    }
    decimate(points, step)
}

fn has_numeric_field(session: &AnalysisSession, field_ref: &FieldRef) -> bool {
    session
        .field_index
        .get(&field_ref.msg_type)
        .is_some_and(|fields| fields.iter().any(|f| *f == field_ref.field))
}

/// Evaluate every term of a predefined graph, one series per distinct term.
///
/// A term repeated across expression alternatives keeps its first position.
pub fn evaluate_graph(session: &AnalysisSession, graph: &GraphDefinition, step: usize) -> GraphResult {
    let mut seen = HashSet::new();
    let series = graph
        .expressions
        .iter()
        .flat_map(|expression| split_terms(expression))
        .filter(|term| seen.insert(term.clone()))
        .map(|term| NamedSeries {
            points: evaluate_term(session, &term, step),
            expression: term,
        })
        .collect();
    GraphResult {
        name: graph.name.clone(),
        description: graph.description.clone(),
        series,
    }
}

pub fn flight_modes(session: &AnalysisSession) -> Vec<FlightModeRange> {
    session.flight_modes.clone()
}

/// Aggregate counters over all messages
pub fn stats(session: &AnalysisSession) -> LogStats {
    let mut first: Option<f64> = None;
    let mut last: Option<f64> = None;
    for msg in &session.log.messages {
        first = Some(first.map_or(msg.timestamp, |t| t.min(msg.timestamp)));
        last = Some(last.map_or(msg.timestamp, |t| t.max(msg.timestamp)));
    }
    let messages_per_type = session.log.counts_by_type();
    LogStats {
        total_messages: session.log.messages.len() as u64,
        message_types: messages_per_type.len(),
        first_timestamp: first,
        last_timestamp: last,
        duration_seconds: match (first, last) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        },
        messages_per_type,
    }
}

pub fn params(session: &AnalysisSession) -> BTreeMap<String, f64> {
    session.parameters.clone()
}

/// Up to `limit` raw messages of one type with every field
pub fn dump(session: &AnalysisSession, msg_type: &str, limit: usize) -> Vec<DumpedMessage> {
    session
        .messages_of(msg_type)
        .take(limit)
        .map(|msg| {
            let mut data = Map::new();
            data.insert(
                "mavpackettype".to_string(),
                Value::String(msg.msg_type().to_string()),
            );
            for (name, value) in msg.fields() {
                data.insert(
                    name.to_string(),
                    serde_json::to_value(value).unwrap_or(Value::Null),
                );
            }
            DumpedMessage {
                timestamp: msg.timestamp,
                data,
            }
        })
        .collect()
}

/// Message types, counts and fields
pub fn messages(session: &AnalysisSession) -> AnalysisSummary {
    session.summary()
}
