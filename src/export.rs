//! CSV export of one message type
//!
//! Rows are produced lazily in fixed-size batches so a download can be
//! streamed without rendering the whole table first. Each call starts a new
//! export from the first row.

use crate::error::{ExplorerError, Result};
use crate::session::AnalysisSession;
use std::sync::Arc;

/// Rows rendered per yielded chunk
pub const ROWS_PER_CHUNK: usize = 1024;

/// Name of the timestamp column
pub const TIME_COLUMN: &str = "_time";

/// Lazy CSV renderer yielding byte chunks: header first, then rows in log order
pub struct CsvExport {
    session: Arc<AnalysisSession>,
    msg_type: String,
    fields: Vec<String>,
    next_row: usize,
    header_written: bool,
    finished: bool,
}

impl CsvExport {
    fn render_chunk(&mut self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if !self.header_written {
            writer.write_record(std::iter::once(TIME_COLUMN).chain(self.fields.iter().map(String::as_str)))?;
            self.header_written = true;
        }

        let indices = self.session.message_indices(&self.msg_type);
        let end = (self.next_row + ROWS_PER_CHUNK).min(indices.len());
        for &idx in &indices[self.next_row..end] {
            let Some(msg) = self.session.log.messages.get(idx) else {
                continue;
            };
            let mut record = Vec::with_capacity(self.fields.len() + 1);
            record.push(msg.timestamp.to_string());
            for field in &self.fields {
                record.push(msg.get(field).map(|v| v.to_csv_field()).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        self.next_row = end;
        if end >= indices.len() {
            self.finished = true;
        }

        writer
            .into_inner()
            .map_err(|e| ExplorerError::Io(e.into_error()))
    }
}

impl Iterator for CsvExport {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.render_chunk() {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => Some(Ok(chunk)),
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Start a CSV export of one message type.
///
/// Unlike the plotting queries an absent type is an error, since there is no
/// meaningful empty download.
pub fn csv_stream(session: Arc<AnalysisSession>, msg_type: &str) -> Result<CsvExport> {
    let fields = session
        .field_index
        .get(msg_type)
        .cloned()
        .ok_or_else(|| ExplorerError::UnknownMessage(msg_type.to_string()))?;
    Ok(CsvExport {
        session,
        msg_type: msg_type.to_string(),
        fields,
        next_row: 0,
        header_written: false,
        finished: false,
    })
}

/// Download file name for a message type
pub fn csv_filename(msg_type: &str) -> String {
    let safe: String = msg_type
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        "messages.csv".to_string()
    } else {
        format!("{}.csv", safe)
    }
}
