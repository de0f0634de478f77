use serde::Serialize;
use std::sync::Arc;

/// Layout of one DataFlash message type, as declared by its FMT record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageFormat {
    pub type_id: u8,
    pub name: String,
    /// Total record length including the 3 header bytes
    pub length: usize,
    /// One type character per column
    pub format: String,
    pub columns: Vec<String>,
}

impl MessageFormat {
    /// Position of a column by name
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Column names whose type character decodes to a number
    pub fn numeric_columns(&self) -> Vec<String> {
        self.format
            .chars()
            .zip(self.columns.iter())
            .filter(|(c, _)| crate::parser::format::is_numeric_type(*c))
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// One decoded field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Array(Vec<i16>),
}

impl FieldValue {
    /// Numeric view of the value; text and arrays have none
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) | FieldValue::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render for a CSV cell
    pub fn to_csv_field(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::UInt(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Array(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Decoded message with its timestamp in seconds since boot
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub format: Arc<MessageFormat>,
    pub timestamp: f64,
    pub values: Vec<FieldValue>,
}

impl LogMessage {
    pub fn msg_type(&self) -> &str {
        &self.format.name
    }

    /// Look up a field by column name
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.format
            .column_index(field)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    /// All fields as (column, value) pairs in column order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.format
            .columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}
