//! DataFlash FMT records and field type characters
//!
//! Every record type is described by an FMT record carrying its type id,
//! total length, 4-character name, a string of type characters and a
//! comma-separated column list. The FMT record describes itself as type 128.

use crate::error::{ExplorerError, Result};
use crate::parser::stream::DataStream;
use crate::types::{FieldValue, MessageFormat};

/// Type id of the FMT record
pub const FMT_TYPE: u8 = 128;
/// Total length of an FMT record, header included
pub const FMT_LENGTH: usize = 89;
/// Length of the `0xA3 0x95 <type>` record header
pub const HEADER_LENGTH: usize = 3;

/// Encoded width in bytes of one field type character
pub fn field_size(type_char: char) -> Option<usize> {
    let size = match type_char {
        'b' | 'B' | 'M' => 1,
        'h' | 'H' | 'c' | 'C' => 2,
        'i' | 'I' | 'f' | 'e' | 'E' | 'L' | 'n' => 4,
        'd' | 'q' | 'Q' => 8,
        'N' => 16,
        'Z' | 'a' => 64,
        _ => return None,
    };
    Some(size)
}

/// Whether a field type decodes to a plottable number
pub fn is_numeric_type(type_char: char) -> bool {
    !matches!(type_char, 'n' | 'N' | 'Z' | 'a') && field_size(type_char).is_some()
}

/// Payload length implied by a format string
pub fn payload_size(format: &str) -> Option<usize> {
    format.chars().map(field_size).sum()
}

/// Decode one field of the given type
pub fn read_field(stream: &mut DataStream<'_>, type_char: char) -> Result<FieldValue> {
    let value = match type_char {
        'b' => FieldValue::Int(stream.read_i8()? as i64),
        'B' | 'M' => FieldValue::UInt(stream.read_byte()? as u64),
        'h' => FieldValue::Int(stream.read_i16()? as i64),
        'H' => FieldValue::UInt(stream.read_u16()? as u64),
        'i' => FieldValue::Int(stream.read_i32()? as i64),
        'I' => FieldValue::UInt(stream.read_u32()? as u64),
        'q' => FieldValue::Int(stream.read_i64()?),
        'Q' => FieldValue::UInt(stream.read_u64()?),
        'f' => FieldValue::Float(stream.read_f32()? as f64),
        'd' => FieldValue::Float(stream.read_f64()?),
        // centi-scaled integers
        'c' => FieldValue::Float(stream.read_i16()? as f64 / 100.0),
        'C' => FieldValue::Float(stream.read_u16()? as f64 / 100.0),
        'e' => FieldValue::Float(stream.read_i32()? as f64 / 100.0),
        'E' => FieldValue::Float(stream.read_u32()? as f64 / 100.0),
        // latitude/longitude in degrees * 1e7
        'L' => FieldValue::Float(stream.read_i32()? as f64 / 1.0e7),
        'n' => FieldValue::Text(stream.read_fixed_str(4)?),
        'N' => FieldValue::Text(stream.read_fixed_str(16)?),
        'Z' => FieldValue::Text(stream.read_fixed_str(64)?),
        'a' => {
            let mut values = Vec::with_capacity(32);
            for _ in 0..32 {
                values.push(stream.read_i16()?);
            }
            FieldValue::Array(values)
        }
        other => {
            return Err(ExplorerError::InvalidFormat(format!(
                "unknown field type '{}'",
                other
            )))
        }
    };
    Ok(value)
}

/// Parse the payload of an FMT record (the stream is positioned after the header)
pub fn parse_fmt_payload(stream: &mut DataStream<'_>) -> Result<MessageFormat> {
    let type_id = stream.read_byte()?;
    let length = stream.read_byte()? as usize;
    let name = stream.read_fixed_str(4)?;
    let format = stream.read_fixed_str(16)?;
    let columns_raw = stream.read_fixed_str(64)?;

    let columns: Vec<String> = if columns_raw.is_empty() {
        Vec::new()
    } else {
        columns_raw.split(',').map(|c| c.trim().to_string()).collect()
    };

    if name.is_empty() {
        return Err(ExplorerError::InvalidFormat(format!(
            "type {} has an empty name",
            type_id
        )));
    }
    if columns.len() != format.chars().count() {
        return Err(ExplorerError::InvalidFormat(format!(
            "{}: {} columns for format '{}'",
            name,
            columns.len(),
            format
        )));
    }
    let payload = payload_size(&format).ok_or_else(|| {
        ExplorerError::InvalidFormat(format!("{}: unsupported format '{}'", name, format))
    })?;
    if payload + HEADER_LENGTH != length {
        return Err(ExplorerError::InvalidFormat(format!(
            "{}: declared length {} but format '{}' needs {}",
            name,
            length,
            format,
            payload + HEADER_LENGTH
        )));
    }

    Ok(MessageFormat {
        type_id,
        name,
        length,
        format,
        columns,
    })
}
