//! Synthetic DataFlash logs for tests
//!
//! Shared by the integration tests and, through `#[path]`, by the unit tests
//! inside the library. Only depends on std and flate2.
#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;

pub const MSG_TYPE: u8 = 32;
pub const PARM_TYPE: u8 = 33;
pub const MODE_TYPE: u8 = 34;
pub const ATT_TYPE: u8 = 35;
pub const GPS_TYPE: u8 = 36;
pub const BARO_TYPE: u8 = 37;

/// One value to encode according to its column type character
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Int(i64),
    Float(f64),
    Text(&'a str),
}

impl Field<'_> {
    fn number(&self) -> f64 {
        match self {
            Field::Int(v) => *v as f64,
            Field::Float(v) => *v,
            Field::Text(_) => 0.0,
        }
    }
}

/// Writes DataFlash records into a byte buffer
pub struct LogBuilder {
    buf: Vec<u8>,
    formats: HashMap<u8, String>,
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuilder {
    /// Start a log with the self-describing FMT record
    pub fn new() -> Self {
        let mut builder = Self {
            buf: Vec::new(),
            formats: HashMap::new(),
        };
        builder.formats.insert(128, "BBnNZ".to_string());
        builder.push_fmt(128, 89, "FMT", "BBnNZ", "Type,Length,Name,Format,Columns");
        builder
    }

    /// Declare a message type
    pub fn format(mut self, type_id: u8, name: &str, format: &str, columns: &str) -> Self {
        let length = 3 + format.chars().map(type_size).sum::<usize>();
        self.push_fmt(type_id, length as u8, name, format, columns);
        self.formats.insert(type_id, format.to_string());
        self
    }

    /// Declare the message types used by `standard_log`
    pub fn standard_formats(self) -> Self {
        self.format(MSG_TYPE, "MSG", "QZ", "TimeUS,Message")
            .format(PARM_TYPE, "PARM", "QNff", "TimeUS,Name,Value,Default")
            .format(MODE_TYPE, "MODE", "QMBB", "TimeUS,Mode,ModeNum,Rsn")
            .format(ATT_TYPE, "ATT", "Qffff", "TimeUS,Roll,Pitch,Yaw,DesRoll")
            .format(GPS_TYPE, "GPS", "QBLLe", "TimeUS,Status,Lat,Lng,Alt")
            .format(BARO_TYPE, "BARO", "Qff", "TimeUS,Alt,Press")
    }

    /// Append one message of a declared type
    pub fn message(mut self, type_id: u8, fields: &[Field<'_>]) -> Self {
        let format = self
            .formats
            .get(&type_id)
            .cloned()
            .unwrap_or_else(|| panic!("type {} not declared", type_id));
        assert_eq!(format.chars().count(), fields.len(), "field count for type {}", type_id);
        self.buf.extend_from_slice(&[0xA3, 0x95, type_id]);
        for (type_char, field) in format.chars().zip(fields) {
            encode_field(&mut self.buf, type_char, field);
        }
        self
    }

    pub fn msg(self, time_s: f64, text: &str) -> Self {
        self.message(MSG_TYPE, &[us(time_s), Field::Text(text)])
    }

    pub fn parm(self, time_s: f64, name: &str, value: f64) -> Self {
        self.message(
            PARM_TYPE,
            &[us(time_s), Field::Text(name), Field::Float(value), Field::Float(0.0)],
        )
    }

    pub fn mode(self, time_s: f64, mode: i64) -> Self {
        self.message(
            MODE_TYPE,
            &[us(time_s), Field::Int(mode), Field::Int(mode), Field::Int(1)],
        )
    }

    pub fn att(self, time_s: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        self.message(
            ATT_TYPE,
            &[
                us(time_s),
                Field::Float(roll),
                Field::Float(pitch),
                Field::Float(yaw),
                Field::Float(roll),
            ],
        )
    }

    pub fn gps(self, time_s: f64, lat: f64, lng: f64, alt: f64) -> Self {
        self.message(
            GPS_TYPE,
            &[
                us(time_s),
                Field::Int(3),
                Field::Float(lat),
                Field::Float(lng),
                Field::Float(alt),
            ],
        )
    }

    pub fn baro(self, time_s: f64, alt: f64) -> Self {
        self.message(
            BARO_TYPE,
            &[us(time_s), Field::Float(alt), Field::Float(101_325.0)],
        )
    }

    /// Append arbitrary bytes (e.g. garbage to test resynchronisation)
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }

    fn push_fmt(&mut self, type_id: u8, length: u8, name: &str, format: &str, columns: &str) {
        self.buf.extend_from_slice(&[0xA3, 0x95, 128, type_id, length]);
        push_padded(&mut self.buf, name, 4);
        push_padded(&mut self.buf, format, 16);
        push_padded(&mut self.buf, columns, 64);
    }
}

/// Seconds to a TimeUS field
pub fn us(time_s: f64) -> Field<'static> {
    Field::Int((time_s * 1_000_000.0).round() as i64)
}

/// A 20 second ArduPlane flight: MANUAL until t=5, AUTO from t=6 to t=20,
/// attitude at 2 Hz, GPS and baro at 1 Hz, RTL_ALT written twice.
///
/// Message counts: ATT 41, GPS 21, BARO 21, MODE 4, PARM 3, MSG 1.
pub fn standard_log() -> Vec<u8> {
    let mut builder = LogBuilder::new()
        .standard_formats()
        .msg(0.0, "ArduPlane V4.5.0 (abcdef12)")
        .mode(0.0, 0);
    for i in 0..=40 {
        let t = i as f64 * 0.5;
        builder = builder.att(t, i as f64 * 0.1, -(i as f64) * 0.05, 90.0);
        if i % 2 == 0 {
            let second = (i / 2) as f64;
            builder = builder
                .gps(t, -35.363_261_6, 149.165_230_4, 584.0 + second)
                .baro(t, second * 2.0);
        }
        builder = match i {
            0 => builder.parm(t, "RTL_ALT", 100.0).parm(t, "WP_RADIUS", 90.0),
            10 => builder.mode(t, 0),
            12 => builder.mode(t, 10),
            20 => builder.parm(t, "RTL_ALT", 150.0),
            40 => builder.mode(t, 10),
            _ => builder,
        };
    }
    builder.build()
}

/// A log of at least `min_bytes`, padded with attitude records
pub fn large_log(min_bytes: usize) -> Vec<u8> {
    let mut builder = LogBuilder::new()
        .standard_formats()
        .msg(0.0, "ArduCopter V4.5.1 (1d2f0d4f)")
        .mode(0.0, 0);
    let mut data_len = 0;
    let mut i = 0u64;
    while data_len < min_bytes {
        let t = i as f64 * 0.0025;
        builder = builder.att(t, (i % 360) as f64, (i % 90) as f64, (i % 7) as f64);
        // ATT record: 3 header + 8 + 4 * 4
        data_len += 27;
        i += 1;
    }
    builder.build()
}

/// Gzip with default compression
pub fn gzip(data: &[u8]) -> Vec<u8> {
    gzip_with(data, Compression::default())
}

/// Gzip with stored (uncompressed) deflate blocks, keeping sizes predictable
pub fn gzip_stored(data: &[u8]) -> Vec<u8> {
    gzip_with(data, Compression::none())
}

fn gzip_with(data: &[u8], level: Compression) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Split into `count` near-equal chunks
pub fn split_even(data: &[u8], count: usize) -> Vec<Vec<u8>> {
    let size = data.len().div_ceil(count);
    data.chunks(size.max(1)).map(<[u8]>::to_vec).collect()
}

/// Split at the given chunk sizes; the last chunk takes the remainder
pub fn split_sizes(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for &size in sizes {
        let end = (start + size).min(data.len());
        chunks.push(data[start..end].to_vec());
        start = end;
    }
    if start < data.len() {
        if let Some(last) = chunks.last_mut() {
            last.extend_from_slice(&data[start..]);
        }
    }
    chunks
}

fn type_size(type_char: char) -> usize {
    match type_char {
        'b' | 'B' | 'M' => 1,
        'h' | 'H' | 'c' | 'C' => 2,
        'i' | 'I' | 'f' | 'e' | 'E' | 'L' | 'n' => 4,
        'd' | 'q' | 'Q' => 8,
        'N' => 16,
        'Z' | 'a' => 64,
        other => panic!("unsupported type char {}", other),
    }
}

fn push_padded(buf: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width);
    buf.extend_from_slice(&bytes[..len]);
    buf.extend(std::iter::repeat(0u8).take(width - len));
}

fn encode_field(buf: &mut Vec<u8>, type_char: char, field: &Field<'_>) {
    let v = field.number();
    match type_char {
        'b' => buf.push(v as i8 as u8),
        'B' | 'M' => buf.push(v as u8),
        'h' => buf.extend_from_slice(&(v as i16).to_le_bytes()),
        'H' => buf.extend_from_slice(&(v as u16).to_le_bytes()),
        'i' => buf.extend_from_slice(&(v as i32).to_le_bytes()),
        'I' => buf.extend_from_slice(&(v as u32).to_le_bytes()),
        'q' => buf.extend_from_slice(&(v as i64).to_le_bytes()),
        'Q' => {
            let raw = match field {
                Field::Int(i) => *i as u64,
                _ => v as u64,
            };
            buf.extend_from_slice(&raw.to_le_bytes())
        }
        'f' => buf.extend_from_slice(&(v as f32).to_le_bytes()),
        'd' => buf.extend_from_slice(&v.to_le_bytes()),
        'c' => buf.extend_from_slice(&((v * 100.0).round() as i16).to_le_bytes()),
        'C' => buf.extend_from_slice(&((v * 100.0).round() as u16).to_le_bytes()),
        'e' => buf.extend_from_slice(&((v * 100.0).round() as i32).to_le_bytes()),
        'E' => buf.extend_from_slice(&((v * 100.0).round() as u32).to_le_bytes()),
        'L' => buf.extend_from_slice(&((v * 1.0e7).round() as i32).to_le_bytes()),
        'n' | 'N' | 'Z' => {
            let text = match field {
                Field::Text(s) => s,
                _ => "",
            };
            push_padded(buf, text, type_size(type_char));
        }
        'a' => buf.extend(std::iter::repeat(0u8).take(64)),
        other => panic!("unsupported type char {}", other),
    }
}
