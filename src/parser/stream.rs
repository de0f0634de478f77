use crate::error::{ExplorerError, Result};

/// First byte of every DataFlash record header
pub const HEAD_BYTE1: u8 = 0xA3;
/// Second byte of every DataFlash record header
pub const HEAD_BYTE2: u8 = 0x95;

/// Little-endian byte stream over an in-memory log
pub struct DataStream<'a> {
    data: &'a [u8],
    pub pos: usize,
    end: usize,
    pub eof: bool,
}

impl<'a> DataStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
            eof: data.is_empty(),
        }
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.end);
        self.eof = self.pos >= self.end;
    }

    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.pos < self.end {
            let byte = self.data[self.pos];
            self.pos += 1;
            self.eof = self.pos >= self.end;
            Ok(byte)
        } else {
            self.eof = true;
            Err(ExplorerError::UnexpectedEof)
        }
    }

    /// Borrow the next `len` bytes and advance past them
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            self.eof = true;
            return Err(ExplorerError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        self.eof = self.pos >= self.end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_byte()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read a fixed-width, NUL-padded string field
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String> {
        let raw = self.read_bytes(len)?;
        let trimmed = match raw.iter().position(|&b| b == 0) {
            Some(nul) => &raw[..nul],
            None => raw,
        };
        Ok(String::from_utf8_lossy(trimmed).trim_end().to_string())
    }

    /// Whether a record header starts at the current position
    pub fn at_header(&self) -> bool {
        self.remaining() >= 3
            && self.data[self.pos] == HEAD_BYTE1
            && self.data[self.pos + 1] == HEAD_BYTE2
    }

    /// Skip forward to the next record header.
    ///
    /// Returns the number of bytes skipped, or `UnexpectedEof` when no further
    /// header exists. The stream is left positioned on the header.
    pub fn skip_to_next_header(&mut self) -> Result<usize> {
        let start = self.pos;
        while self.remaining() >= 3 {
            if self.at_header() {
                return Ok(self.pos - start);
            }
            self.pos += 1;
        }
        self.set_position(self.end);
        Err(ExplorerError::UnexpectedEof)
    }
}
