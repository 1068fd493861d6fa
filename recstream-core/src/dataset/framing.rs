// recstream-core/src/dataset/framing.rs

use std::sync::Arc;

use crate::error::{Result, StreamError};
use crate::source::ByteStream;

/// Describes how to find record boundaries
pub trait RecordFormat: Send + Sync {
    /// Find the end of the record that starts at `offset` in `data`.
    /// Returns the byte position after the record ends (exclusive end),
    /// or None if `data` holds no complete record yet.
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize>;

    /// Like `find_record_end`, but the first `scanned` bytes after `offset`
    /// are already known not to end the record.
    fn resume_record_end(&self, data: &[u8], offset: usize, _scanned: usize) -> Option<usize> {
        self.find_record_end(data, offset)
    }

    /// Strips framing bytes (delimiter, length prefix) from a complete record.
    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        record
    }

    /// Handles bytes left over once the stream has ended.
    ///
    /// Returns a final record, nothing, or an error if the leftover bytes
    /// can't form a record.
    fn finish(&self, source_name: &str, remainder: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Name of this record format
    fn name(&self) -> &'static str;
}

/// Fixed-size records
#[derive(Debug, Clone)]
pub struct FixedSizeFormat {
    pub record_size: usize,
}

impl FixedSizeFormat {
    pub fn new(record_size: usize) -> Self {
        Self { record_size }
    }
}

impl RecordFormat for FixedSizeFormat {
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        let end = offset.checked_add(self.record_size)?;
        (self.record_size > 0 && end <= data.len()).then_some(end)
    }

    fn finish(&self, source_name: &str, remainder: &[u8]) -> Result<Option<Vec<u8>>> {
        if remainder.is_empty() {
            Ok(None)
        } else {
            Err(StreamError::truncated_record(
                source_name,
                self.record_size,
                remainder.len(),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "fixed-size"
    }
}

/// Delimiter-terminated records (text lines by default).
///
/// The delimiter is not part of the payload. A final record without a
/// trailing delimiter is still produced; nothing is produced after a
/// trailing delimiter.
#[derive(Debug, Clone)]
pub struct DelimitedFormat {
    pub delimiter: u8,
}

impl DelimitedFormat {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    pub fn lines() -> Self {
        Self::new(b'\n')
    }
}

impl Default for DelimitedFormat {
    fn default() -> Self {
        Self::lines()
    }
}

impl RecordFormat for DelimitedFormat {
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        self.resume_record_end(data, offset, 0)
    }

    fn resume_record_end(&self, data: &[u8], offset: usize, scanned: usize) -> Option<usize> {
        let start = offset.checked_add(scanned)?;
        data.get(start..)?
            .iter()
            .position(|&byte| byte == self.delimiter)
            .map(|i| start + i + 1) // Include the delimiter
    }

    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        match record.split_last() {
            Some((&last, rest)) if last == self.delimiter => rest,
            _ => record,
        }
    }

    fn finish(&self, _source_name: &str, remainder: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok((!remainder.is_empty()).then(|| remainder.to_vec()))
    }

    fn name(&self) -> &'static str {
        "delimited"
    }
}

/// Length-prefixed records (4-byte big-endian length + data)
#[derive(Debug, Clone, Default)]
pub struct LengthPrefixedFormat;

impl LengthPrefixedFormat {
    pub fn new() -> Self {
        Self
    }

    fn declared_len(data: &[u8], offset: usize) -> Option<usize> {
        let length_bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
        Some(u32::from_be_bytes(length_bytes) as usize)
    }
}

impl RecordFormat for LengthPrefixedFormat {
    fn find_record_end(&self, data: &[u8], offset: usize) -> Option<usize> {
        let length = Self::declared_len(data, offset)?;
        let end = offset + 4 + length;
        (end <= data.len()).then_some(end)
    }

    fn payload<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        record.get(4..).unwrap_or_default()
    }

    fn finish(&self, source_name: &str, remainder: &[u8]) -> Result<Option<Vec<u8>>> {
        if remainder.is_empty() {
            return Ok(None);
        }
        let expected = Self::declared_len(remainder, 0).map_or(4, |len| len + 4);
        Err(StreamError::truncated_record(
            source_name,
            expected,
            remainder.len(),
        ))
    }

    fn name(&self) -> &'static str {
        "length-prefixed"
    }
}

/// How a byte stream is cut into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingPolicy {
    FixedSize { record_size: usize },
    Delimited { delimiter: u8 },
    LengthPrefixed,
}

impl FramingPolicy {
    pub fn lines() -> Self {
        FramingPolicy::Delimited { delimiter: b'\n' }
    }

    /// Builds the record format for this policy.
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero record size.
    pub fn format(&self) -> Result<Arc<dyn RecordFormat>> {
        match *self {
            FramingPolicy::FixedSize { record_size: 0 } => Err(StreamError::config(
                "fixed-size framing requires a record size greater than 0",
            )),
            FramingPolicy::FixedSize { record_size } => {
                Ok(Arc::new(FixedSizeFormat::new(record_size)))
            }
            FramingPolicy::Delimited { delimiter } => Ok(Arc::new(DelimitedFormat::new(delimiter))),
            FramingPolicy::LengthPrefixed => Ok(Arc::new(LengthPrefixedFormat::new())),
        }
    }
}

/// A pull-based sequence of raw records.
pub trait RecordSource: Send {
    /// Returns the next record, or `Ok(None)` at end of stream.
    fn next_record(&mut self) -> Result<Option<Vec<u8>>>;

    /// Releases the underlying handle. Idempotent.
    fn close(&mut self);
}

/// Cuts a [`ByteStream`] into records.
///
/// Bytes are pulled in chunks of at most `chunk_size`; a record never
/// spans two returned values regardless of how chunks fall.
pub struct RecordFramer {
    stream: ByteStream,
    format: Arc<dyn RecordFormat>,
    chunk_size: usize,
    buf: Vec<u8>,
    pos: usize,
    /// Bytes after `pos` already searched without finding a record end.
    scanned: usize,
    eof: bool,
    records: u64,
}

impl RecordFramer {
    pub fn new(stream: ByteStream, format: Arc<dyn RecordFormat>, chunk_size: usize) -> Self {
        Self {
            stream,
            format,
            chunk_size: chunk_size.max(1),
            buf: Vec::new(),
            pos: 0,
            scanned: 0,
            eof: false,
            records: 0,
        }
    }

    /// Replaces the framing, e.g. once a header has revealed the record size.
    pub fn set_format(&mut self, format: Arc<dyn RecordFormat>) {
        self.format = format;
        self.scanned = 0;
    }

    pub fn source_name(&self) -> &str {
        self.stream.name()
    }

    /// Records produced so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Reads exactly `len` bytes from the start of the stream.
    ///
    /// # Errors
    ///
    /// Returns `TruncatedRecord` if the stream ends first.
    pub fn read_header(&mut self, len: usize) -> Result<Vec<u8>> {
        while self.buf.len() - self.pos < len {
            if !self.fill()? {
                return Err(StreamError::truncated_record(
                    self.stream.name(),
                    len,
                    self.buf.len() - self.pos,
                ));
            }
        }

        let header = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        self.scanned = 0;
        Ok(header)
    }

    /// Returns the next record, or `Ok(None)` at end of stream.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(end) = self
                .format
                .resume_record_end(&self.buf, self.pos, self.scanned)
            {
                let record = self.format.payload(&self.buf[self.pos..end]).to_vec();
                self.pos = end;
                self.scanned = 0;
                self.records += 1;
                return Ok(Some(record));
            }
            self.scanned = self.buf.len() - self.pos;

            if self.eof {
                let remainder = &self.buf[self.pos..];
                let last = self.format.finish(self.stream.name(), remainder)?;
                self.buf.clear();
                self.pos = 0;
                self.scanned = 0;
                if last.is_some() {
                    self.records += 1;
                }
                return Ok(last);
            }

            self.fill()?;
        }
    }

    /// Pulls one more chunk into the buffer. Returns false at end of stream.
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        match self.stream.read_chunk(self.chunk_size)? {
            Some(chunk) => {
                if self.pos > 0 {
                    self.buf.drain(..self.pos);
                    self.pos = 0;
                }
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    pub fn close(&mut self) {
        self.stream.close();
        self.buf = Vec::new();
        self.pos = 0;
        self.scanned = 0;
        self.eof = true;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }
}

impl RecordSource for RecordFramer {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        RecordFramer::next_record(self)
    }

    fn close(&mut self) {
        RecordFramer::close(self);
    }
}
