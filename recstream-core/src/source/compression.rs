// recstream-core/src/source/compression.rs

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Streaming compression applied to a whole source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zlib,
}

impl Compression {
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zlib => "zlib",
        }
    }

    /// Wraps a raw reader in the matching decompressor.
    ///
    /// Gzip input may consist of several concatenated members; all of them
    /// are decoded in sequence.
    pub fn decoder<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        match self {
            Compression::None => inner,
            Compression::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Compression::Zlib => Box::new(ZlibDecoder::new(inner)),
        }
    }

    /// Wraps a raw writer in the matching compressor.
    pub fn encoder<'a, W: Write + Send + 'a>(&self, inner: W) -> Box<dyn FinishWrite + 'a> {
        match self {
            Compression::None => Box::new(Plain(inner)),
            Compression::Gzip => Box::new(GzEncoder::new(inner, flate2::Compression::default())),
            Compression::Zlib => Box::new(ZlibEncoder::new(inner, flate2::Compression::default())),
        }
    }
}

/// A writer whose trailing bytes (compression footers) are only emitted by
/// an explicit `finish_stream`.
pub trait FinishWrite: Write + Send {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()>;
}

struct Plain<W>(W);

impl<W: Write> Write for Plain<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for Plain<W> {
    fn finish_stream(mut self: Box<Self>) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write + Send> FinishWrite for GzEncoder<W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = (*self).finish()?;
        inner.flush()
    }
}

impl<W: Write + Send> FinishWrite for ZlibEncoder<W> {
    fn finish_stream(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = (*self).finish()?;
        inner.flush()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = StreamError;

    /// Accepts `""`/`none`, `gz`/`gzip` and `zlib`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "zlib" => Ok(Compression::Zlib),
            _ => Err(StreamError::unsupported_compression(s)),
        }
    }
}
