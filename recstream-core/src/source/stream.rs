// recstream-core/src/source/stream.rs

use std::io::{BufReader, ErrorKind, Read};

use super::{Compression, SourceAddress};
use crate::error::{Result, StreamError};
use crate::storage::StorageBackend;

/// An open, pull-based byte stream over one source.
///
/// The stream exclusively owns its underlying file or connection. `close`
/// releases it immediately and is idempotent; dropping the stream has the
/// same effect.
pub struct ByteStream {
    name: String,
    compression: Compression,
    reader: Option<Box<dyn Read + Send>>,
    bytes_read: u64,
}

impl ByteStream {
    /// Opens `address` on `storage`, layering the decompressor for
    /// `compression` on top of a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if the backend has no object at the path,
    /// or a storage error if it cannot be opened.
    pub fn open(
        storage: &dyn StorageBackend,
        address: &SourceAddress,
        compression: Compression,
        buffer_size: usize,
    ) -> Result<Self> {
        let raw = storage.open_read(address.path())?;
        let buffered: Box<dyn Read + Send> =
            Box::new(BufReader::with_capacity(buffer_size.max(1), raw));

        tracing::debug!(source = %address, %compression, "opened byte source");

        Ok(Self::from_reader(address.to_string(), buffered, compression))
    }

    /// Wraps an already-open reader.
    pub fn from_reader(
        name: impl Into<String>,
        reader: Box<dyn Read + Send>,
        compression: Compression,
    ) -> Self {
        Self {
            name: name.into(),
            compression,
            reader: Some(compression.decoder(reader)),
            bytes_read: 0,
        }
    }

    /// Reads up to `max_bytes` decompressed bytes.
    ///
    /// Returns `Ok(None)` at end of stream. A malformed compressed stream
    /// fails with `CorruptStream`; no partial data is salvaged from it.
    pub fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            StreamError::storage(&self.name, "read from a closed byte stream")
        })?;

        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = loop {
            match reader.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.map_read_error(e)),
            }
        };

        if n == 0 {
            return Ok(None);
        }

        buf.truncate(n);
        self.bytes_read += n as u64;
        Ok(Some(buf))
    }

    fn map_read_error(&self, e: std::io::Error) -> StreamError {
        let decoding_failure = matches!(
            e.kind(),
            ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::UnexpectedEof
        );
        if self.compression != Compression::None && decoding_failure {
            StreamError::corrupt_stream(
                &self.name,
                format!("invalid {} data", self.compression),
                Some(e),
            )
        } else {
            StreamError::storage_with_source(&self.name, "failed to read source", e)
        }
    }

    /// Releases the underlying handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(source = %self.name, bytes = self.bytes_read, "closed byte source");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Decompressed bytes delivered so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("name", &self.name)
            .field("compression", &self.compression)
            .field("closed", &self.is_closed())
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::LocalStorage;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn drain(stream: &mut ByteStream, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(bytes) = stream.read_chunk(chunk).unwrap() {
            assert!(bytes.len() <= chunk);
            out.extend_from_slice(&bytes);
        }
        out
    }

    #[test]
    fn test_read_plain_in_chunks() {
        let mut stream = ByteStream::from_reader(
            "mem",
            Box::new(Cursor::new(b"0123456789".to_vec())),
            Compression::None,
        );
        assert_eq!(drain(&mut stream, 3), b"0123456789");
        assert_eq!(stream.bytes_read(), 10);
        assert!(stream.read_chunk(3).unwrap().is_none());
    }

    #[test]
    fn test_read_gzip() {
        let mut stream = ByteStream::from_reader(
            "mem.gz",
            Box::new(Cursor::new(gzip(b"a\nb\nc\n"))),
            Compression::Gzip,
        );
        assert_eq!(drain(&mut stream, 2), b"a\nb\nc\n");
    }

    #[test]
    fn test_corrupt_gzip_is_corrupt_stream() {
        let mut stream = ByteStream::from_reader(
            "bad.gz",
            Box::new(Cursor::new(b"this is not gzip data at all".to_vec())),
            Compression::Gzip,
        );
        let err = stream.read_chunk(1024).unwrap_err();
        assert!(matches!(err, StreamError::CorruptStream { .. }), "{err}");
    }

    #[test]
    fn test_truncated_gzip_is_corrupt_stream() {
        let mut data = gzip(&vec![7u8; 10_000]);
        data.truncate(data.len() / 2);
        let mut stream =
            ByteStream::from_reader("cut.gz", Box::new(Cursor::new(data)), Compression::Gzip);

        let result = (|| -> Result<()> {
            while stream.read_chunk(512)?.is_some() {}
            Ok(())
        })();
        assert!(matches!(result, Err(StreamError::CorruptStream { .. })));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut stream = ByteStream::from_reader(
            "mem",
            Box::new(Cursor::new(b"abc".to_vec())),
            Compression::None,
        );
        stream.close();
        stream.close();
        assert!(stream.is_closed());
        assert!(stream.read_chunk(1).is_err());
    }

    #[test]
    fn test_open_missing_source() {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        let address = SourceAddress::parse("missing.bin").unwrap();
        let err = ByteStream::open(&storage, &address, Compression::None, 1024).unwrap_err();
        assert!(matches!(err, StreamError::SourceNotFound { .. }));
    }

    #[test]
    fn test_open_local_gzip_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("lines.gz"), gzip(b"x\ny\n")).unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        let address = SourceAddress::parse("lines.gz").unwrap();
        let mut stream = ByteStream::open(&storage, &address, Compression::Gzip, 16).unwrap();
        assert_eq!(drain(&mut stream, 1), b"x\ny\n");
    }
}
