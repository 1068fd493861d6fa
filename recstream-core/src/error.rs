// recstream-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {

    #[error("Source not found: '{path}'")]
    SourceNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Unsupported compression '{value}' (expected one of: none, gzip, zlib)")]
    UnsupportedCompression {
        value: String,
    },

    #[error("Corrupt stream in '{source_name}': {message}")]
    CorruptStream {
        source_name: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Truncated record in '{source_name}': expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        source_name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed record for decoder '{decoder}': {message}")]
    MalformedRecord {
        decoder: &'static str,
        message: String,
    },

    #[error("Zipped branches out of sync: branches {exhausted:?} ended while {active:?} still produced elements")]
    ZipMisalignment {
        exhausted: Vec<usize>,
        active: Vec<usize>,
    },

    #[error("Remote source '{address}' unavailable: {message}")]
    RemoteSourceUnavailable {
        address: String,
        message: String,
    },

    #[error("Iterator exhausted")]
    IteratorExhausted,

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Output signature mismatch: declared {declared}, decoder produces {actual}")]
    SignatureMismatch {
        declared: String,
        actual: String,
    },

    #[error("Remote error from '{address}': {message}")]
    Remote {
        address: String,
        message: String,
    },

    #[error("Worker error: {message}")]
    Worker {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, StreamError>;

// Convenience constructors
impl StreamError {

    pub fn source_not_found(path: impl Into<String>) -> Self {
        Self::SourceNotFound {
            path: path.into(),
            source: None,
        }
    }

    pub fn unsupported_compression(value: impl Into<String>) -> Self {
        Self::UnsupportedCompression {
            value: value.into(),
        }
    }

    pub fn corrupt_stream(
        source_name: impl Into<String>,
        message: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::CorruptStream {
            source_name: source_name.into(),
            message: message.into(),
            source,
        }
    }

    pub fn truncated_record(source_name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::TruncatedRecord {
            source_name: source_name.into(),
            expected,
            actual,
        }
    }

    pub fn malformed(decoder: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            decoder,
            message: message.into(),
        }
    }

    pub fn remote_unavailable(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteSourceUnavailable {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn remote(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::SourceNotFound {
                path: path.display().to_string(),
                source: Some(source),
            };
        }
        Self::Storage {
            path,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for the normal end-of-data signal, which consumers treat as the
    /// end of an epoch rather than a failure.
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, Self::IteratorExhausted)
    }

    /// True for transient remote failures that may succeed on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteSourceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_io_error_maps_to_source_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = StreamError::storage_with_source("/data/x.bin", "failed to open file", io);
        assert!(matches!(err, StreamError::SourceNotFound { .. }));
        assert!(err.to_string().contains("/data/x.bin"));
    }

    #[test]
    fn test_other_io_error_stays_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StreamError::storage_with_source("/data/x.bin", "failed to open file", io);
        assert!(matches!(err, StreamError::Storage { .. }));
    }

    #[test]
    fn test_classification() {
        assert!(StreamError::IteratorExhausted.is_end_of_data());
        assert!(!StreamError::IteratorExhausted.is_retryable());

        let remote = StreamError::remote_unavailable("localhost:10800", "connection reset");
        assert!(remote.is_retryable());
        assert!(!remote.is_end_of_data());

        assert!(!StreamError::remote("localhost:10800", "auth refused").is_retryable());
    }
}
