// recstream-core/src/config.rs

//! Configuration management for recstream.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values. Environment
//! variables are consulted only by [`StreamConfig::with_env_overrides`], which
//! the runtime calls once at construction.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, StreamError};
use crate::source::Compression;

/// A credential value that never appears in logs or debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the underlying value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub remote: RemoteCacheConfig,
    pub interleave: InterleaveConfig,
}

// Local storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative source paths are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for buffered file I/O.
    pub buffer_size: usize,
    // Whether to use memory-mapped reads for large files.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

/// Byte source options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Default compression mode: "none", "gzip" ("gz") or "zlib".
    pub compression: String,
    /// Maximum number of bytes pulled from a source per read.
    pub read_chunk_size: usize,
}

/// Remote cache (and remote block filesystem) options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheConfig {
    /// Name of the cache scanned by remote datasets.
    pub cache_name: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,
    /// Client certificate path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certfile: Option<PathBuf>,
    /// Client private key path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_password: Option<Secret>,
    /// Entries fetched per scan request.
    pub page_size: usize,
    /// Restrict scans to a single partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<u32>,
    /// Reconnect attempts after a dropped connection before giving up.
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
    /// Cache holding the remote filesystem's blocks and metadata.
    pub fs_cache_name: String,
    /// Block size in bytes for remote filesystem files.
    pub block_size: usize,
}

/// Interleave options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterleaveConfig {
    /// Number of branches drawn from concurrently.
    pub cycle_length: usize,
    /// Consecutive elements drawn from a branch per turn.
    pub block_length: usize,
    /// Bounded queue capacity per worker.
    pub buffer_size: usize,
    /// Run each branch on its own worker thread.
    pub parallel: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            compression: "none".to_string(),
            read_chunk_size: 64 * 1024,
        }
    }
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            cache_name: String::new(),
            host: "localhost".to_string(),
            port: 10800,
            username: None,
            password: None,
            certfile: None,
            keyfile: None,
            cert_password: None,
            page_size: 100,
            partition: None,
            max_reconnects: 1,
            reconnect_delay_ms: 100,
            fs_cache_name: "igfs".to_string(),
            block_size: 64 * 1024,
        }
    }
}

impl Default for InterleaveConfig {
    fn default() -> Self {
        Self {
            cycle_length: 1,
            block_length: 1,
            buffer_size: 4,
            parallel: false,
        }
    }
}

impl InterleaveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_length == 0 {
            return Err(StreamError::config(
                "interleave.cycle_length must be greater than 0",
            ));
        }
        if self.block_length == 0 {
            return Err(StreamError::config(
                "interleave.block_length must be greater than 0",
            ));
        }
        if self.buffer_size == 0 {
            return Err(StreamError::config(
                "interleave.buffer_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl RemoteCacheConfig {
    /// `host:port` as used in log lines and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply `RECSTREAM_REMOTE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_CACHE_NAME") {
            self.cache_name = val;
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_PORT") {
            if let Ok(v) = val.parse() {
                self.port = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_USERNAME") {
            self.username = Some(val);
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_PASSWORD") {
            self.password = Some(Secret::new(val));
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_CERTFILE") {
            self.certfile = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_KEYFILE") {
            self.keyfile = Some(PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_CERT_PASSWORD") {
            self.cert_password = Some(Secret::new(val));
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_PAGE_SIZE") {
            if let Ok(v) = val.parse() {
                self.page_size = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_PARTITION") {
            if let Ok(v) = val.parse() {
                self.partition = Some(v);
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_MAX_RECONNECTS") {
            if let Ok(v) = val.parse() {
                self.max_reconnects = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_REMOTE_BLOCK_SIZE") {
            if let Ok(v) = val.parse() {
                self.block_size = v;
            }
        }
        self
    }

    /// Validate remote configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StreamError::config("remote.host must not be empty"));
        }
        if self.page_size == 0 {
            return Err(StreamError::config(
                "remote.page_size must be greater than 0",
            ));
        }
        if self.block_size == 0 {
            return Err(StreamError::config(
                "remote.block_size must be greater than 0",
            ));
        }
        if self.fs_cache_name.is_empty() {
            return Err(StreamError::config(
                "remote.fs_cache_name must not be empty",
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(StreamError::config(
                "remote.password requires remote.username",
            ));
        }
        Ok(())
    }
}

impl FromStr for StreamConfig {
    type Err = StreamError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| StreamError::config_with_source("failed to parse TOML config", e))
    }
}

impl StreamConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `RECSTREAM_` and name the section and
    // field, e.g. `RECSTREAM_STORAGE_BASE_PATH` or
    // `RECSTREAM_INTERLEAVE_CYCLE_LENGTH`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("RECSTREAM_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("RECSTREAM_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        // Source overrides
        if let Ok(val) = std::env::var("RECSTREAM_SOURCE_COMPRESSION") {
            self.source.compression = val;
        }
        if let Ok(val) = std::env::var("RECSTREAM_SOURCE_READ_CHUNK_SIZE") {
            if let Ok(v) = val.parse() {
                self.source.read_chunk_size = v;
            }
        }

        self.remote = self.remote.with_env_overrides();

        // Interleave overrides
        if let Ok(val) = std::env::var("RECSTREAM_INTERLEAVE_CYCLE_LENGTH") {
            if let Ok(v) = val.parse() {
                self.interleave.cycle_length = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_INTERLEAVE_BLOCK_LENGTH") {
            if let Ok(v) = val.parse() {
                self.interleave.block_length = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_INTERLEAVE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.interleave.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("RECSTREAM_INTERLEAVE_PARALLEL") {
            if let Ok(v) = val.parse() {
                self.interleave.parallel = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(StreamError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        self.source.compression.parse::<Compression>()?;
        if self.source.read_chunk_size == 0 {
            return Err(StreamError::config(
                "source.read_chunk_size must be greater than 0",
            ));
        }

        self.remote.validate()?;
        self.interleave.validate()
    }

    /// The configured default compression mode.
    pub fn compression(&self) -> Result<Compression> {
        self.source.compression.parse()
    }
}
