// recstream-core/src/remote/service.rs

//! Traits describing the remote cache collaborator.
//!
//! The cache is an ordered key/value store reached over a network
//! connection. Scans are paged through server-side cursors that live only
//! as long as the connection that opened them.

use std::fmt;
use std::path::PathBuf;

use crate::config::{RemoteCacheConfig, Secret};
use crate::error::{Result, StreamError};

/// Network location of a cache node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn from_config(config: &RemoteCacheConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Optional client credentials.
///
/// Passwords are held as [`Secret`] so `Debug` output never contains them.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub cert_password: Option<Secret>,
}

impl Credentials {
    pub fn from_config(config: &RemoteCacheConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            certfile: config.certfile.clone(),
            keyfile: config.keyfile.clone(),
            cert_password: config.cert_password.clone(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.certfile.is_none()
    }
}

/// One key/value pair read from a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl CacheEntry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Encodes the entry as one record: `[u32 key_len][key][u32 value_len][value]`,
    /// lengths big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.key.len() + self.value.len());
        out.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    /// Decodes a record produced by [`CacheEntry::encode`].
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if the lengths don't match the record size.
    pub fn decode(record: &[u8]) -> Result<Self> {
        let (key, rest) = split_field(record, "key")?;
        let (value, rest) = split_field(rest, "value")?;
        if !rest.is_empty() {
            return Err(StreamError::malformed(
                "kv",
                format!("{} trailing bytes after value", rest.len()),
            ));
        }
        Ok(Self::new(key, value))
    }
}

fn split_field<'a>(data: &'a [u8], field: &str) -> Result<(&'a [u8], &'a [u8])> {
    if data.len() < 4 {
        return Err(StreamError::malformed(
            "kv",
            format!("missing {field} length prefix"),
        ));
    }
    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    if body.len() < len {
        return Err(StreamError::malformed(
            "kv",
            format!("{field} declares {len} bytes but only {} remain", body.len()),
        ));
    }
    Ok(body.split_at(len))
}

/// Parameters for opening a scan cursor.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub cache: String,
    /// Only scan keys that belong to this partition.
    pub partition: Option<u32>,
    pub page_size: usize,
    /// Start strictly after this key. Only honored by connections that
    /// report [`CacheConnection::supports_resume`].
    pub resume_after: Option<Vec<u8>>,
}

/// One page of scan results.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub entries: Vec<CacheEntry>,
    /// Cursor for the next page; `None` once the scan is complete.
    pub cursor: Option<u64>,
}

/// A live connection to a cache node.
///
/// A connection that has dropped fails every later call with
/// `RemoteSourceUnavailable`; callers must open a fresh one.
pub trait CacheConnection: Send {
    /// Whether scans can start after a given key.
    fn supports_resume(&self) -> bool;

    /// Opens a scan cursor and returns its first page.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if the cache doesn't exist.
    fn scan(&mut self, request: &ScanRequest) -> Result<ScanPage>;

    /// Fetches the next page of an open cursor.
    fn next_page(&mut self, cursor: u64) -> Result<ScanPage>;

    fn get(&mut self, cache: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores a value, creating the cache if needed.
    fn put(&mut self, cache: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a key. Returns whether it was present.
    fn remove(&mut self, cache: &str, key: &[u8]) -> Result<bool>;

    /// Returns all keys starting with `prefix`, in key order.
    fn keys_with_prefix(&mut self, cache: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Closes the connection, aborting any open cursors. Idempotent.
    fn close(&mut self);
}

/// Factory for cache connections.
pub trait CacheService: Send + Sync {
    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSourceUnavailable` if the node can't be reached and
    /// `Remote` if the credentials are refused.
    fn connect(
        &self,
        endpoint: &RemoteEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn CacheConnection>>;
}
