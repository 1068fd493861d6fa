// recstream-core/src/storage/mod.rs

//! Storage abstraction for recstream.
//!
//! Byte sources and the text output sink talk to storage through the
//! filesystem-style [`StorageBackend`] trait. Two backends are provided:
//!
//! - [`LocalStorage`]: the local filesystem (`file` scheme, and plain paths).
//! - [`RemoteFs`]: files stored as blocks in a remote cache (`igfs` scheme).
//!
//! A [`StorageResolver`] maps the scheme of a [`SourceAddress`] to the
//! backend that serves it.
//!
//! # Example
//!
//! ```no_run
//! use recstream_core::config::StorageConfig;
//! use recstream_core::storage::{LocalStorage, StorageBackend};
//! use std::io::{Read, Write};
//! use std::path::Path;
//!
//! let config = StorageConfig::default();
//! let storage = LocalStorage::new(&config).unwrap();
//!
//! // Write a file
//! let mut writer = storage.open_write(Path::new("example.txt")).unwrap();
//! writer.write_all(b"Hello, world!").unwrap();
//! writer.finish().unwrap();
//!
//! // Read it back
//! let mut reader = storage.open_read(Path::new("example.txt")).unwrap();
//! let mut content = String::new();
//! reader.read_to_string(&mut content).unwrap();
//! ```

mod local;
mod remote_fs;
mod retry;
mod traits;

pub use local::LocalStorage;
pub use remote_fs::{RemoteFs, REMOTE_FS_SCHEME};
pub use retry::{retry_blocking, RetryConfig};
pub use traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, StreamError};
use crate::source::SourceAddress;

/// Maps URI schemes to storage backends.
#[derive(Clone, Default)]
pub struct StorageResolver {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` under its own scheme, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        self.backends
            .insert(backend.scheme().to_string(), backend);
    }

    /// Registers `backend` under an explicit scheme.
    pub fn register_as(&mut self, scheme: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.backends.insert(scheme.into(), backend);
    }

    /// Finds the backend serving `address`.
    ///
    /// # Errors
    ///
    /// Returns a config error if no backend is registered for the scheme.
    pub fn resolve(&self, address: &SourceAddress) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(address.scheme())
            .cloned()
            .ok_or_else(|| {
                StreamError::config(format!(
                    "no storage backend registered for scheme '{}' (source '{address}')",
                    address.scheme()
                ))
            })
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.backends.contains_key(scheme)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.backends.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for StorageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageResolver")
            .field("schemes", &self.schemes())
            .finish()
    }
}
