// recstream-core/src/remote/mod.rs

//! Remote cache access.
//!
//! The remote cache is an external, ordered key/value grid. This module
//! defines the client-side contract ([`CacheService`], [`CacheConnection`]),
//! an in-process implementation ([`InMemoryCache`]), and
//! [`RemoteBlockSource`], which scans a cache entry by entry with
//! reconnect-on-drop semantics.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use recstream_core::config::RemoteCacheConfig;
//! use recstream_core::remote::{InMemoryCache, RemoteBlockSource};
//!
//! let cache = InMemoryCache::new();
//! cache.insert("SQL_PUBLIC_TEST", b"1".to_vec(), b"one".to_vec());
//!
//! let config = RemoteCacheConfig {
//!     cache_name: "SQL_PUBLIC_TEST".to_string(),
//!     ..Default::default()
//! };
//! let mut source = RemoteBlockSource::open(Arc::new(cache), &config).unwrap();
//! let entry = source.read_next_entry().unwrap().unwrap();
//! assert_eq!(entry.value, b"one");
//! ```

mod memory;
mod service;
mod source;

pub use memory::{partition_of, InMemoryCache};
pub use service::{
    CacheConnection, CacheEntry, CacheService, Credentials, RemoteEndpoint, ScanPage, ScanRequest,
};
pub use source::RemoteBlockSource;
