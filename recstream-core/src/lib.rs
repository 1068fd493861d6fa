// recstream-core/src/lib.rs

//! Streaming record reader framework - Core Library
//!
//! This crate reads named, possibly compressed byte sources (local files,
//! a remote block store, or a remote key/value cache), cuts them into
//! records, decodes each record into a typed value and exposes the result
//! as restartable, lazily evaluated datasets.

pub mod config;
pub mod error;
pub mod signature;
pub mod source;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use signature::{DecodedValue, ElementType, OutputSignature, Shape};
pub use source::{ByteStream, Compression, SourceAddress};
pub use storage::{LocalStorage, RemoteFs, StorageBackend, StorageResolver};

pub mod remote;
pub use remote::{CacheService, InMemoryCache, RemoteBlockSource};

pub mod dataset;
pub use dataset::{
    Dataset, DatasetIterator, Decoder, ElementStream, FramingPolicy, IteratorState, Pipeline,
    SourceSpec, ZippedDataset,
};

pub mod registry;
pub mod sink;
pub use sink::TextOutputSequence;

pub mod runtime;
pub use runtime::StreamRuntime;
