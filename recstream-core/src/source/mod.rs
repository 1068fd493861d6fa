// recstream-core/src/source/mod.rs

//! Compressed byte sources.
//!
//! A source is a named byte origin (a local path or a URI such as
//! `igfs:///data/train.txt`) optionally wrapped in a streaming decompressor.
//! [`ByteStream`] is the open handle: it pulls bytes in bounded chunks and
//! releases the underlying file or connection when closed or dropped.
//!
//! # Example
//!
//! ```no_run
//! use recstream_core::config::StorageConfig;
//! use recstream_core::source::{ByteStream, Compression, SourceAddress};
//! use recstream_core::storage::LocalStorage;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//! let address = SourceAddress::parse("train.txt.gz").unwrap();
//! let mut stream = ByteStream::open(&storage, &address, Compression::Gzip, 64 * 1024).unwrap();
//! while let Some(chunk) = stream.read_chunk(4096).unwrap() {
//!     println!("{} bytes", chunk.len());
//! }
//! stream.close();
//! ```

mod address;
mod compression;
mod stream;

pub use address::SourceAddress;
pub use compression::{Compression, FinishWrite};
pub use stream::ByteStream;
