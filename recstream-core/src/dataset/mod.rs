// recstream-core/src/dataset/mod.rs

//! Datasets and the iterators that read them.
//!
//! A [`Dataset`] is a stateless description: sources, a compression mode
//! and a [`Decoder`]. Calling [`Pipeline::make_iterator`] starts a pass that
//! opens the sources in order, cuts their bytes into records with a
//! [`RecordFormat`] and decodes each record into a typed value. Datasets
//! compose with [`ZippedDataset`], [`RepeatedDataset`] and
//! [`InterleavedDataset`].
//!
//! # Example
//!
//! ```ignore
//! use recstream_core::dataset::{Dataset, Decoder, Pipeline, SourceSpec};
//! use recstream_core::source::{Compression, SourceAddress};
//!
//! let source = SourceSpec::storage(SourceAddress::parse("data/train.txt.gz")?, storage);
//! let dataset = Dataset::new(vec![source], Compression::Gzip, Decoder::text_lines())?;
//!
//! for line in dataset.make_iterator() {
//!     println!("{}", line?);
//! }
//! ```

mod decoder;
mod framing;
mod interleave;
mod iterator;
mod repeat;
mod traits;
mod zip;

pub use decoder::{encode_struct, BoundDecoder, Decoder, MNIST_IMAGE_MAGIC, MNIST_LABEL_MAGIC};
pub use framing::{
    DelimitedFormat, FixedSizeFormat, FramingPolicy, LengthPrefixedFormat, RecordFormat,
    RecordFramer, RecordSource,
};
pub use interleave::{InterleaveIterator, InterleavedDataset};
pub use iterator::{Dataset, DatasetIterator, SourceSpec};
pub use repeat::{RepeatIterator, RepeatedDataset};
pub use traits::{ElementStream, IteratorState, Pipeline};
pub use zip::{ZipIterator, ZippedDataset};
