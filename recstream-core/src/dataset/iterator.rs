// recstream-core/src/dataset/iterator.rs

use std::fmt;
use std::sync::Arc;

use super::decoder::{BoundDecoder, Decoder};
use super::framing::{FixedSizeFormat, FramingPolicy, RecordFramer, RecordSource};
use super::traits::{ElementStream, IteratorState, Pipeline};
use super::zip::ZippedDataset;
use crate::config::RemoteCacheConfig;
use crate::error::{Result, StreamError};
use crate::remote::{CacheService, RemoteBlockSource};
use crate::signature::{DecodedValue, OutputSignature};
use crate::source::{ByteStream, Compression, SourceAddress};
use crate::storage::StorageBackend;

/// Where a dataset's records come from.
#[derive(Clone)]
pub enum SourceSpec {
    /// A byte source on a storage backend.
    Storage {
        address: SourceAddress,
        backend: Arc<dyn StorageBackend>,
    },
    /// A scan over every entry of a remote cache.
    RemoteCache {
        service: Arc<dyn CacheService>,
        config: RemoteCacheConfig,
    },
}

impl SourceSpec {
    pub fn storage(address: SourceAddress, backend: Arc<dyn StorageBackend>) -> Self {
        SourceSpec::Storage { address, backend }
    }

    pub fn name(&self) -> String {
        match self {
            SourceSpec::Storage { address, .. } => address.to_string(),
            SourceSpec::RemoteCache { config, .. } => {
                format!("{}/{}", config.address(), config.cache_name)
            }
        }
    }
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Storage { address, backend } => f
                .debug_struct("Storage")
                .field("address", &address.to_string())
                .field("scheme", &backend.scheme())
                .finish(),
            SourceSpec::RemoteCache { config, .. } => f
                .debug_struct("RemoteCache")
                .field("address", &config.address())
                .field("cache_name", &config.cache_name)
                .finish(),
        }
    }
}

/// A stateless description of a record sequence: sources, compression and
/// decoder.
///
/// Constructing a dataset opens nothing. Each call to
/// [`make_iterator`](Pipeline::make_iterator) starts an independent pass
/// that reads the sources in order.
#[derive(Debug, Clone)]
pub struct Dataset {
    sources: Vec<SourceSpec>,
    compression: Compression,
    decoder: Decoder,
    read_chunk_size: usize,
    buffer_size: usize,
}

impl Dataset {
    /// Creates a dataset.
    ///
    /// # Errors
    ///
    /// Returns a config error if there are no sources, if the decoder
    /// doesn't suit the kind of source, or if the framing is invalid.
    pub fn new(sources: Vec<SourceSpec>, compression: Compression, decoder: Decoder) -> Result<Self> {
        if sources.is_empty() {
            return Err(StreamError::config("a dataset needs at least one source"));
        }

        for source in &sources {
            let remote = matches!(source, SourceSpec::RemoteCache { .. });
            if remote != decoder.reads_remote_cache() {
                return Err(StreamError::config(format!(
                    "decoder '{}' can't read source '{}'",
                    decoder.name(),
                    source.name()
                )));
            }
            if remote && compression != Compression::None {
                return Err(StreamError::config(format!(
                    "compression '{compression}' is not supported for remote cache sources"
                )));
            }
        }

        if let Decoder::Raw { framing } = &decoder {
            framing.format()?;
        }

        Ok(Self {
            sources,
            compression,
            decoder,
            read_chunk_size: 64 * 1024,
            buffer_size: 64 * 1024,
        })
    }

    /// Bytes pulled from a source per read.
    #[must_use]
    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size.max(1);
        self
    }

    /// Buffer size of the reader under the decompressor.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn output_signature(&self) -> OutputSignature {
        self.decoder.output_signature()
    }

    /// Pairs this dataset element-wise with `other`.
    pub fn zip(self, other: Dataset) -> ZippedDataset<Dataset> {
        ZippedDataset::new(vec![self, other])
    }
}

impl Pipeline for Dataset {
    type Iter = DatasetIterator;

    fn make_iterator(&self) -> DatasetIterator {
        DatasetIterator::new(self.clone())
    }

    fn output_signatures(&self) -> Vec<OutputSignature> {
        vec![self.output_signature()]
    }
}

/// One open source: its records and the decoder bound to its header.
struct OpenSource {
    name: String,
    records: Box<dyn RecordSource>,
    decoder: BoundDecoder,
    delivered: u64,
}

impl OpenSource {
    fn next_value(&mut self) -> Result<Option<DecodedValue>> {
        let expected = self.decoder.expected_records;

        // Bytes past the declared record count are ignored.
        if matches!(expected, Some(n) if self.delivered >= n) {
            return Ok(None);
        }

        match self.records.next_record()? {
            Some(record) => {
                let value = self.decoder.decode(&record)?;
                self.delivered += 1;
                Ok(Some(value))
            }
            None => match expected {
                Some(n) if self.delivered < n => {
                    let record_size = match self.decoder.framing {
                        Some(FramingPolicy::FixedSize { record_size }) => record_size,
                        _ => 1,
                    };
                    let bytes = |records: u64| {
                        usize::try_from(records)
                            .unwrap_or(usize::MAX)
                            .saturating_mul(record_size)
                    };
                    Err(StreamError::truncated_record(
                        &self.name,
                        bytes(n),
                        bytes(self.delivered),
                    ))
                }
                _ => Ok(None),
            },
        }
    }

    fn close(&mut self) {
        self.records.close();
    }
}

/// The live cursor over a [`Dataset`].
///
/// Sources are opened one at a time, in order, when the first element from
/// each is needed. Exhaustion and `close` both release the open source
/// before returning.
pub struct DatasetIterator {
    dataset: Dataset,
    declared: OutputSignature,
    state: IteratorState,
    next_source: usize,
    current: Option<OpenSource>,
    produced: u64,
}

impl DatasetIterator {
    fn new(dataset: Dataset) -> Self {
        let declared = dataset.output_signature();
        Self {
            dataset,
            declared,
            state: IteratorState::Unopened,
            next_source: 0,
            current: None,
            produced: 0,
        }
    }

    /// Elements produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Name of the source currently open, if any.
    pub fn current_source(&self) -> Option<&str> {
        self.current.as_ref().map(|source| source.name.as_str())
    }

    fn advance(&mut self) -> Result<Option<DecodedValue>> {
        loop {
            let source = match self.current.as_mut() {
                Some(source) => source,
                None => {
                    if self.next_source >= self.dataset.sources.len() {
                        return Ok(None);
                    }
                    let opened = self.open_source(self.next_source)?;
                    self.next_source += 1;
                    self.current.insert(opened)
                }
            };

            if let Some(value) = source.next_value()? {
                return Ok(Some(value));
            }

            if let Some(mut finished) = self.current.take() {
                tracing::debug!(
                    source = %finished.name,
                    records = finished.delivered,
                    "source exhausted"
                );
                finished.close();
            }
        }
    }

    fn open_source(&self, index: usize) -> Result<OpenSource> {
        let spec = &self.dataset.sources[index];
        let decoder = &self.dataset.decoder;

        let (records, bound): (Box<dyn RecordSource>, BoundDecoder) = match spec {
            SourceSpec::Storage { address, backend } => {
                let stream = ByteStream::open(
                    backend.as_ref(),
                    address,
                    self.dataset.compression,
                    self.dataset.buffer_size,
                )?;

                let header_len = decoder.header_len();
                if header_len == 0 {
                    let bound = decoder.bind(&[])?;
                    let framing = bound.framing.ok_or_else(|| {
                        StreamError::config(format!(
                            "decoder '{}' has no framing for byte sources",
                            decoder.name()
                        ))
                    })?;
                    let framer =
                        RecordFramer::new(stream, framing.format()?, self.dataset.read_chunk_size);
                    (Box::new(framer), bound)
                } else {
                    let mut framer = RecordFramer::new(
                        stream,
                        Arc::new(FixedSizeFormat::new(header_len)),
                        self.dataset.read_chunk_size,
                    );
                    let header = framer.read_header(header_len)?;
                    let bound = decoder.bind(&header)?;
                    if let Some(framing) = bound.framing {
                        framer.set_format(framing.format()?);
                    }
                    tracing::debug!(
                        source = %address,
                        decoder = decoder.name(),
                        expected_records = ?bound.expected_records,
                        signature = %bound.output_signature(),
                        "resolved source header"
                    );
                    (Box::new(framer), bound)
                }
            }
            SourceSpec::RemoteCache { service, config } => {
                let source = RemoteBlockSource::open(Arc::clone(service), config)?;
                (Box::new(source), decoder.bind(&[])?)
            }
        };

        let resolved = bound.output_signature();
        if !self.declared.accepts(&resolved) {
            return Err(StreamError::SignatureMismatch {
                declared: self.declared.to_string(),
                actual: resolved.to_string(),
            });
        }

        Ok(OpenSource {
            name: spec.name(),
            records,
            decoder: bound,
            delivered: 0,
        })
    }

    fn release(&mut self) {
        if let Some(mut source) = self.current.take() {
            source.close();
        }
    }
}

impl ElementStream for DatasetIterator {
    type Item = DecodedValue;

    fn next_element(&mut self) -> Result<DecodedValue> {
        match self.state {
            IteratorState::Exhausted | IteratorState::Closed => {
                return Err(StreamError::IteratorExhausted)
            }
            IteratorState::Unopened => {
                self.state = IteratorState::Open;
            }
            IteratorState::Open => {}
        }

        match self.advance() {
            Ok(Some(value)) => {
                self.produced += 1;
                Ok(value)
            }
            Ok(None) => {
                self.release();
                self.state = IteratorState::Exhausted;
                Err(StreamError::IteratorExhausted)
            }
            Err(e) => {
                tracing::debug!(error = %e, produced = self.produced, "closing iterator after error");
                self.release();
                self.state = IteratorState::Closed;
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.release();
        self.state = IteratorState::Closed;
    }

    fn state(&self) -> IteratorState {
        self.state
    }
}

impl Iterator for DatasetIterator {
    type Item = Result<DecodedValue>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_element() {
            Ok(value) => Some(Ok(value)),
            Err(e) if e.is_end_of_data() => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for DatasetIterator {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::dataset::decoder::{MNIST_IMAGE_MAGIC, MNIST_LABEL_MAGIC};
    use crate::remote::InMemoryCache;
    use crate::signature::ElementType;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    fn create_test_storage() -> (Arc<dyn StorageBackend>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        (Arc::new(storage), temp_dir)
    }

    fn dataset(
        storage: &Arc<dyn StorageBackend>,
        paths: &[&str],
        decoder: Decoder,
    ) -> Dataset {
        let sources = paths
            .iter()
            .map(|p| SourceSpec::storage(SourceAddress::parse(p).unwrap(), Arc::clone(storage)))
            .collect();
        Dataset::new(sources, Compression::None, decoder)
            .unwrap()
            .with_read_chunk_size(3)
    }

    fn label_file(labels: &[u8], declared: u32) -> Vec<u8> {
        let mut data = MNIST_LABEL_MAGIC.to_be_bytes().to_vec();
        data.extend_from_slice(&declared.to_be_bytes());
        data.extend_from_slice(labels);
        data
    }

    fn drain(iter: &mut DatasetIterator) -> Result<Vec<DecodedValue>> {
        let mut out = Vec::new();
        loop {
            match iter.next_element() {
                Ok(v) => out.push(v),
                Err(e) if e.is_end_of_data() => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    #[test]
    fn test_state_machine() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("a.txt"), "x\ny").unwrap();
        let ds = dataset(&storage, &["a.txt"], Decoder::text_lines());

        let mut iter = ds.make_iterator();
        assert_eq!(iter.state(), IteratorState::Unopened);
        assert_eq!(iter.next_element().unwrap(), DecodedValue::Text("x".into()));
        assert_eq!(iter.state(), IteratorState::Open);
        assert_eq!(iter.next_element().unwrap(), DecodedValue::Text("y".into()));
        assert!(iter.next_element().unwrap_err().is_end_of_data());
        assert_eq!(iter.state(), IteratorState::Exhausted);
        assert!(iter.current_source().is_none());

        // Exhausted stays exhausted
        assert!(iter.next_element().unwrap_err().is_end_of_data());
        iter.close();
        iter.close();
        assert_eq!(iter.state(), IteratorState::Closed);
        assert!(iter.next_element().unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_construction_opens_nothing() {
        let (storage, _temp) = create_test_storage();
        let ds = dataset(&storage, &["missing.txt"], Decoder::text_lines());
        let mut iter = ds.make_iterator();

        let err = iter.next_element().unwrap_err();
        assert!(matches!(err, StreamError::SourceNotFound { .. }));
        assert_eq!(iter.state(), IteratorState::Closed);
        assert!(iter.next_element().unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_sources_read_in_order() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("1.txt"), "a\nb\n").unwrap();
        std::fs::write(temp.path().join("2.txt"), "").unwrap();
        std::fs::write(temp.path().join("3.txt"), "c").unwrap();
        let ds = dataset(&storage, &["1.txt", "2.txt", "3.txt"], Decoder::text_lines());

        let lines: Vec<String> = ds
            .make_iterator()
            .map(|v| v.unwrap().as_text().unwrap().to_string())
            .collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reiteration_is_identical() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("l.bin"), label_file(&[3, 1, 4, 1, 5], 5)).unwrap();
        let ds = dataset(&storage, &["l.bin"], Decoder::FixedLabel);

        let first = drain(&mut ds.make_iterator()).unwrap();
        let second = drain(&mut ds.make_iterator()).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_label_count_shorter_than_header() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("l.bin"), label_file(&[1, 2], 3)).unwrap();
        let ds = dataset(&storage, &["l.bin"], Decoder::FixedLabel);

        let err = drain(&mut ds.make_iterator()).unwrap_err();
        assert!(matches!(
            err,
            StreamError::TruncatedRecord {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_bytes_after_declared_count_ignored() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("l.bin"), label_file(&[1, 2, 9, 9], 2)).unwrap();
        let ds = dataset(&storage, &["l.bin"], Decoder::FixedLabel);
        assert_eq!(
            drain(&mut ds.make_iterator()).unwrap(),
            vec![DecodedValue::Label(1), DecodedValue::Label(2)]
        );
    }

    #[test]
    fn test_huge_declared_count_without_data() {
        let (storage, temp) = create_test_storage();
        let data: Vec<u8> = [MNIST_IMAGE_MAGIC, u32::MAX, 0x2_0000, 0x2_0000]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        std::fs::write(temp.path().join("i.bin"), data).unwrap();

        let ds = dataset(&storage, &["i.bin"], Decoder::mnist_images());
        let err = drain(&mut ds.make_iterator()).unwrap_err();
        assert!(matches!(
            err,
            StreamError::TruncatedRecord {
                expected: usize::MAX,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_image_header_resolves_dims() {
        let (storage, temp) = create_test_storage();
        let mut data: Vec<u8> = [MNIST_IMAGE_MAGIC, 2, 2, 3]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        data.extend(0..12u8);
        std::fs::write(temp.path().join("i.bin"), data).unwrap();

        let ds = dataset(&storage, &["i.bin"], Decoder::mnist_images());
        let images = drain(&mut ds.make_iterator()).unwrap();
        assert_eq!(
            images[1],
            DecodedValue::Image {
                rows: 2,
                cols: 3,
                pixels: (6..12).collect()
            }
        );
        assert!(images.iter().all(|v| v.conforms_to(&ds.output_signature())));
    }

    #[test]
    fn test_declared_dims_mismatch() {
        let (storage, temp) = create_test_storage();
        let mut data: Vec<u8> = [MNIST_IMAGE_MAGIC, 1, 2, 2]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        data.extend([0u8; 4]);
        std::fs::write(temp.path().join("i.bin"), data).unwrap();

        let ds = dataset(
            &storage,
            &["i.bin"],
            Decoder::FixedImage {
                rows: Some(28),
                cols: Some(28),
            },
        );
        let err = ds.make_iterator().next_element().unwrap_err();
        assert!(matches!(err, StreamError::SignatureMismatch { .. }), "{err}");
    }

    #[test]
    fn test_malformed_record_surfaces() {
        let (storage, temp) = create_test_storage();
        std::fs::write(temp.path().join("bad.txt"), b"ok\n\xff\xfe\nlater\n").unwrap();
        let ds = dataset(&storage, &["bad.txt"], Decoder::text_lines());

        let mut iter = ds.make_iterator();
        assert!(iter.next_element().is_ok());
        assert!(matches!(
            iter.next_element(),
            Err(StreamError::MalformedRecord { .. })
        ));
        // Never skipped: the iterator is closed rather than moving on
        assert_eq!(iter.state(), IteratorState::Closed);
    }

    #[test]
    fn test_remote_cache_dataset() {
        let cache = InMemoryCache::new();
        for i in 0..4i64 {
            cache.insert("SQL_PUBLIC_T", i.to_be_bytes().to_vec(), format!("v{i}").into_bytes());
        }
        let config = RemoteCacheConfig {
            cache_name: "SQL_PUBLIC_T".to_string(),
            page_size: 3,
            ..Default::default()
        };
        let ds = Dataset::new(
            vec![SourceSpec::RemoteCache {
                service: Arc::new(cache.clone()),
                config,
            }],
            Compression::None,
            Decoder::RemoteKeyValue {
                key: ElementType::Int64,
                value: ElementType::Utf8,
            },
        )
        .unwrap();

        let values = drain(&mut ds.make_iterator()).unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[3].to_string(), "3\tv3");
        assert_eq!(cache.open_connections(), 0);
    }

    #[test]
    fn test_invalid_construction() {
        let (storage, _temp) = create_test_storage();
        assert!(Dataset::new(Vec::new(), Compression::None, Decoder::text_lines()).is_err());

        let kv = Decoder::RemoteKeyValue {
            key: ElementType::Bytes,
            value: ElementType::Bytes,
        };
        let local = vec![SourceSpec::storage(SourceAddress::local("x"), Arc::clone(&storage))];
        assert!(Dataset::new(local.clone(), Compression::None, kv).is_err());

        let zero = Decoder::Raw {
            framing: FramingPolicy::FixedSize { record_size: 0 },
        };
        assert!(Dataset::new(local, Compression::None, zero).is_err());
    }
}
