// recstream-core/src/runtime.rs

//! Main entry point for building datasets.
//!
//! [`StreamRuntime`] owns the configuration (environment overrides are
//! applied once, when it is constructed), the storage backends for every
//! registered scheme, and the optional remote cache service. Datasets built
//! through it pick up the configured chunk and buffer sizes.
//!
//! # Example
//!
//! ```no_run
//! use recstream_core::dataset::Pipeline;
//! use recstream_core::StreamRuntime;
//!
//! let runtime = StreamRuntime::new().unwrap();
//!
//! // Pair MNIST images with their labels
//! let mnist = runtime
//!     .mnist(&["train-images-idx3-ubyte.gz"], &["train-labels-idx1-ubyte.gz"], None)
//!     .unwrap();
//! for pair in mnist.make_iterator() {
//!     let pair = pair.unwrap();
//!     println!("{} -> {}", pair[0], pair[1]);
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::config::{RemoteCacheConfig, StreamConfig};
use crate::dataset::{Dataset, Decoder, InterleavedDataset, SourceSpec, ZippedDataset};
use crate::error::{Result, StreamError};
use crate::registry::{self, BackendContext, DecoderOptions};
use crate::remote::CacheService;
use crate::signature::ElementType;
use crate::sink::TextOutputSequence;
use crate::source::{Compression, SourceAddress};
use crate::storage::StorageResolver;

/// Builds datasets and sinks against configured storage.
pub struct StreamRuntime {
    config: StreamConfig,
    resolver: StorageResolver,
    cache_service: Option<Arc<dyn CacheService>>,
}

impl StreamRuntime {
    /// Creates a runtime from defaults plus `RECSTREAM_*` environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid or the
    /// local storage root can't be created.
    pub fn new() -> Result<Self> {
        Self::from_config(StreamConfig::default().with_env_overrides())
    }

    /// Creates a runtime from a TOML configuration file. Environment
    /// variable overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = StreamConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a runtime from a configuration. The environment is not
    /// consulted.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        registry::initialize();

        let resolver = build_resolver(&config, None)?;
        tracing::info!(
            base_path = %config.storage.base_path.display(),
            schemes = ?resolver.schemes(),
            "stream runtime ready"
        );

        Ok(Self {
            config,
            resolver,
            cache_service: None,
        })
    }

    /// Attaches a remote cache service, enabling remote cache datasets and
    /// the remote filesystem scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend that needs the service can't be built.
    pub fn with_cache_service(mut self, service: Arc<dyn CacheService>) -> Result<Self> {
        self.resolver = build_resolver(&self.config, Some(&service))?;
        self.cache_service = Some(service);
        tracing::info!(
            remote = %self.config.remote.address(),
            schemes = ?self.resolver.schemes(),
            "remote cache service attached"
        );
        Ok(self)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Backends for every available scheme.
    pub fn storage(&self) -> &StorageResolver {
        &self.resolver
    }

    pub fn cache_service(&self) -> Option<&Arc<dyn CacheService>> {
        self.cache_service.as_ref()
    }

    /// Resolves a path or URI to a storage source.
    ///
    /// # Errors
    ///
    /// Returns a config error for a malformed address or an unregistered
    /// scheme.
    pub fn source(&self, raw: &str) -> Result<SourceSpec> {
        let address = SourceAddress::parse(raw)?;
        let backend = self.resolver.resolve(&address)?;
        Ok(SourceSpec::storage(address, backend))
    }

    fn sources<S: AsRef<str>>(&self, raw: &[S]) -> Result<Vec<SourceSpec>> {
        raw.iter().map(|s| self.source(s.as_ref())).collect()
    }

    fn compression_or_default(&self, compression: Option<Compression>) -> Result<Compression> {
        match compression {
            Some(compression) => Ok(compression),
            None => self.config.compression(),
        }
    }

    fn build(
        &self,
        sources: Vec<SourceSpec>,
        compression: Compression,
        decoder: Decoder,
    ) -> Result<Dataset> {
        let dataset = Dataset::new(sources, compression, decoder)?
            .with_read_chunk_size(self.config.source.read_chunk_size)
            .with_buffer_size(self.config.storage.buffer_size);

        tracing::info!(
            decoder = dataset.decoder().name(),
            sources = dataset.sources().len(),
            compression = %compression,
            signature = %dataset.output_signature(),
            "dataset created"
        );
        Ok(dataset)
    }

    /// Builds a dataset of the registered decoder `kind`.
    ///
    /// For decoders that read a remote cache, each entry of `sources` names
    /// a cache; with no sources the configured `remote.cache_name` is used.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind, an unresolvable source, or an
    /// invalid combination of decoder, source and compression.
    pub fn dataset<S: AsRef<str>>(
        &self,
        kind: &str,
        options: &DecoderOptions,
        sources: &[S],
        compression: Option<Compression>,
    ) -> Result<Dataset> {
        let decoder = registry::create_decoder(kind, options)?;
        let compression = if decoder.reads_remote_cache() {
            compression.unwrap_or(Compression::None)
        } else {
            self.compression_or_default(compression)?
        };

        let specs = if decoder.reads_remote_cache() {
            let service = self.require_cache_service()?;
            let names: Vec<String> = if sources.is_empty() {
                vec![self.config.remote.cache_name.clone()]
            } else {
                sources.iter().map(|s| s.as_ref().to_string()).collect()
            };
            names
                .into_iter()
                .map(|cache_name| SourceSpec::RemoteCache {
                    service: Arc::clone(service),
                    config: self.remote_config(cache_name),
                })
                .collect()
        } else {
            self.sources(sources)?
        };

        self.build(specs, compression, decoder)
    }

    /// UTF-8 lines from one or more text sources.
    pub fn text_lines<S: AsRef<str>>(
        &self,
        sources: &[S],
        compression: Option<Compression>,
    ) -> Result<Dataset> {
        let compression = self.compression_or_default(compression)?;
        self.build(self.sources(sources)?, compression, Decoder::text_lines())
    }

    /// MNIST image files; dimensions are read from each file's header.
    pub fn mnist_images<S: AsRef<str>>(
        &self,
        sources: &[S],
        compression: Option<Compression>,
    ) -> Result<Dataset> {
        let compression = self.compression_or_default(compression)?;
        self.build(self.sources(sources)?, compression, Decoder::mnist_images())
    }

    /// MNIST label files.
    pub fn mnist_labels<S: AsRef<str>>(
        &self,
        sources: &[S],
        compression: Option<Compression>,
    ) -> Result<Dataset> {
        let compression = self.compression_or_default(compression)?;
        self.build(self.sources(sources)?, compression, Decoder::FixedLabel)
    }

    /// MNIST images zipped with their labels. The two sides must hold the
    /// same number of records.
    pub fn mnist<S: AsRef<str>>(
        &self,
        images: &[S],
        labels: &[S],
        compression: Option<Compression>,
    ) -> Result<ZippedDataset<Dataset>> {
        let images = self.mnist_images(images, compression)?;
        let labels = self.mnist_labels(labels, compression)?;
        Ok(images.zip(labels))
    }

    /// Every entry of a remote cache as a key/value pair.
    ///
    /// # Errors
    ///
    /// Returns a config error if no cache service is attached or no cache
    /// name is given or configured.
    pub fn remote_cache(
        &self,
        cache_name: Option<&str>,
        key: ElementType,
        value: ElementType,
    ) -> Result<Dataset> {
        let service = self.require_cache_service()?;
        let cache_name = cache_name
            .map(str::to_string)
            .unwrap_or_else(|| self.config.remote.cache_name.clone());

        let source = SourceSpec::RemoteCache {
            service: Arc::clone(service),
            config: self.remote_config(cache_name),
        };
        self.build(vec![source], Compression::None, Decoder::RemoteKeyValue { key, value })
    }

    /// Interleaves `inputs` using the configured cycle length, block length
    /// and parallelism.
    pub fn interleave(&self, inputs: Vec<Dataset>) -> Result<InterleavedDataset<Dataset>> {
        InterleavedDataset::new(inputs, &self.config.interleave)
    }

    /// Opens a positional text sink at `destination` (path or URI).
    pub fn text_output(
        &self,
        destination: &str,
        compression: Option<Compression>,
    ) -> Result<TextOutputSequence> {
        let address = SourceAddress::parse(destination)?;
        let backend = self.resolver.resolve(&address)?;
        let compression = self.compression_or_default(compression)?;
        TextOutputSequence::open(backend, address.path(), compression)
    }

    fn require_cache_service(&self) -> Result<&Arc<dyn CacheService>> {
        self.cache_service
            .as_ref()
            .ok_or_else(|| StreamError::config("no remote cache service attached to the runtime"))
    }

    fn remote_config(&self, cache_name: String) -> RemoteCacheConfig {
        RemoteCacheConfig {
            cache_name,
            ..self.config.remote.clone()
        }
    }
}

impl std::fmt::Debug for StreamRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRuntime")
            .field("config", &self.config)
            .field("schemes", &self.resolver.schemes())
            .field("cache_service", &self.cache_service.is_some())
            .finish()
    }
}

fn build_resolver(
    config: &StreamConfig,
    cache_service: Option<&Arc<dyn CacheService>>,
) -> Result<StorageResolver> {
    let context = BackendContext {
        config,
        cache_service,
    };

    let mut resolver = StorageResolver::new();
    for scheme in registry::backend_schemes() {
        match registry::create_backend(&scheme, &context)? {
            Some(backend) => resolver.register_as(scheme, backend),
            None => tracing::debug!(scheme = %scheme, "storage scheme unavailable"),
        }
    }
    Ok(resolver)
}
