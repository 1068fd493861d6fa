// recstream-core/src/registry.rs

//! Process-wide registry of decoder kinds and storage schemes.
//!
//! The built-in entries are installed exactly once, on first use or by an
//! explicit [`initialize`]. Further entries can be added at any time; an
//! entry is never replaced or removed once registered.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::config::StreamConfig;
use crate::dataset::{Decoder, FramingPolicy};
use crate::error::{Result, StreamError};
use crate::remote::CacheService;
use crate::signature::ElementType;
use crate::storage::{LocalStorage, RemoteFs, StorageBackend, REMOTE_FS_SCHEME};

/// Construction options passed to a decoder factory.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// Fixed record size for `raw`.
    pub record_size: Option<usize>,
    /// Record delimiter for `text` and `raw`.
    pub delimiter: Option<u8>,
    /// Declared image rows; read from the header when unset.
    pub rows: Option<usize>,
    /// Declared image columns; read from the header when unset.
    pub cols: Option<usize>,
    pub key_type: Option<ElementType>,
    pub value_type: Option<ElementType>,
}

/// Everything a backend factory may draw on.
pub struct BackendContext<'a> {
    pub config: &'a StreamConfig,
    pub cache_service: Option<&'a Arc<dyn CacheService>>,
}

pub type DecoderFactory = fn(&DecoderOptions) -> Result<Decoder>;

/// Builds a backend, or returns `Ok(None)` when the context lacks what the
/// scheme needs (e.g. no remote cache service was supplied).
pub type BackendFactory = fn(&BackendContext<'_>) -> Result<Option<Arc<dyn StorageBackend>>>;

struct Registry {
    decoders: RwLock<HashMap<String, DecoderFactory>>,
    backends: RwLock<HashMap<String, BackendFactory>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let decoders: [(&str, DecoderFactory); 5] = [
            ("mnist-image", mnist_image),
            ("mnist-label", mnist_label),
            ("text", text),
            ("kv", key_value),
            ("raw", raw),
        ];
        let backends: [(&str, BackendFactory); 2] =
            [("file", local_backend), (REMOTE_FS_SCHEME, remote_fs_backend)];

        tracing::debug!("registering built-in decoders and storage schemes");
        Registry {
            decoders: RwLock::new(
                decoders
                    .into_iter()
                    .map(|(name, factory)| (name.to_string(), factory))
                    .collect(),
            ),
            backends: RwLock::new(
                backends
                    .into_iter()
                    .map(|(scheme, factory)| (scheme.to_string(), factory))
                    .collect(),
            ),
        }
    })
}

/// Installs the built-in entries. Safe to call any number of times.
pub fn initialize() {
    registry();
}

/// Registers a decoder kind. Returns false, leaving the existing entry in
/// place, if `name` is already taken.
pub fn register_decoder(name: &str, factory: DecoderFactory) -> bool {
    let Ok(mut decoders) = registry().decoders.write() else {
        return false;
    };
    if decoders.contains_key(name) {
        return false;
    }
    decoders.insert(name.to_string(), factory);
    true
}

/// Registers a storage scheme. Returns false, leaving the existing entry in
/// place, if `scheme` is already taken.
pub fn register_backend(scheme: &str, factory: BackendFactory) -> bool {
    let Ok(mut backends) = registry().backends.write() else {
        return false;
    };
    if backends.contains_key(scheme) {
        return false;
    }
    backends.insert(scheme.to_string(), factory);
    true
}

/// Sorted names of every registered decoder kind.
pub fn decoder_kinds() -> Vec<String> {
    let mut kinds: Vec<String> = registry()
        .decoders
        .read()
        .map(|d| d.keys().cloned().collect())
        .unwrap_or_default();
    kinds.sort();
    kinds
}

/// Sorted names of every registered storage scheme.
pub fn backend_schemes() -> Vec<String> {
    let mut schemes: Vec<String> = registry()
        .backends
        .read()
        .map(|b| b.keys().cloned().collect())
        .unwrap_or_default();
    schemes.sort();
    schemes
}

/// Builds the decoder registered as `kind`.
///
/// # Errors
///
/// Returns a config error for an unknown kind, or whatever the factory
/// rejects in `options`.
pub fn create_decoder(kind: &str, options: &DecoderOptions) -> Result<Decoder> {
    let factory = registry()
        .decoders
        .read()
        .map_err(|_| StreamError::config("decoder registry poisoned"))?
        .get(kind)
        .copied();
    match factory {
        Some(factory) => factory(options),
        None => Err(StreamError::config(format!(
            "unknown decoder kind '{kind}' (known: {})",
            decoder_kinds().join(", ")
        ))),
    }
}

/// Builds the backend registered for `scheme`.
///
/// # Errors
///
/// Returns a config error for an unknown scheme, or the factory's error.
pub fn create_backend(
    scheme: &str,
    context: &BackendContext<'_>,
) -> Result<Option<Arc<dyn StorageBackend>>> {
    let factory = registry()
        .backends
        .read()
        .map_err(|_| StreamError::config("backend registry poisoned"))?
        .get(scheme)
        .copied()
        .ok_or_else(|| StreamError::config(format!("unknown storage scheme '{scheme}'")))?;
    factory(context)
}

fn mnist_image(options: &DecoderOptions) -> Result<Decoder> {
    Ok(Decoder::FixedImage {
        rows: options.rows,
        cols: options.cols,
    })
}

fn mnist_label(_: &DecoderOptions) -> Result<Decoder> {
    Ok(Decoder::FixedLabel)
}

fn text(options: &DecoderOptions) -> Result<Decoder> {
    Ok(Decoder::TextLine {
        delimiter: options.delimiter.unwrap_or(b'\n'),
    })
}

fn key_value(options: &DecoderOptions) -> Result<Decoder> {
    Ok(Decoder::RemoteKeyValue {
        key: options.key_type.clone().unwrap_or(ElementType::Bytes),
        value: options.value_type.clone().unwrap_or(ElementType::Bytes),
    })
}

fn raw(options: &DecoderOptions) -> Result<Decoder> {
    let framing = match (options.record_size, options.delimiter) {
        (Some(_), Some(_)) => {
            return Err(StreamError::config(
                "raw decoder takes a record size or a delimiter, not both",
            ))
        }
        (Some(record_size), None) => FramingPolicy::FixedSize { record_size },
        (None, Some(delimiter)) => FramingPolicy::Delimited { delimiter },
        (None, None) => FramingPolicy::LengthPrefixed,
    };
    framing.format()?;
    Ok(Decoder::Raw { framing })
}

fn local_backend(context: &BackendContext<'_>) -> Result<Option<Arc<dyn StorageBackend>>> {
    Ok(Some(Arc::new(LocalStorage::new(&context.config.storage)?)))
}

fn remote_fs_backend(context: &BackendContext<'_>) -> Result<Option<Arc<dyn StorageBackend>>> {
    let Some(service) = context.cache_service else {
        return Ok(None);
    };
    let fs = RemoteFs::new(Arc::clone(service), &context.config.remote)?;
    Ok(Some(Arc::new(fs)))
}
