// recstream-core/src/storage/remote_fs.rs

//! Remote block filesystem backend (`igfs://`).
//!
//! Files live in a single remote cache as fixed-size blocks plus one
//! metadata entry per path:
//!
//! - `m:<path>` holds `[kind u8][length u64][block size u32][generation u32]`,
//!   big-endian, where kind is 0 for a file and 1 for a directory.
//! - `b:<path>@<generation u32>#<index u32>` holds block `index` of one
//!   generation of a file.
//!
//! Each rewrite of a file stores its blocks under the next generation and
//! only switches the metadata entry over once every block is in place.
//!
//! Paths are absolute and `/`-separated. Writing a file creates its parent
//! directories; the root directory always exists and has no entry.

use std::collections::BTreeSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path};
use std::sync::{Arc, Mutex};

use super::retry::{retry_blocking, RetryConfig};
use super::traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
use crate::config::RemoteCacheConfig;
use crate::error::{Result, StreamError};
use crate::remote::{CacheConnection, CacheService, Credentials, RemoteEndpoint};

/// URI scheme served by [`RemoteFs`].
pub const REMOTE_FS_SCHEME: &str = "igfs";

const KIND_FILE: u8 = 0;
const KIND_DIR: u8 = 1;
const META_LEN: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryMeta {
    is_dir: bool,
    length: u64,
    block_size: u32,
    generation: u32,
}

impl EntryMeta {
    fn file(length: u64, block_size: u32, generation: u32) -> Self {
        Self {
            is_dir: false,
            length,
            block_size,
            generation,
        }
    }

    fn dir() -> Self {
        Self {
            is_dir: true,
            length: 0,
            block_size: 0,
            generation: 0,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(META_LEN);
        out.push(if self.is_dir { KIND_DIR } else { KIND_FILE });
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.block_size.to_be_bytes());
        out.extend_from_slice(&self.generation.to_be_bytes());
        out
    }

    fn decode(path: &str, data: &[u8]) -> Result<Self> {
        if data.len() != META_LEN || data[0] > KIND_DIR {
            return Err(StreamError::storage(
                path,
                format!("invalid remote metadata entry ({} bytes)", data.len()),
            ));
        }
        let mut length = [0u8; 8];
        length.copy_from_slice(&data[1..9]);
        let mut block_size = [0u8; 4];
        block_size.copy_from_slice(&data[9..13]);
        let mut generation = [0u8; 4];
        generation.copy_from_slice(&data[13..17]);

        Ok(Self {
            is_dir: data[0] == KIND_DIR,
            length: u64::from_be_bytes(length),
            block_size: u32::from_be_bytes(block_size),
            generation: u32::from_be_bytes(generation),
        })
    }

    fn block_count(&self) -> u32 {
        if self.is_dir || self.length == 0 || self.block_size == 0 {
            return 0;
        }
        self.length.div_ceil(u64::from(self.block_size)) as u32
    }
}

/// Generation for the next content written over `previous`.
fn next_generation(previous: Option<EntryMeta>) -> u32 {
    previous.map_or(0, |meta| meta.generation.wrapping_add(1))
}

fn meta_key(path: &str) -> Vec<u8> {
    let mut key = b"m:".to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

fn block_key(path: &str, generation: u32, index: u32) -> Vec<u8> {
    let mut key = b"b:".to_vec();
    key.extend_from_slice(path.as_bytes());
    key.push(b'@');
    key.extend_from_slice(&generation.to_be_bytes());
    key.push(b'#');
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Normalizes to an absolute `/a/b` form. `..` never climbs above the root.
fn normalize(path: &Path) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                StreamError::config(format!("non UTF-8 remote path '{}'", path.display()))
            })?),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

fn is_root(path: &str) -> bool {
    path == "/"
}

fn parent_of(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn child_prefix(dir: &str) -> String {
    if is_root(dir) {
        "/".to_string()
    } else {
        format!("{dir}/")
    }
}

fn display_path(path: &str) -> String {
    format!("{REMOTE_FS_SCHEME}://{path}")
}

struct RemoteFsInner {
    service: Arc<dyn CacheService>,
    endpoint: RemoteEndpoint,
    credentials: Credentials,
    cache: String,
    block_size: u32,
    retry: RetryConfig,
    connection: Mutex<Option<Box<dyn CacheConnection>>>,
}

impl RemoteFsInner {
    /// Runs `op` on the shared connection, reconnecting once if it drops.
    fn with_connection<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut dyn CacheConnection, &str) -> Result<T>,
    {
        retry_blocking(&self.retry, |_| {
            let mut guard = self.connection.lock().map_err(|_| {
                StreamError::remote(self.endpoint.to_string(), "connection lock poisoned")
            })?;

            if guard.is_none() {
                *guard = Some(self.service.connect(&self.endpoint, &self.credentials)?);
            }
            let Some(connection) = guard.as_mut() else {
                return Err(StreamError::remote(
                    self.endpoint.to_string(),
                    "no connection available",
                ));
            };

            let result = op(connection.as_mut(), &self.cache);
            if matches!(&result, Err(e) if e.is_retryable()) {
                if let Some(mut dropped) = guard.take() {
                    dropped.close();
                }
            }
            result
        })
    }

    fn get_meta(&self, path: &str) -> Result<Option<EntryMeta>> {
        if is_root(path) {
            return Ok(Some(EntryMeta::dir()));
        }
        let key = meta_key(path);
        self.with_connection(|conn, cache| conn.get(cache, &key))?
            .map(|data| EntryMeta::decode(path, &data))
            .transpose()
    }

    fn require_meta(&self, path: &str) -> Result<EntryMeta> {
        self.get_meta(path)?
            .ok_or_else(|| StreamError::source_not_found(display_path(path)))
    }

    fn put_meta(&self, path: &str, meta: EntryMeta) -> Result<()> {
        let key = meta_key(path);
        let value = meta.encode();
        self.with_connection(|conn, cache| conn.put(cache, &key, &value))
    }

    fn remove_key(&self, key: &[u8]) -> Result<()> {
        self.with_connection(|conn, cache| conn.remove(cache, key).map(|_| ()))
    }

    fn get_block(&self, path: &str, generation: u32, index: u32) -> Result<Vec<u8>> {
        let key = block_key(path, generation, index);
        self.with_connection(|conn, cache| conn.get(cache, &key))?
            .ok_or_else(|| {
                StreamError::storage(display_path(path), format!("missing block {index}"))
            })
    }

    fn put_block(&self, path: &str, generation: u32, index: u32, data: &[u8]) -> Result<()> {
        let key = block_key(path, generation, index);
        self.with_connection(|conn, cache| conn.put(cache, &key, data))
    }

    fn remove_blocks(&self, path: &str, generation: u32, count: u32) -> Result<()> {
        for index in 0..count {
            self.remove_key(&block_key(path, generation, index))?;
        }
        Ok(())
    }

    /// Creates `path` and any missing ancestors as directories.
    fn ensure_dir(&self, path: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(path);

        while let Some(dir) = current {
            match self.get_meta(dir)? {
                Some(meta) if meta.is_dir => break,
                Some(_) => {
                    return Err(StreamError::storage(
                        display_path(dir),
                        "a file exists where a directory is required",
                    ))
                }
                None => missing.push(dir.to_string()),
            }
            current = parent_of(dir);
        }

        for dir in missing.iter().rev() {
            self.put_meta(dir, EntryMeta::dir())?;
        }
        Ok(())
    }

    /// All paths strictly below `dir`, in key order.
    fn descendants(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = meta_key(&child_prefix(dir));
        let keys = self.with_connection(|conn, cache| conn.keys_with_prefix(cache, &prefix))?;

        Ok(keys
            .into_iter()
            .filter_map(|key| String::from_utf8(key[2..].to_vec()).ok())
            .collect())
    }

    fn remove_entry(&self, path: &str, meta: EntryMeta) -> Result<()> {
        self.remove_blocks(path, meta.generation, meta.block_count())?;
        self.remove_key(&meta_key(path))
    }

    fn copy_file(&self, from: &str, to: &str, meta: EntryMeta) -> Result<()> {
        let previous = self.get_meta(to)?;
        if let Some(existing) = previous {
            if existing.is_dir {
                return Err(StreamError::storage(display_path(to), "destination is a directory"));
            }
        }

        let generation = next_generation(previous);
        for index in 0..meta.block_count() {
            let block = self.get_block(from, meta.generation, index)?;
            self.put_block(to, generation, index, &block)?;
        }
        self.put_meta(to, EntryMeta::file(meta.length, meta.block_size, generation))?;
        if let Some(existing) = previous {
            self.remove_blocks(to, existing.generation, existing.block_count())?;
        }
        Ok(())
    }
}

/// Filesystem-style backend over a remote cache.
///
/// Every remote call is retried on a fresh connection when the current one
/// drops, up to `max_reconnects` times.
#[derive(Clone)]
pub struct RemoteFs {
    inner: Arc<RemoteFsInner>,
}

impl RemoteFs {
    pub fn new(service: Arc<dyn CacheService>, config: &RemoteCacheConfig) -> Result<Self> {
        config.validate()?;
        let block_size = u32::try_from(config.block_size)
            .map_err(|_| StreamError::config("remote.block_size must fit in 32 bits"))?;

        Ok(Self {
            inner: Arc::new(RemoteFsInner {
                service,
                endpoint: RemoteEndpoint::from_config(config),
                credentials: Credentials::from_config(config),
                cache: config.fs_cache_name.clone(),
                block_size,
                retry: RetryConfig::from(config),
                connection: Mutex::new(None),
            }),
        })
    }

    /// Drops the shared connection. A later call reconnects.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.inner.connection.lock() {
            if let Some(mut connection) = guard.take() {
                connection.close();
            }
        }
    }
}

impl StorageBackend for RemoteFs {
    fn scheme(&self) -> &'static str {
        REMOTE_FS_SCHEME
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        let path = normalize(path)?;
        Ok(self.inner.get_meta(&path)?.is_some())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let path = normalize(path)?;
        let meta = self.inner.require_meta(&path)?;
        Ok(ObjectMeta {
            size: meta.length,
            modified: None,
            is_dir: meta.is_dir,
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let path = normalize(path)?;
        let meta = self.inner.require_meta(&path)?;
        if meta.is_dir {
            return Err(StreamError::storage(display_path(&path), "path is a directory"));
        }

        tracing::debug!(path = %display_path(&path), size = meta.length, "opened remote file");

        Ok(Box::new(RemoteBlockReader {
            inner: Arc::clone(&self.inner),
            path,
            meta,
            position: 0,
            block: None,
        }))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let path = normalize(path)?;
        if is_root(&path) {
            return Err(StreamError::storage(display_path(&path), "cannot write to the root"));
        }

        let previous = self.inner.get_meta(&path)?;
        if matches!(previous, Some(meta) if meta.is_dir) {
            return Err(StreamError::storage(display_path(&path), "path is a directory"));
        }
        if let Some(parent) = parent_of(&path) {
            self.inner.ensure_dir(parent)?;
        }

        Ok(Box::new(RemoteBlockWriter {
            inner: Arc::clone(&self.inner),
            path,
            generation: next_generation(previous),
            buffer: Vec::new(),
            next_block: 0,
            length: 0,
            previous,
            finished: false,
        }))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let path = normalize(path)?;
        let meta = self.inner.require_meta(&path)?;

        if meta.is_dir {
            if is_root(&path) {
                return Err(StreamError::storage(display_path(&path), "cannot delete the root"));
            }
            if !self.inner.descendants(&path)?.is_empty() {
                return Err(StreamError::storage(display_path(&path), "directory is not empty"));
            }
        }
        self.inner.remove_entry(&path, meta)
    }

    fn delete_recursively(&self, path: &Path) -> Result<()> {
        let path = normalize(path)?;
        let meta = self.inner.require_meta(&path)?;

        if meta.is_dir {
            // Deepest entries first so a partial failure never orphans children.
            for child in self.inner.descendants(&path)?.iter().rev() {
                if let Some(child_meta) = self.inner.get_meta(child)? {
                    self.inner.remove_entry(child, child_meta)?;
                }
            }
            if is_root(&path) {
                return Ok(());
            }
        }
        self.inner.remove_entry(&path, meta)
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        let meta = self.inner.require_meta(&from)?;
        if meta.is_dir {
            return Err(StreamError::storage(display_path(&from), "cannot copy a directory"));
        }
        if let Some(parent) = parent_of(&to) {
            self.inner.ensure_dir(parent)?;
        }
        self.inner.copy_file(&from, &to, meta)
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let dir = normalize(prefix)?;
        match self.inner.get_meta(&dir)? {
            None => return Ok(Vec::new()),
            Some(meta) if !meta.is_dir => {
                return Err(StreamError::storage(display_path(&dir), "path is not a directory"))
            }
            Some(_) => {}
        }

        let child_start = child_prefix(&dir).len();
        let names: BTreeSet<String> = self
            .inner
            .descendants(&dir)?
            .iter()
            .filter_map(|path| path[child_start..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(names.into_iter().collect())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        if from == to {
            return Ok(());
        }
        if is_root(&from) || to.starts_with(&child_prefix(&from)) {
            return Err(StreamError::storage(
                display_path(&from),
                format!("cannot move into {}", display_path(&to)),
            ));
        }

        let meta = self.inner.require_meta(&from)?;
        if let Some(parent) = parent_of(&to) {
            self.inner.ensure_dir(parent)?;
        }

        if !meta.is_dir {
            self.inner.copy_file(&from, &to, meta)?;
            return self.inner.remove_entry(&from, meta);
        }

        if self.inner.get_meta(&to)?.is_some() {
            return Err(StreamError::storage(display_path(&to), "destination already exists"));
        }
        self.inner.put_meta(&to, EntryMeta::dir())?;

        let descendants = self.inner.descendants(&from)?;
        for child in &descendants {
            let target = format!("{to}{}", &child[from.len()..]);
            if let Some(child_meta) = self.inner.get_meta(child)? {
                if child_meta.is_dir {
                    self.inner.put_meta(&target, child_meta)?;
                } else {
                    self.inner.copy_file(child, &target, child_meta)?;
                }
            }
        }
        for child in descendants.iter().rev() {
            if let Some(child_meta) = self.inner.get_meta(child)? {
                self.inner.remove_entry(child, child_meta)?;
            }
        }
        self.inner.remove_entry(&from, meta)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = normalize(path)?;
        self.inner.ensure_dir(&path)
    }
}

fn to_io(e: StreamError) -> io::Error {
    let kind = if e.is_retryable() {
        io::ErrorKind::ConnectionAborted
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, e)
}

/// Reads a remote file block by block, fetching each block on demand.
struct RemoteBlockReader {
    inner: Arc<RemoteFsInner>,
    path: String,
    meta: EntryMeta,
    position: u64,
    block: Option<(u32, Vec<u8>)>,
}

impl RemoteBlockReader {
    fn load_block(&mut self, index: u32) -> Result<&[u8]> {
        let cached = matches!(&self.block, Some((i, _)) if *i == index);
        if !cached {
            let data = self.inner.get_block(&self.path, self.meta.generation, index)?;
            self.block = Some((index, data));
        }
        Ok(self.block.as_ref().map_or(&[][..], |(_, data)| data.as_slice()))
    }
}

impl Read for RemoteBlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.meta.length || self.meta.block_size == 0 {
            return Ok(0);
        }

        let block_size = u64::from(self.meta.block_size);
        let index = (self.position / block_size) as u32;
        let offset = (self.position % block_size) as usize;
        let remaining_in_file = (self.meta.length - self.position) as usize;

        let block = self.load_block(index).map_err(to_io)?;
        if offset >= block.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {index} is shorter than its metadata declares"),
            ));
        }

        let available = (block.len() - offset).min(remaining_in_file);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&block[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RemoteBlockReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.meta.length as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageReader for RemoteBlockReader {
    fn size(&self) -> u64 {
        self.meta.length
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        if start + length as u64 > self.meta.length {
            return Err(StreamError::storage(
                display_path(&self.path),
                format!(
                    "read range {}..{} exceeds file size {}",
                    start,
                    start + length as u64,
                    self.meta.length
                ),
            ));
        }

        self.position = start;
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf).map_err(|e| {
            StreamError::storage_with_source(
                display_path(&self.path),
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;
        Ok(buf)
    }
}

/// Buffers writes into full blocks of a new generation. Metadata is
/// switched over by `finish`, so readers and an unfinished writer never
/// disturb the previous content.
struct RemoteBlockWriter {
    inner: Arc<RemoteFsInner>,
    path: String,
    generation: u32,
    buffer: Vec<u8>,
    next_block: u32,
    length: u64,
    previous: Option<EntryMeta>,
    finished: bool,
}

impl RemoteBlockWriter {
    fn flush_full_blocks(&mut self) -> Result<()> {
        let block_size = self.inner.block_size as usize;
        while self.buffer.len() >= block_size {
            let rest = self.buffer.split_off(block_size);
            let block = std::mem::replace(&mut self.buffer, rest);
            self.inner
                .put_block(&self.path, self.generation, self.next_block, &block)?;
            self.next_block += 1;
        }
        Ok(())
    }
}

impl Write for RemoteBlockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.length += buf.len() as u64;
        self.flush_full_blocks().map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageWriter for RemoteBlockWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.flush_full_blocks()?;
        if !self.buffer.is_empty() {
            let block = std::mem::take(&mut self.buffer);
            self.inner
                .put_block(&self.path, self.generation, self.next_block, &block)?;
            self.next_block += 1;
        }

        let meta = EntryMeta::file(self.length, self.inner.block_size, self.generation);
        self.inner.put_meta(&self.path, meta)?;
        self.finished = true;
        if let Some(previous) = self.previous {
            self.inner
                .remove_blocks(&self.path, previous.generation, previous.block_count())?;
        }

        tracing::debug!(
            path = %display_path(&self.path),
            bytes = self.length,
            blocks = self.next_block,
            "finished remote file"
        );
        Ok(())
    }
}

impl Drop for RemoteBlockWriter {
    fn drop(&mut self) {
        if self.finished || self.next_block == 0 {
            return;
        }
        if let Err(e) = self
            .inner
            .remove_blocks(&self.path, self.generation, self.next_block)
        {
            tracing::warn!(
                path = %display_path(&self.path),
                error = %e,
                "failed to discard blocks of an unfinished remote file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryCache;

    fn create_test_fs(block_size: usize) -> (RemoteFs, InMemoryCache) {
        let cache = InMemoryCache::new();
        let config = RemoteCacheConfig {
            block_size,
            reconnect_delay_ms: 1,
            ..Default::default()
        };
        let fs = RemoteFs::new(Arc::new(cache.clone()), &config).unwrap();
        (fs, cache)
    }

    fn write_file(fs: &RemoteFs, path: &str, data: &[u8]) {
        let mut writer = fs.open_write(Path::new(path)).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
    }

    fn read_file(fs: &RemoteFs, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        fs.open_read(Path::new(path))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/")).unwrap(), "/a/b");
        assert_eq!(normalize(Path::new("a/./b/../c")).unwrap(), "/a/c");
        assert_eq!(normalize(Path::new("/")).unwrap(), "/");
        assert_eq!(normalize(Path::new("/../x")).unwrap(), "/x");
    }

    #[test]
    fn test_write_read_across_blocks() {
        let (fs, _cache) = create_test_fs(4);
        let data: Vec<u8> = (0..23).collect();
        write_file(&fs, "/test_copy/1", &data);

        assert_eq!(read_file(&fs, "/test_copy/1"), data);

        let mut reader = fs.open_read(Path::new("/test_copy/1")).unwrap();
        assert_eq!(reader.size(), 23);
        assert_eq!(reader.read_range(6, 5).unwrap(), &data[6..11]);
        assert!(reader.read_range(20, 5).is_err());
    }

    #[test]
    fn test_overwrite_removes_stale_blocks() {
        let (fs, cache) = create_test_fs(4);
        write_file(&fs, "/f", &[1u8; 16]);
        write_file(&fs, "/f", &[2u8; 5]);

        assert_eq!(read_file(&fs, "/f"), vec![2u8; 5]);
        let blocks = cache
            .entries("igfs")
            .iter()
            .filter(|e| e.key.starts_with(b"b:/f@"))
            .count();
        assert_eq!(blocks, 2);
    }

    #[test]
    fn test_unfinished_write_keeps_previous_content() {
        let (fs, cache) = create_test_fs(4);
        write_file(&fs, "/f", b"AAAAAAAA");

        let mut writer = fs.open_write(Path::new("/f")).unwrap();
        writer.write_all(b"BBBBB").unwrap();
        assert_eq!(read_file(&fs, "/f"), b"AAAAAAAA");
        drop(writer);

        assert_eq!(read_file(&fs, "/f"), b"AAAAAAAA");
        assert_eq!(fs.metadata(Path::new("/f")).unwrap().size, 8);
        let blocks = cache
            .entries("igfs")
            .iter()
            .filter(|e| e.key.starts_with(b"b:/f@"))
            .count();
        assert_eq!(blocks, 2);

        write_file(&fs, "/f", b"CCCCC");
        assert_eq!(read_file(&fs, "/f"), b"CCCCC");
    }

    #[test]
    fn test_parents_created_implicitly() {
        let (fs, _cache) = create_test_fs(8);
        write_file(&fs, "/a/b/c.txt", b"x");

        assert!(fs.is_dir(Path::new("/a")).unwrap());
        assert!(fs.is_dir(Path::new("/a/b")).unwrap());
        assert!(!fs.is_dir(Path::new("/a/b/c.txt")).unwrap());
        assert_eq!(fs.metadata(Path::new("/a/b/c.txt")).unwrap().size, 1);
    }

    #[test]
    fn test_missing_file() {
        let (fs, _cache) = create_test_fs(8);
        assert!(!fs.exists(Path::new("/nope")).unwrap());
        let err = fs.open_read(Path::new("/nope")).err().unwrap();
        assert!(matches!(err, StreamError::SourceNotFound { .. }));
    }

    #[test]
    fn test_list_directory() {
        let (fs, _cache) = create_test_fs(8);
        write_file(&fs, "/test_list/2", b"");
        write_file(&fs, "/test_list/1", b"");
        write_file(&fs, "/test_list/sub/deep", b"");
        write_file(&fs, "/test_listing", b"");

        assert_eq!(
            fs.list(Path::new("/test_list")).unwrap(),
            vec!["1", "2", "sub"]
        );
        assert_eq!(
            fs.list(Path::new("/")).unwrap(),
            vec!["test_list", "test_listing"]
        );
        assert!(fs.list(Path::new("/missing")).unwrap().is_empty());
        assert!(fs.list(Path::new("/test_listing")).is_err());
    }

    #[test]
    fn test_delete_and_delete_recursively() {
        let (fs, cache) = create_test_fs(2);
        write_file(&fs, "/d/x", b"hello");
        write_file(&fs, "/d/e/y", b"world");

        assert!(fs.delete(Path::new("/d")).is_err());
        fs.delete(Path::new("/d/x")).unwrap();
        assert!(!fs.exists(Path::new("/d/x")).unwrap());

        fs.delete_recursively(Path::new("/d")).unwrap();
        assert!(!fs.exists(Path::new("/d")).unwrap());
        assert!(cache.entries("igfs").is_empty());
    }

    #[test]
    fn test_copy_file() {
        let (fs, _cache) = create_test_fs(3);
        write_file(&fs, "/src", b"0123456789");
        fs.copy(Path::new("/src"), Path::new("/dst/copy")).unwrap();

        assert_eq!(read_file(&fs, "/dst/copy"), b"0123456789");
        assert_eq!(read_file(&fs, "/src"), b"0123456789");
    }

    #[test]
    fn test_rename_file_and_directory() {
        let (fs, _cache) = create_test_fs(3);
        write_file(&fs, "/old/a", b"aaaa");
        write_file(&fs, "/old/sub/b", b"bb");

        fs.rename(Path::new("/old/a"), Path::new("/old/a2")).unwrap();
        assert!(!fs.exists(Path::new("/old/a")).unwrap());
        assert_eq!(read_file(&fs, "/old/a2"), b"aaaa");

        fs.rename(Path::new("/old"), Path::new("/new")).unwrap();
        assert!(!fs.exists(Path::new("/old")).unwrap());
        assert_eq!(read_file(&fs, "/new/a2"), b"aaaa");
        assert_eq!(read_file(&fs, "/new/sub/b"), b"bb");

        assert!(fs.rename(Path::new("/new"), Path::new("/new/inner")).is_err());
    }

    #[test]
    fn test_make_dirs() {
        let (fs, _cache) = create_test_fs(8);
        fs.create_dir_all(Path::new("/x/y/z")).unwrap();
        assert!(fs.is_dir(Path::new("/x/y/z")).unwrap());
        assert_eq!(fs.list(Path::new("/x")).unwrap(), vec!["y"]);

        write_file(&fs, "/file", b"");
        assert!(fs.create_dir_all(Path::new("/file/sub")).is_err());
    }

    #[test]
    fn test_reconnects_after_drop() {
        let (fs, cache) = create_test_fs(8);
        write_file(&fs, "/f", b"data");

        cache.drop_next_requests(1);
        assert_eq!(read_file(&fs, "/f"), b"data");
        assert_eq!(cache.open_connections(), 1);

        fs.disconnect();
        assert_eq!(cache.open_connections(), 0);
    }
}
