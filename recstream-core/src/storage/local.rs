// recstream-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Small files are read through a buffered reader; files at or above the
//! configured threshold are memory-mapped.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{ObjectMeta, StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageConfig;
use crate::error::{Result, StreamError};

/// Local filesystem storage backend.
///
/// Relative paths are resolved against the configured base path; absolute
/// paths are used as-is.
pub struct LocalStorage {
    base_path: PathBuf,
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` instance from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StreamError::storage_with_source(&base_path, "failed to create base directory", e)
            })?;
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    StreamError::storage_with_source(
                        parent,
                        "failed to create parent directories",
                        e,
                    )
                })?;
            }
        }
        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve_path(path).exists())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let full_path = self.resolve_path(path);
        let meta = fs::metadata(&full_path).map_err(|e| {
            StreamError::storage_with_source(&full_path, "failed to read metadata", e)
        })?;

        Ok(ObjectMeta {
            size: meta.len(),
            modified: meta.modified().ok(),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| StreamError::storage_with_source(&full_path, "failed to open file", e))?;

        let meta = file.metadata().map_err(|e| {
            StreamError::storage_with_source(&full_path, "failed to read file metadata", e)
        })?;
        if meta.is_dir() {
            return Err(StreamError::storage(&full_path, "path is a directory"));
        }
        let size = meta.len();

        if self.use_mmap && size > 0 && size >= self.mmap_threshold {
            // SAFETY: The file is opened read-only and the map lives as long
            // as the reader that owns it.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;

            Ok(Box::new(MmapReader::new(full_path, mmap)))
        } else {
            Ok(Box::new(LocalReader::new(full_path, file, size, self.buffer_size)))
        }
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to create file", e)
            })?;

        Ok(Box::new(LocalWriter::new(full_path, file, self.buffer_size)))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        if full_path.is_dir() {
            fs::remove_dir(&full_path).map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to delete directory", e)
            })
        } else {
            fs::remove_file(&full_path).map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to delete file", e)
            })
        }
    }

    fn delete_recursively(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to delete directory tree", e)
            })
        } else {
            fs::remove_file(&full_path).map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to delete file", e)
            })
        }
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.resolve_path(from);
        let to_path = self.resolve_path(to);
        Self::ensure_parent(&to_path)?;

        fs::copy(&from_path, &to_path).map(|_| ()).map_err(|e| {
            StreamError::storage_with_source(
                &from_path,
                format!("failed to copy to {}", to_path.display()),
                e,
            )
        })
    }

    fn list(&self, prefix: &Path) -> Result<Vec<String>> {
        let full_path = self.resolve_path(prefix);

        if !full_path.exists() {
            return Ok(Vec::new());
        }

        if !full_path.is_dir() {
            return Err(StreamError::storage(&full_path, "path is not a directory"));
        }

        let mut entries = Vec::new();

        for entry in fs::read_dir(&full_path).map_err(|e| {
            StreamError::storage_with_source(&full_path, "failed to read directory", e)
        })? {
            let entry = entry.map_err(|e| {
                StreamError::storage_with_source(&full_path, "failed to read directory entry", e)
            })?;

            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.resolve_path(from);
        let to_path = self.resolve_path(to);
        Self::ensure_parent(&to_path)?;

        fs::rename(&from_path, &to_path).map_err(|e| {
            StreamError::storage_with_source(
                &from_path,
                format!("failed to rename to {}", to_path.display()),
                e,
            )
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).map_err(|e| {
            StreamError::storage_with_source(&full_path, "failed to create directories", e)
        })
    }
}

/// Buffered file reader.
struct LocalReader {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
}

impl LocalReader {
    fn new(path: PathBuf, file: File, size: u64, buffer_size: usize) -> Self {
        Self {
            path,
            reader: BufReader::with_capacity(buffer_size.max(1), file),
            size,
        }
    }
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for LocalReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(start)).map_err(|e| {
            StreamError::storage_with_source(
                &self.path,
                format!("failed to seek to position {start}"),
                e,
            )
        })?;

        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf).map_err(|e| {
            StreamError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;

        Ok(buf)
    }
}

/// Memory-mapped file reader.
struct MmapReader {
    path: PathBuf,
    mmap: Mmap,
    position: u64,
}

impl MmapReader {
    fn new(path: PathBuf, mmap: Mmap) -> Self {
        Self {
            path,
            mmap,
            position: 0,
        }
    }
}

impl Read for MmapReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let pos = (self.position as usize).min(self.mmap.len());
        let remaining = &self.mmap[pos..];
        let to_read = buf.len().min(remaining.len());

        buf[..to_read].copy_from_slice(&remaining[..to_read]);
        self.position += to_read as u64;
        Ok(to_read)
    }
}

impl Seek for MmapReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.mmap.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };

        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let start = start as usize;
        let end = start + length;

        if end > self.mmap.len() {
            return Err(StreamError::storage(
                &self.path,
                format!(
                    "read range {}..{} exceeds file size {}",
                    start,
                    end,
                    self.mmap.len()
                ),
            ));
        }

        Ok(self.mmap[start..end].to_vec())
    }
}

/// Buffered file writer.
struct LocalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LocalWriter {
    fn new(path: PathBuf, file: File, buffer_size: usize) -> Self {
        Self {
            path,
            writer: BufWriter::with_capacity(buffer_size.max(1), file),
        }
    }
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.flush().map_err(|e| {
            StreamError::storage_with_source(&self.path, "failed to flush writer", e)
        })?;

        self.writer.get_ref().sync_all().map_err(|e| {
            StreamError::storage_with_source(&self.path, "failed to sync file to disk", e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            buffer_size: 4096,
            use_mmap: true,
            mmap_threshold: 1024, // Low threshold for testing
        };
        let storage = LocalStorage::new(&config).unwrap();
        (storage, temp_dir)
    }

    fn write_file(storage: &LocalStorage, path: &str, data: &[u8]) {
        let mut writer = storage.open_write(Path::new(path)).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_new_creates_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let new_base = temp_dir.path().join("new_subdir");

        let config = StorageConfig {
            base_path: new_base.clone(),
            ..Default::default()
        };

        let _storage = LocalStorage::new(&config).unwrap();
        assert!(new_base.exists());
    }

    #[test]
    fn test_write_read_small_and_mmapped() {
        let (storage, _temp) = create_test_storage();

        write_file(&storage, "small.txt", b"hello");
        let large: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        write_file(&storage, "nested/large.bin", &large);

        let mut content = Vec::new();
        storage
            .open_read(Path::new("small.txt"))
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"hello");

        let mut reader = storage.open_read(Path::new("nested/large.bin")).unwrap();
        assert_eq!(reader.size(), 4096);
        assert_eq!(reader.read_range(100, 4).unwrap(), &large[100..104]);

        let mut content = Vec::new();
        reader.seek(SeekFrom::Start(0)).unwrap();
        reader.read_to_end(&mut content).unwrap();
        assert_eq!(content, large);
    }

    #[test]
    fn test_open_missing_is_source_not_found() {
        let (storage, _temp) = create_test_storage();
        let result = storage.open_read(Path::new("nope.bin"));
        assert!(matches!(result, Err(StreamError::SourceNotFound { .. })));
    }

    #[test]
    fn test_is_dir_and_exists() {
        let (storage, _temp) = create_test_storage();
        storage.create_dir_all(Path::new("a/b")).unwrap();
        write_file(&storage, "a/file", b"");

        assert!(storage.is_dir(Path::new("a/b")).unwrap());
        assert!(!storage.is_dir(Path::new("a/file")).unwrap());
        assert!(!storage.is_dir(Path::new("missing")).unwrap());
        assert!(storage.exists(Path::new("a/file")).unwrap());
    }

    #[test]
    fn test_delete_refuses_non_empty_dir() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "dir/1", b"x");

        assert!(storage.delete(Path::new("dir")).is_err());
        storage.delete_recursively(Path::new("dir")).unwrap();
        assert!(!storage.exists(Path::new("dir")).unwrap());
    }

    #[test]
    fn test_copy_and_rename() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "src", b"42");

        storage.copy(Path::new("src"), Path::new("copies/dst")).unwrap();
        storage.rename(Path::new("src"), Path::new("moved")).unwrap();

        assert!(!storage.exists(Path::new("src")).unwrap());
        let mut content = String::new();
        storage
            .open_read(Path::new("copies/dst"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "42");
        assert!(storage.exists(Path::new("moved")).unwrap());
    }

    #[test]
    fn test_list_sorted() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "d/2/3", b"");
        write_file(&storage, "d/1", b"");
        storage.create_dir_all(Path::new("d/4")).unwrap();

        assert_eq!(storage.list(Path::new("d")).unwrap(), vec!["1", "2", "4"]);
        assert!(storage.list(Path::new("missing")).unwrap().is_empty());
    }
}
