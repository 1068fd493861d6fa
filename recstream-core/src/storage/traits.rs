// recstream-core/src/storage/traits.rs

//! Storage abstraction traits.
//!
//! These traits give the local filesystem and the remote block store one
//! filesystem-style interface, so byte sources and the text output sink can
//! run against either.

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::{Result, StreamError};

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Size of the object in bytes.
    pub size: u64,
    /// Last modification time, if available.
    pub modified: Option<std::time::SystemTime>,
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// A handle for reading from storage.
pub trait StorageReader: Read + Seek + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `length` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// A handle for writing to storage.
pub trait StorageWriter: Write + Send {
    /// Finishes the write operation, ensuring all data is persisted.
    ///
    /// After calling `finish`, the writer must not be used again.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The filesystem-style storage backend trait.
///
/// This trait is object-safe and is used as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Scheme this backend serves (`file`, `igfs`, ...).
    fn scheme(&self) -> &'static str;

    /// Checks if a file or directory exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if nothing exists at the path.
    fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Returns true if the path exists and is a directory.
    fn is_dir(&self, path: &Path) -> Result<bool> {
        match self.metadata(path) {
            Ok(meta) => Ok(meta.is_dir),
            Err(StreamError::SourceNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Opens a file for reading.
    ///
    /// # Errors
    ///
    /// Returns `SourceNotFound` if the file doesn't exist.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens a file for writing, replacing any existing content.
    /// Parent directories are created if they don't exist.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Removes a file or an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path doesn't exist or is a non-empty directory.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Removes a file, or a directory and everything below it.
    fn delete_recursively(&self, path: &Path) -> Result<()>;

    /// Copies a file, replacing the destination if it exists.
    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut reader = self.open_read(from)?;
        let mut writer = self.open_write(to)?;
        std::io::copy(&mut reader, &mut writer).map_err(|e| {
            StreamError::storage_with_source(
                from,
                format!("failed to copy to {}", to.display()),
                e,
            )
        })?;
        writer.finish()
    }

    /// Lists the names of the direct children of a directory, sorted.
    ///
    /// A path that doesn't exist lists as empty.
    fn list(&self, prefix: &Path) -> Result<Vec<String>>;

    /// Renames a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}
