// recstream-core/src/sink.rs

//! Positional text output.
//!
//! A [`TextOutputSequence`] collects lines by index, in any order, and
//! writes them out as one newline-terminated text resource in index order
//! when finished. Writing the same index twice keeps the last value.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StreamError};
use crate::source::{Compression, FinishWrite};
use crate::storage::StorageBackend;

pub struct TextOutputSequence {
    storage: Arc<dyn StorageBackend>,
    destination: PathBuf,
    compression: Compression,
    items: BTreeMap<u64, String>,
}

impl TextOutputSequence {
    /// Prepares a sequence that will be written to `destination`.
    ///
    /// Nothing is created on the backend until [`finish`](Self::finish).
    ///
    /// # Errors
    ///
    /// Returns a config error if `destination` is an existing directory.
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        destination: impl AsRef<Path>,
        compression: Compression,
    ) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();
        if storage.is_dir(&destination)? {
            return Err(StreamError::config(format!(
                "text output destination {} is a directory",
                destination.display()
            )));
        }

        Ok(Self {
            storage,
            destination,
            compression,
            items: BTreeMap::new(),
        })
    }

    /// Sets the line at `index`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if `text` contains a line break, since it
    /// would read back as more than one line.
    pub fn set_item(&mut self, index: u64, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text.contains('\n') {
            return Err(StreamError::malformed(
                "text",
                format!("item {index} contains a line break"),
            ));
        }
        self.items.insert(index, text);
        Ok(())
    }

    pub fn get_item(&self, index: u64) -> Option<&str> {
        self.items.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Writes every item in index order and returns how many were written.
    /// Indices that were never set produce no line.
    pub fn finish(self) -> Result<usize> {
        let path = self.destination.as_path();
        let io_err = |e| StreamError::storage_with_source(path, "failed to write text output", e);

        let mut writer = self.storage.open_write(path)?;
        {
            let mut encoder: Box<dyn FinishWrite + '_> = self.compression.encoder(&mut writer);
            for text in self.items.values() {
                encoder.write_all(text.as_bytes()).map_err(io_err)?;
                encoder.write_all(b"\n").map_err(io_err)?;
            }
            encoder.finish_stream().map_err(io_err)?;
        }
        writer.finish()?;

        tracing::debug!(
            destination = %path.display(),
            compression = %self.compression,
            items = self.items.len(),
            "wrote text output"
        );
        Ok(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::LocalStorage;
    use flate2::read::GzDecoder;
    use std::io::Read;
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

    #[test]
    fn test_out_of_order_and_overwrite() {
        let (storage, temp) = create_test_storage();
        let mut seq = TextOutputSequence::open(storage, "out/lines.txt", Compression::None).unwrap();

        seq.set_item(2, "two").unwrap();
        seq.set_item(0, "zero").unwrap();
        seq.set_item(1, "first").unwrap();
        seq.set_item(1, "one").unwrap();
        assert_eq!(seq.get_item(1), Some("one"));
        assert_eq!(seq.len(), 3);

        assert_eq!(seq.finish().unwrap(), 3);
        let written = std::fs::read_to_string(temp.path().join("out/lines.txt")).unwrap();
        assert_eq!(written, "zero\none\ntwo\n");
    }

    #[test]
    fn test_gzip_output() {
        let (storage, temp) = create_test_storage();
        let mut seq = TextOutputSequence::open(storage, "lines.gz", Compression::Gzip).unwrap();
        seq.set_item(42, "payload").unwrap();
        seq.finish().unwrap();

        let raw = std::fs::read(temp.path().join("lines.gz")).unwrap();
        let mut text = String::new();
        GzDecoder::new(raw.as_slice()).read_to_string(&mut text).unwrap();
        assert_eq!(text, "payload\n");
    }

    #[test]
    fn test_rejects_line_breaks_and_directories() {
        let (storage, temp) = create_test_storage();
        std::fs::create_dir(temp.path().join("dir")).unwrap();
        assert!(TextOutputSequence::open(Arc::clone(&storage), "dir", Compression::None).is_err());

        let mut seq = TextOutputSequence::open(storage, "x.txt", Compression::None).unwrap();
        assert!(matches!(
            seq.set_item(0, "a\nb"),
            Err(StreamError::MalformedRecord { .. })
        ));
        assert!(seq.is_empty());
    }
}
