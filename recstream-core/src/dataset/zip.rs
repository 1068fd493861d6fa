// recstream-core/src/dataset/zip.rs

use super::traits::{ElementStream, IteratorState, Pipeline};
use crate::error::{Result, StreamError};
use crate::signature::OutputSignature;

/// Element-wise combination of several pipelines.
///
/// Each element is a vector holding one element from every branch, in
/// branch order. All branches must end on the same step; a branch that
/// runs out while another still produces is a [`StreamError::ZipMisalignment`].
pub struct ZippedDataset<P> {
    branches: Vec<P>,
}

impl<P: Pipeline> ZippedDataset<P> {
    pub fn new(branches: Vec<P>) -> Self {
        Self { branches }
    }

    pub fn branches(&self) -> &[P] {
        &self.branches
    }
}

impl<P: Pipeline> Pipeline for ZippedDataset<P> {
    type Iter = ZipIterator<P::Iter>;

    fn make_iterator(&self) -> Self::Iter {
        ZipIterator {
            branches: self.branches.iter().map(Pipeline::make_iterator).collect(),
            state: IteratorState::Unopened,
        }
    }

    fn output_signatures(&self) -> Vec<OutputSignature> {
        self.branches
            .iter()
            .flat_map(Pipeline::output_signatures)
            .collect()
    }
}

pub struct ZipIterator<I> {
    branches: Vec<I>,
    state: IteratorState,
}

impl<I: ElementStream> ZipIterator<I> {
    fn close_all(&mut self) {
        for branch in &mut self.branches {
            branch.close();
        }
    }
}

impl<I: ElementStream> ElementStream for ZipIterator<I> {
    type Item = Vec<I::Item>;

    fn next_element(&mut self) -> Result<Self::Item> {
        if self.state.is_finished() {
            return Err(StreamError::IteratorExhausted);
        }
        if self.branches.is_empty() {
            self.state = IteratorState::Exhausted;
            return Err(StreamError::IteratorExhausted);
        }
        self.state = IteratorState::Open;

        let mut elements = Vec::with_capacity(self.branches.len());
        let mut exhausted = Vec::new();
        let mut active = Vec::new();

        for (index, branch) in self.branches.iter_mut().enumerate() {
            match branch.next_element() {
                Ok(element) => {
                    elements.push(element);
                    active.push(index);
                }
                Err(e) if e.is_end_of_data() => exhausted.push(index),
                Err(e) => {
                    self.close_all();
                    self.state = IteratorState::Closed;
                    return Err(e);
                }
            }
        }

        if exhausted.is_empty() {
            return Ok(elements);
        }

        self.close_all();
        if active.is_empty() {
            self.state = IteratorState::Exhausted;
            return Err(StreamError::IteratorExhausted);
        }

        tracing::warn!(?exhausted, ?active, "zipped branches ended on different steps");
        self.state = IteratorState::Closed;
        Err(StreamError::ZipMisalignment { exhausted, active })
    }

    fn close(&mut self) {
        self.close_all();
        self.state = IteratorState::Closed;
    }

    fn state(&self) -> IteratorState {
        self.state
    }
}

impl<I: ElementStream> Iterator for ZipIterator<I> {
    type Item = Result<Vec<I::Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_element() {
            Ok(elements) => Some(Ok(elements)),
            Err(e) if e.is_end_of_data() => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::dataset::{Dataset, Decoder, SourceSpec};
    use crate::signature::DecodedValue;
    use crate::source::{Compression, SourceAddress};
    use crate::storage::{LocalStorage, StorageBackend};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (Arc<dyn StorageBackend>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        for (name, contents) in files {
            std::fs::write(temp_dir.path().join(name), contents).unwrap();
        }
        let storage = LocalStorage::new(&StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        (Arc::new(storage), temp_dir)
    }

    fn lines(storage: &Arc<dyn StorageBackend>, name: &str) -> Dataset {
        let source = SourceSpec::storage(SourceAddress::local(name), Arc::clone(storage));
        Dataset::new(vec![source], Compression::None, Decoder::text_lines()).unwrap()
    }

    #[test]
    fn test_zip_aligned() {
        let (storage, _temp) = setup(&[("a", "1\n2\n"), ("b", "x\ny\n")]);
        let zipped = lines(&storage, "a").zip(lines(&storage, "b"));
        assert_eq!(zipped.output_signatures().len(), 2);

        let pairs: Vec<Vec<DecodedValue>> = zipped.make_iterator().map(|p| p.unwrap()).collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1][0].as_text(), Some("2"));
        assert_eq!(pairs[1][1].as_text(), Some("y"));
    }

    #[test]
    fn test_zip_misaligned() {
        let (storage, _temp) = setup(&[("a", "1\n2\n3\n"), ("b", "x\ny\n")]);
        let mut iter = lines(&storage, "a").zip(lines(&storage, "b")).make_iterator();

        assert!(iter.next_element().is_ok());
        assert!(iter.next_element().is_ok());
        match iter.next_element() {
            Err(StreamError::ZipMisalignment { exhausted, active }) => {
                assert_eq!(exhausted, vec![1]);
                assert_eq!(active, vec![0]);
            }
            other => panic!("expected misalignment, got {other:?}"),
        }
        assert_eq!(iter.state(), IteratorState::Closed);
        assert!(iter.next_element().unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_zip_branch_error_closes_all() {
        let (storage, _temp) = setup(&[("a", "1\n")]);
        let mut iter = lines(&storage, "a").zip(lines(&storage, "missing")).make_iterator();

        assert!(matches!(
            iter.next_element(),
            Err(StreamError::SourceNotFound { .. })
        ));
        assert_eq!(iter.state(), IteratorState::Closed);
    }
}
