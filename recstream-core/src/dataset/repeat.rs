// recstream-core/src/dataset/repeat.rs

use std::sync::Arc;

use super::traits::{ElementStream, IteratorState, Pipeline};
use crate::error::{Result, StreamError};
use crate::signature::OutputSignature;

/// Replays a pipeline `count` times, or indefinitely when `count` is `None`.
///
/// Every pass starts from a fresh iterator, so sources are reopened and
/// re-read from the beginning. A pass that produces nothing ends the
/// repetition, which keeps an empty dataset from spinning forever.
pub struct RepeatedDataset<P> {
    inner: Arc<P>,
    count: Option<usize>,
}

impl<P: Pipeline> RepeatedDataset<P> {
    pub fn new(inner: P, count: Option<usize>) -> Self {
        Self {
            inner: Arc::new(inner),
            count,
        }
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }
}

impl<P: Pipeline> Pipeline for RepeatedDataset<P> {
    type Iter = RepeatIterator<P>;

    fn make_iterator(&self) -> RepeatIterator<P> {
        RepeatIterator {
            inner: Arc::clone(&self.inner),
            count: self.count,
            current: None,
            pass: 0,
            produced_this_pass: 0,
            state: IteratorState::Unopened,
        }
    }

    fn output_signatures(&self) -> Vec<OutputSignature> {
        self.inner.output_signatures()
    }
}

pub struct RepeatIterator<P: Pipeline> {
    inner: Arc<P>,
    count: Option<usize>,
    current: Option<P::Iter>,
    pass: usize,
    produced_this_pass: u64,
    state: IteratorState,
}

impl<P: Pipeline> RepeatIterator<P> {
    /// Zero-based index of the pass currently being read.
    pub fn pass(&self) -> usize {
        self.pass
    }

    fn passes_left(&self) -> bool {
        self.count.map_or(true, |count| self.pass < count)
    }

    fn finish(&mut self, state: IteratorState) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
        self.state = state;
    }
}

impl<P: Pipeline> ElementStream for RepeatIterator<P> {
    type Item = <P::Iter as ElementStream>::Item;

    fn next_element(&mut self) -> Result<Self::Item> {
        if self.state.is_finished() {
            return Err(StreamError::IteratorExhausted);
        }
        self.state = IteratorState::Open;

        loop {
            if !self.passes_left() {
                self.finish(IteratorState::Exhausted);
                return Err(StreamError::IteratorExhausted);
            }

            let iter = self
                .current
                .get_or_insert_with(|| self.inner.make_iterator());

            match iter.next_element() {
                Ok(element) => {
                    self.produced_this_pass += 1;
                    return Ok(element);
                }
                Err(e) if e.is_end_of_data() => {
                    if let Some(mut finished) = self.current.take() {
                        finished.close();
                    }
                    if self.produced_this_pass == 0 {
                        tracing::debug!(pass = self.pass, "empty pass, ending repeat");
                        self.finish(IteratorState::Exhausted);
                        return Err(StreamError::IteratorExhausted);
                    }
                    self.pass += 1;
                    self.produced_this_pass = 0;
                }
                Err(e) => {
                    self.finish(IteratorState::Closed);
                    return Err(e);
                }
            }
        }
    }

    fn close(&mut self) {
        self.finish(IteratorState::Closed);
    }

    fn state(&self) -> IteratorState {
        self.state
    }
}

impl<P: Pipeline> Iterator for RepeatIterator<P> {
    type Item = Result<<P::Iter as ElementStream>::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_element() {
            Ok(element) => Some(Ok(element)),
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
    use crate::source::{Compression, SourceAddress};
    use crate::storage::{LocalStorage, StorageBackend};
    use tempfile::TempDir;

    fn text_dataset(contents: &str) -> (Dataset, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("lines.txt"), contents).unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(
            LocalStorage::new(&StorageConfig {
                base_path: temp_dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let source = SourceSpec::storage(SourceAddress::local("lines.txt"), storage);
        let ds = Dataset::new(vec![source], Compression::None, Decoder::text_lines()).unwrap();
        (ds, temp_dir)
    }

    fn texts(iter: impl Iterator<Item = Result<crate::signature::DecodedValue>>) -> Vec<String> {
        iter.map(|v| v.unwrap().to_string()).collect()
    }

    #[test]
    fn test_repeat_count() {
        let (ds, _temp) = text_dataset("a\nb\n");
        let repeated = ds.repeat(Some(3));
        assert_eq!(texts(repeated.make_iterator()), vec!["a", "b", "a", "b", "a", "b"]);
        assert_eq!(repeated.output_signatures().len(), 1);
    }

    #[test]
    fn test_repeat_zero() {
        let (ds, _temp) = text_dataset("a\n");
        let mut iter = ds.repeat(Some(0)).make_iterator();
        assert!(iter.next_element().unwrap_err().is_end_of_data());
        assert_eq!(iter.state(), IteratorState::Exhausted);
    }

    #[test]
    fn test_repeat_forever_takes() {
        let (ds, _temp) = text_dataset("x\ny\n");
        let mut iter = ds.repeat(None).make_iterator();
        let taken: Vec<String> = iter.by_ref().take(5).map(|v| v.unwrap().to_string()).collect();
        assert_eq!(taken, vec!["x", "y", "x", "y", "x"]);
        assert_eq!(iter.pass(), 2);
        iter.close();
        assert_eq!(iter.state(), IteratorState::Closed);
    }

    #[test]
    fn test_repeat_forever_empty_ends() {
        let (ds, _temp) = text_dataset("");
        assert!(texts(ds.repeat(None).make_iterator()).is_empty());
    }
}
