// recstream-core/src/dataset/traits.rs

use std::fmt;

use super::repeat::RepeatedDataset;
use crate::error::Result;
use crate::signature::OutputSignature;

/// Lifecycle of a live iterator.
///
/// `Unopened -> Open` on the first request, `Open -> Exhausted` once every
/// source has ended, and `Open | Exhausted -> Closed` on `close` or a
/// fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Unopened,
    Open,
    Exhausted,
    Closed,
}

impl IteratorState {
    /// True once no further element can be produced.
    pub fn is_finished(&self) -> bool {
        matches!(self, IteratorState::Exhausted | IteratorState::Closed)
    }
}

impl fmt::Display for IteratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IteratorState::Unopened => "unopened",
            IteratorState::Open => "open",
            IteratorState::Exhausted => "exhausted",
            IteratorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A stateful cursor producing elements one at a time.
pub trait ElementStream: Send {
    type Item;

    /// Produces the next element.
    ///
    /// # Errors
    ///
    /// Returns `IteratorExhausted` once the stream has ended or been closed;
    /// consumers treat it as the end of an epoch. Any other error is fatal
    /// and leaves the stream closed.
    fn next_element(&mut self) -> Result<Self::Item>;

    /// Releases every held handle before returning. Idempotent.
    fn close(&mut self);

    fn state(&self) -> IteratorState;
}

/// A stateless description of a sequence that can be iterated any number
/// of times.
pub trait Pipeline: Send + Sync {
    type Iter: ElementStream;

    /// Starts a fresh pass. Opens nothing until the first element is
    /// requested.
    fn make_iterator(&self) -> Self::Iter;

    /// One signature per zipped branch, known before iteration starts.
    fn output_signatures(&self) -> Vec<OutputSignature>;

    /// Repeats the sequence `count` times, or until a pass comes up empty
    /// when `count` is `None`.
    fn repeat(self, count: Option<usize>) -> RepeatedDataset<Self>
    where
        Self: Sized,
    {
        RepeatedDataset::new(self, count)
    }
}
