// recstream-core/src/dataset/interleave.rs

//! Round-robin interleaving of several input pipelines.
//!
//! Up to `cycle_length` inputs are open at once. Elements are drawn from
//! the open inputs in turn, `block_length` at a time. When an input ends its
//! slot is refilled with the next unopened input on the following visit.
//!
//! In parallel mode each open input runs on its own worker thread and fills
//! a bounded queue ahead of the consumer. The consumer still drains the
//! queues in the same round-robin order, so parallel and sequential
//! iteration produce identical sequences.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use super::traits::{ElementStream, IteratorState, Pipeline};
use crate::config::InterleaveConfig;
use crate::error::{Result, StreamError};
use crate::signature::OutputSignature;

pub struct InterleavedDataset<P> {
    inputs: Arc<Vec<P>>,
    cycle_length: usize,
    block_length: usize,
    buffer_size: usize,
    parallel: bool,
}

impl<P: Pipeline> InterleavedDataset<P> {
    /// Creates an interleaving over `inputs`.
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero cycle length, block length or
    /// buffer size, or if the inputs don't share one output signature.
    pub fn new(inputs: Vec<P>, config: &InterleaveConfig) -> Result<Self> {
        config.validate()?;

        if let Some((first, rest)) = inputs.split_first() {
            let expected = first.output_signatures();
            if let Some(other) = rest.iter().find(|p| p.output_signatures() != expected) {
                return Err(StreamError::config(format!(
                    "interleaved inputs disagree on output signature: {} vs {}",
                    join_signatures(&expected),
                    join_signatures(&other.output_signatures())
                )));
            }
        }

        Ok(Self {
            inputs: Arc::new(inputs),
            cycle_length: config.cycle_length,
            block_length: config.block_length,
            buffer_size: config.buffer_size,
            parallel: config.parallel,
        })
    }

    pub fn inputs(&self) -> &[P] {
        &self.inputs
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }
}

fn join_signatures(signatures: &[OutputSignature]) -> String {
    signatures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl<P> Pipeline for InterleavedDataset<P>
where
    P: Pipeline + 'static,
    P::Iter: 'static,
    <P::Iter as ElementStream>::Item: Send + 'static,
{
    type Iter = InterleaveIterator<P>;

    fn make_iterator(&self) -> InterleaveIterator<P> {
        InterleaveIterator {
            inputs: Arc::clone(&self.inputs),
            slots: (0..self.cycle_length).map(|_| None).collect(),
            block_length: self.block_length,
            buffer_size: self.buffer_size,
            parallel: self.parallel,
            next_input: 0,
            cycle_index: 0,
            block_index: 0,
            open_slots: 0,
            state: IteratorState::Unopened,
        }
    }

    fn output_signatures(&self) -> Vec<OutputSignature> {
        self.inputs
            .first()
            .map(Pipeline::output_signatures)
            .unwrap_or_default()
    }
}

enum WorkerMessage<T> {
    Element(T),
    End,
    Failed(StreamError),
}

/// An input drained by a background thread into a bounded queue.
struct Worker<T> {
    receiver: Option<Receiver<WorkerMessage<T>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<I>(index: usize, mut iter: I, buffer_size: usize) -> Result<Self>
    where
        I: ElementStream<Item = T> + 'static,
    {
        let (sender, receiver) = channel::bounded(buffer_size);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("recstream-interleave-{index}"))
            .spawn(move || {
                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    let message = match iter.next_element() {
                        Ok(element) => WorkerMessage::Element(element),
                        Err(e) if e.is_end_of_data() => WorkerMessage::End,
                        Err(e) => WorkerMessage::Failed(e),
                    };
                    let last = !matches!(message, WorkerMessage::Element(_));
                    // A send error means the consumer hung up.
                    if sender.send(message).is_err() || last {
                        break;
                    }
                }
                iter.close();
            })
            .map_err(|e| StreamError::worker(format!("failed to spawn interleave worker: {e}")))?;

        Ok(Self {
            receiver: Some(receiver),
            stop,
            handle: Some(handle),
        })
    }

    fn next(&mut self) -> Result<Option<T>> {
        let Some(receiver) = &self.receiver else {
            return Ok(None);
        };
        match receiver.recv() {
            Ok(WorkerMessage::Element(element)) => Ok(Some(element)),
            Ok(WorkerMessage::End) => Ok(None),
            Ok(WorkerMessage::Failed(e)) => Err(e),
            Err(_) => Err(StreamError::worker(
                "interleave worker exited before the end of its input",
            )),
        }
    }
}

impl<T> Worker<T> {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a worker waiting on a full queue.
        self.receiver = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("interleave worker panicked");
            }
        }
    }
}

enum Slot<I: ElementStream> {
    Inline(I),
    Threaded(Worker<I::Item>),
}

impl<I> Slot<I>
where
    I: ElementStream + 'static,
    I::Item: Send + 'static,
{
    fn next(&mut self) -> Result<Option<I::Item>> {
        match self {
            Slot::Inline(iter) => match iter.next_element() {
                Ok(element) => Ok(Some(element)),
                Err(e) if e.is_end_of_data() => Ok(None),
                Err(e) => Err(e),
            },
            Slot::Threaded(worker) => worker.next(),
        }
    }
}

impl<I: ElementStream> Slot<I> {
    fn close(&mut self) {
        match self {
            Slot::Inline(iter) => iter.close(),
            Slot::Threaded(worker) => worker.stop(),
        }
    }
}

pub struct InterleaveIterator<P: Pipeline> {
    inputs: Arc<Vec<P>>,
    slots: Vec<Option<Slot<P::Iter>>>,
    block_length: usize,
    buffer_size: usize,
    parallel: bool,
    next_input: usize,
    cycle_index: usize,
    block_index: usize,
    open_slots: usize,
    state: IteratorState,
}

impl<P> InterleaveIterator<P>
where
    P: Pipeline + 'static,
    P::Iter: 'static,
    <P::Iter as ElementStream>::Item: Send + 'static,
{
    fn inputs_remaining(&self) -> bool {
        self.next_input < self.inputs.len()
    }

    fn advance_cycle(&mut self) {
        self.block_index = 0;
        self.cycle_index = (self.cycle_index + 1) % self.slots.len();
    }

    fn open_slot(&mut self) -> Result<()> {
        let index = self.next_input;
        self.next_input += 1;

        let iter = self.inputs[index].make_iterator();
        let slot = if self.parallel {
            Slot::Threaded(Worker::spawn(index, iter, self.buffer_size)?)
        } else {
            Slot::Inline(iter)
        };

        tracing::debug!(input = index, slot = self.cycle_index, "opened interleave input");
        self.slots[self.cycle_index] = Some(slot);
        self.open_slots += 1;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<<P::Iter as ElementStream>::Item>> {
        while self.inputs_remaining() || self.open_slots > 0 {
            let remaining = self.inputs_remaining();
            match self.slots[self.cycle_index].as_mut() {
                Some(slot) => match slot.next()? {
                    Some(element) => {
                        self.block_index += 1;
                        if self.block_index == self.block_length {
                            self.advance_cycle();
                        }
                        return Ok(Some(element));
                    }
                    None => {
                        if let Some(mut finished) = self.slots[self.cycle_index].take() {
                            finished.close();
                        }
                        self.open_slots -= 1;
                        self.advance_cycle();
                    }
                },
                None if remaining => self.open_slot()?,
                None => self.advance_cycle(),
            }
        }
        Ok(None)
    }
}

impl<P: Pipeline> InterleaveIterator<P> {
    fn close_slots(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(mut slot) = slot.take() {
                slot.close();
            }
        }
        self.open_slots = 0;
    }
}

impl<P> ElementStream for InterleaveIterator<P>
where
    P: Pipeline + 'static,
    P::Iter: 'static,
    <P::Iter as ElementStream>::Item: Send + 'static,
{
    type Item = <P::Iter as ElementStream>::Item;

    fn next_element(&mut self) -> Result<Self::Item> {
        if self.state.is_finished() {
            return Err(StreamError::IteratorExhausted);
        }
        self.state = IteratorState::Open;

        match self.advance() {
            Ok(Some(element)) => Ok(element),
            Ok(None) => {
                self.state = IteratorState::Exhausted;
                Err(StreamError::IteratorExhausted)
            }
            Err(e) => {
                self.close_slots();
                self.state = IteratorState::Closed;
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.close_slots();
        self.state = IteratorState::Closed;
    }

    fn state(&self) -> IteratorState {
        self.state
    }
}

impl<P> Iterator for InterleaveIterator<P>
where
    P: Pipeline + 'static,
    P::Iter: 'static,
    <P::Iter as ElementStream>::Item: Send + 'static,
{
    type Item = Result<<P::Iter as ElementStream>::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_element() {
            Ok(element) => Some(Ok(element)),
            Err(e) if e.is_end_of_data() => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<P: Pipeline> Drop for InterleaveIterator<P> {
    fn drop(&mut self) {
        self.close_slots();
    }
}
