//! Bounded blocking FIFO.
//!
//! The lossless counterpart of [`LatestValueSlot`](crate::pipeline::slot::LatestValueSlot):
//! `push` blocks while the queue is full, `pop` blocks while it is empty, and
//! items come out in exactly the order they went in. Used on every edge where
//! no item may be dropped.
//!
//! Backed by a bounded crossbeam channel. The queue holds both ends, so the
//! channel can never be disconnected while a handle exists.

use crate::error::{PipeError, PipeResult};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Bounded, blocking, strictly ordered queue. Clones share the same queue.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> PipeResult<Self> {
        if capacity == 0 {
            return Err(PipeError::InvalidCapacity {
                what: "blocking queue".to_string(),
                capacity,
            });
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self { tx, rx, capacity })
    }

    /// Append an item, blocking while the queue is full.
    pub fn push(&self, item: T) -> PipeResult<()> {
        self.tx.send(item).map_err(|_| PipeError::ChannelSend)
    }

    /// Remove the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> PipeResult<T> {
        self.rx.recv().map_err(|_| PipeError::ChannelRecv)
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Remove the oldest item, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> PipeResult<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PipeError::ChannelRecv),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
