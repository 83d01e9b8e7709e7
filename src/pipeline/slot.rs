//! Latest-value ring buffer.
//!
//! A mailbox rather than a queue: the producer never blocks, the ring keeps
//! only the last `capacity` writes, and readers always get the newest value.
//! A slow reader may see the same value twice and a fast writer may overwrite
//! values no reader ever sees. This is what lets a sampling stage run at its
//! own rate, independent of its producer.
//!
//! The write cursor counts writes. The newest value lives at
//! `(cursor - 1) % capacity`, which is only ever computed once `cursor > 0`;
//! the never-written state is handled as its own case.

use crate::error::{PipeError, PipeResult};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct SlotState<T> {
    values: Vec<T>,
    capacity: usize,
    cursor: u64,
}

impl<T: Clone> SlotState<T> {
    fn newest(&self) -> Option<T> {
        if self.cursor == 0 {
            return None;
        }
        let index = ((self.cursor - 1) % self.capacity as u64) as usize;
        Some(self.values[index].clone())
    }
}

/// Single-producer, multi-consumer latest-value ring of fixed capacity.
pub struct LatestValueSlot<T> {
    capacity: usize,
    state: Mutex<SlotState<T>>,
    written: Condvar,
}

impl<T: Clone> LatestValueSlot<T> {
    /// Create a ring holding the last `capacity` writes.
    pub fn new(capacity: usize) -> PipeResult<Self> {
        if capacity == 0 {
            return Err(PipeError::InvalidCapacity {
                what: "latest-value slot".to_string(),
                capacity,
            });
        }
        Ok(Self {
            capacity,
            state: Mutex::new(SlotState {
                values: Vec::with_capacity(capacity),
                capacity,
                cursor: 0,
            }),
            written: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of writes so far.
    pub fn cursor(&self) -> u64 {
        self.lock().cursor
    }

    pub fn is_written(&self) -> bool {
        self.cursor() > 0
    }

    /// Write a value. Never blocks and never fails; overwrites the oldest
    /// retained value once the ring is full, then wakes every waiting reader.
    pub fn put(&self, value: T) {
        let mut state = self.lock();
        if state.values.len() < self.capacity {
            state.values.push(value);
        } else {
            let index = (state.cursor % self.capacity as u64) as usize;
            state.values[index] = value;
        }
        state.cursor += 1;
        drop(state);
        self.written.notify_all();
    }

    /// Block until the cursor has moved past `after`, then return the new
    /// cursor together with the newest value.
    pub fn wait_next(&self, after: u64) -> (u64, T) {
        let mut state = self.lock();
        loop {
            if state.cursor > after {
                if let Some(value) = state.newest() {
                    return (state.cursor, value);
                }
            }
            state = self
                .written
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until at least one value has ever been written, then return the
    /// most recent one.
    pub fn get_blocking(&self) -> T {
        self.wait_next(0).1
    }

    /// Most recent value, blocking only if nothing was ever written. Meant for
    /// periodic callers that accept staleness.
    pub fn get_latest_nonblocking(&self) -> T {
        self.wait_next(0).1
    }

    /// Most recent value, or `None` if nothing was ever written.
    pub fn try_latest(&self) -> Option<T> {
        self.lock().newest()
    }

    /// Most recent value, waiting at most `timeout` for the first write.
    pub fn get_latest_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = state.newest() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .written
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Retained values, oldest first.
    pub fn retained(&self) -> Vec<T> {
        let state = self.lock();
        if state.values.len() < self.capacity {
            return state.values.clone();
        }
        let start = (state.cursor % self.capacity as u64) as usize;
        state.values[start..]
            .iter()
            .chain(state.values[..start].iter())
            .cloned()
            .collect()
    }
}
