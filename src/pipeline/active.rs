//! Named execution threads with a start-up readiness barrier.
//!
//! Each node of a running graph is backed by one [`ActiveThread`]. The
//! thread's observable lifecycle lives in a shared [`NodeStatus`] so that the
//! graph owner can query it while the thread runs.

use crate::error::{PipeError, PipeResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// Lifecycle of a node thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Created, thread not yet running.
    Idle,
    /// Processing envelopes.
    Running,
    /// Terminal envelope observed (or a fatal failure); finishing up.
    Draining,
    /// Thread has exited its loop.
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NodeState::Idle => "idle",
            NodeState::Running => "running",
            NodeState::Draining => "draining",
            NodeState::Stopped => "stopped",
        };
        f.pad(label)
    }
}

/// Per-node state shared between the node thread and the graph owner.
#[derive(Debug)]
pub struct NodeStatus {
    state: Mutex<NodeState>,
    changed: Condvar,
    processed: AtomicU64,
    terminals: AtomicU64,
    fatal: Mutex<Option<String>>,
}

impl NodeStatus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Idle),
            changed: Condvar::new(),
            processed: AtomicU64::new(0),
            terminals: AtomicU64::new(0),
            fatal: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> NodeState {
        *self.lock_state()
    }

    pub fn set_state(&self, state: NodeState) {
        *self.lock_state() = state;
        self.changed.notify_all();
    }

    /// Block until the node has left `Idle`.
    pub fn wait_started(&self) -> NodeState {
        let mut state = self.lock_state();
        while *state == NodeState::Idle {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes the node's stage has handled.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn record_terminal(&self) {
        self.terminals.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal envelopes the node has observed.
    pub fn terminals(&self) -> u64 {
        self.terminals.load(Ordering::Relaxed)
    }

    pub fn set_fatal(&self, message: impl Into<String>) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        fatal.get_or_insert_with(|| message.into());
    }

    /// First fatal failure recorded for this node.
    pub fn fatal(&self) -> Option<String> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the status `Stopped` when the thread body exits, even by unwinding.
struct StopGuard(Arc<NodeStatus>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.set_state(NodeState::Stopped);
    }
}

/// A named OS thread running one loop.
pub struct ActiveThread {
    name: String,
    status: Arc<NodeStatus>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveThread {
    pub fn new(name: impl Into<String>, status: Arc<NodeStatus>) -> Self {
        Self {
            name: name.into(),
            status,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &Arc<NodeStatus> {
        &self.status
    }

    /// Spawn the thread and wait until it has flagged itself running.
    pub fn start<F>(&mut self, run: F) -> PipeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(PipeError::Config(format!(
                "thread '{}' already started",
                self.name
            )));
        }

        let status = Arc::clone(&self.status);
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _guard = StopGuard(Arc::clone(&status));
                status.set_state(NodeState::Running);
                run();
            })
            .map_err(|source| PipeError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        self.handle = Some(handle);
        self.status.wait_started();
        Ok(())
    }

    /// Whether the thread has started and not yet left its loop.
    pub fn is_running(&self) -> bool {
        matches!(
            self.status.state(),
            NodeState::Running | NodeState::Draining
        )
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the thread to exit. Joining twice is a no-op.
    pub fn join(&mut self) -> PipeResult<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| PipeError::ThreadPanicked(self.name.clone())),
            None => Ok(()),
        }
    }
}
