//! Thread boundary between node threads and the graph owner.
//!
//! Node threads report lifecycle changes as [`EngineEvent`]s. The channel is
//! bounded and node threads never block on it: when the owner does not keep
//! up, events are dropped and counted instead.

use crate::pipeline::id::NodeId;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Messages sent from node threads to the graph owner.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A node thread passed its readiness barrier.
    NodeStarted { node: NodeId, name: String },

    /// A node received (or, for the source, produced) the terminal envelope.
    TerminalObserved { node: NodeId, sequence_id: u64 },

    /// A stage failed; the graph is tearing down.
    Fatal { node: NodeId, message: String },

    /// A node thread is about to exit.
    NodeStopped { node: NodeId, processed: u64 },
}

impl EngineEvent {
    pub fn node(&self) -> NodeId {
        match self {
            EngineEvent::NodeStarted { node, .. }
            | EngineEvent::TerminalObserved { node, .. }
            | EngineEvent::Fatal { node, .. }
            | EngineEvent::NodeStopped { node, .. } => *node,
        }
    }
}

/// Default channel capacity for engine events.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Node-side sender. Cloned into every node thread.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

/// Owner-side receiver, exposed through `RunningGraph::events`.
#[derive(Debug)]
pub struct EngineEvents {
    rx: Receiver<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBridge {
    /// Create a new bridge pair: `(sender_for_nodes, receiver_for_owner)`.
    pub fn new(capacity: usize) -> (Self, EngineEvents) {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: Arc::clone(&dropped),
            },
            EngineEvents { rx, dropped },
        )
    }

    /// Send without blocking. A full channel drops the event.
    pub fn emit(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let previous = self.dropped.fetch_add(1, Ordering::Relaxed);
                if previous == 0 {
                    tracing::warn!(
                        "Engine event channel full, dropping events (first: {:?})",
                        event
                    );
                }
            }
            // Owner went away; nobody is listening.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl EngineEvents {
    /// Drain all pending events.
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Try to receive a single event without blocking.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait at most `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_drain() {
        let (bridge, events) = EventBridge::new(8);
        bridge.emit(EngineEvent::NodeStarted {
            node: NodeId(0),
            name: "src".to_string(),
        });
        bridge.emit(EngineEvent::TerminalObserved {
            node: NodeId(0),
            sequence_id: 4,
        });

        let drained = events.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].node(), NodeId(0));
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (bridge, events) = EventBridge::new(2);
        for seq in 0..5 {
            bridge.emit(EngineEvent::TerminalObserved {
                node: NodeId(1),
                sequence_id: seq,
            });
        }
        assert_eq!(events.dropped(), 3);
        assert_eq!(events.drain().len(), 2);
    }

    #[test]
    fn test_emit_after_owner_dropped() {
        let (bridge, events) = EventBridge::new(1);
        drop(events);
        bridge.emit(EngineEvent::NodeStopped {
            node: NodeId(2),
            processed: 0,
        });
    }

    #[test]
    fn test_recv_timeout_empty() {
        let (_bridge, events) = EventBridge::new(1);
        assert!(events.recv_timeout(Duration::from_millis(5)).is_none());
    }
}
