//! Per-edge buffers.
//!
//! Every edge owns exactly one buffer, chosen from the kind of the node it
//! feeds: push-mode nodes (relays, fanouts) get a lossless [`BlockingQueue`],
//! samplers get a [`LatestValueSlot`] that they poll at their own rate. A
//! sampler is therefore never pushed into: its producer only `put`s into the
//! mailbox the sampler drains.

use crate::error::PipeResult;
use crate::pipeline::envelope::Envelope;
use crate::pipeline::fifo::BlockingQueue;
use crate::pipeline::id::NodeId;
use crate::pipeline::slot::LatestValueSlot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a branch (or any edge) receives envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// Lossless blocking push into the child's FIFO.
    Push,
    /// Child samples a latest-value slot at its own period.
    Sample,
}

impl std::fmt::Display for BranchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchKind::Push => write!(f, "push"),
            BranchKind::Sample => write!(f, "sample"),
        }
    }
}

/// The buffer sitting on one edge.
#[derive(Clone)]
pub enum Inbox {
    Fifo(BlockingQueue<Envelope>),
    Slot(Arc<LatestValueSlot<Envelope>>),
}

impl Inbox {
    pub fn for_kind(kind: BranchKind, capacity: usize) -> PipeResult<Self> {
        Ok(match kind {
            BranchKind::Push => Inbox::Fifo(BlockingQueue::new(capacity)?),
            BranchKind::Sample => Inbox::Slot(Arc::new(LatestValueSlot::new(capacity)?)),
        })
    }

    pub fn kind(&self) -> BranchKind {
        match self {
            Inbox::Fifo(_) => BranchKind::Push,
            Inbox::Slot(_) => BranchKind::Sample,
        }
    }

    /// Hand an envelope to the edge: blocking push for FIFOs, overwrite for slots.
    pub fn deliver(&self, envelope: Envelope) -> PipeResult<()> {
        match self {
            Inbox::Fifo(queue) => queue.push(envelope),
            Inbox::Slot(slot) => {
                slot.put(envelope);
                Ok(())
            }
        }
    }
}

/// Outbound end of an edge, as seen by the producing node.
#[derive(Clone)]
pub struct Outlet {
    pub child: NodeId,
    pub child_name: Arc<str>,
    pub inbox: Inbox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_kind_matches_buffer() {
        let fifo = Inbox::for_kind(BranchKind::Push, 2).unwrap();
        let slot = Inbox::for_kind(BranchKind::Sample, 2).unwrap();
        assert!(matches!(fifo, Inbox::Fifo(_)));
        assert!(matches!(slot, Inbox::Slot(_)));
        assert_eq!(fifo.kind(), BranchKind::Push);
        assert_eq!(slot.kind(), BranchKind::Sample);
    }

    #[test]
    fn test_slot_delivery_never_blocks() {
        let inbox = Inbox::for_kind(BranchKind::Sample, 1).unwrap();
        for seq in 0..10 {
            inbox.deliver(Envelope::new(seq)).unwrap();
        }
        let Inbox::Slot(slot) = &inbox else {
            unreachable!()
        };
        assert_eq!(slot.try_latest().map(|e| e.sequence_id()), Some(9));
    }

    #[test]
    fn test_fifo_delivery_is_lossless() {
        let inbox = Inbox::for_kind(BranchKind::Push, 4).unwrap();
        for seq in 0..3 {
            inbox.deliver(Envelope::new(seq)).unwrap();
        }
        let Inbox::Fifo(queue) = &inbox else {
            unreachable!()
        };
        let ids: Vec<_> = (0..3).map(|_| queue.pop().unwrap().sequence_id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_capacity_edge_rejected() {
        assert!(Inbox::for_kind(BranchKind::Push, 0).is_err());
        assert!(Inbox::for_kind(BranchKind::Sample, 0).is_err());
    }
}
