//! Graph construction: node arena, attach/branch, validation and rendering.
//!
//! Nodes live in a flat arena addressed by [`NodeId`]. A node refers to its
//! predecessor and successors by id only, so the tree can be rewired freely
//! until [`Graph::start`](crate::pipeline::executor) consumes it.

use crate::error::{PipeError, PipeResult};
use crate::pipeline::edge::BranchKind;
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{AnyStage, NodeKind, SourceSettings};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Default FIFO capacity for push edges.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;
/// Default ring capacity for sampling edges.
pub const DEFAULT_SLOT_CAPACITY: usize = 4;

/// One arena slot.
pub(crate) struct NodeSlot {
    pub(crate) name: Arc<str>,
    pub(crate) kind: NodeKind,
    pub(crate) depth: u32,
    pub(crate) predecessor: Option<NodeId>,
    pub(crate) successors: Vec<NodeId>,
    pub(crate) stage: Option<AnyStage>,
    pub(crate) capacity: Option<usize>,
}

/// Snapshot of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub kind: String,
    pub depth: u32,
    pub predecessor: Option<NodeId>,
    pub successors: Vec<NodeId>,
    /// How the node receives envelopes; `None` for the source.
    pub inbound: Option<BranchKind>,
    pub stage: Option<String>,
}

/// Complete topology snapshot of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub name: String,
    pub nodes: Vec<NodeSnapshot>,
}

impl TopologySnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Nodes without successors.
    pub fn leaves(&self) -> impl Iterator<Item = &NodeSnapshot> {
        self.nodes.iter().filter(|n| n.successors.is_empty())
    }

    pub fn max_depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// A streaming graph under construction.
pub struct Graph {
    name: String,
    pub(crate) nodes: Vec<NodeSlot>,
    source: Option<NodeId>,
    pub(crate) queue_capacity: usize,
    pub(crate) slot_capacity: usize,
    pub(crate) event_capacity: usize,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            source: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            event_capacity: crate::pipeline::bridge::EVENT_CHANNEL_CAPACITY,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacities used for edges without an explicit [`set_capacity`](Self::set_capacity).
    pub fn set_default_capacities(&mut self, queue: usize, slot: usize) -> PipeResult<()> {
        if queue == 0 {
            return Err(PipeError::InvalidCapacity {
                what: "default queue".to_string(),
                capacity: queue,
            });
        }
        if slot == 0 {
            return Err(PipeError::InvalidCapacity {
                what: "default slot".to_string(),
                capacity: slot,
            });
        }
        self.queue_capacity = queue;
        self.slot_capacity = slot;
        Ok(())
    }

    pub fn set_event_capacity(&mut self, capacity: usize) {
        self.event_capacity = capacity.max(1);
    }

    // --- Node creation ---

    fn add_node(&mut self, name: &str, kind: NodeKind) -> PipeResult<NodeId> {
        if name.contains('\0') {
            return Err(PipeError::InvalidName(name.to_string()));
        }
        if self.find(name).is_some() {
            return Err(PipeError::DuplicateName(name.to_string()));
        }
        let id = NodeId::from_index(self.nodes.len());
        tracing::trace!("Added node '{}' ({}) as {}", name, kind.label(), id);
        self.nodes.push(NodeSlot {
            name: Arc::from(name),
            kind,
            depth: 0,
            predecessor: None,
            successors: Vec::new(),
            stage: None,
            capacity: None,
        });
        Ok(id)
    }

    /// Add the graph's root. A graph has exactly one source.
    pub fn add_source(&mut self, name: &str, settings: SourceSettings) -> PipeResult<NodeId> {
        if let Some(existing) = self.source {
            return Err(PipeError::DuplicateSource(
                self.nodes[existing.index()].name.to_string(),
            ));
        }
        let id = self.add_node(name, NodeKind::Source(settings))?;
        self.source = Some(id);
        Ok(id)
    }

    pub fn add_relay(&mut self, name: &str) -> PipeResult<NodeId> {
        self.add_node(name, NodeKind::Relay)
    }

    /// Add a sampler polling its inbound slot once every `period`.
    pub fn add_sampler(&mut self, name: &str, period: Duration) -> PipeResult<NodeId> {
        if period.is_zero() {
            return Err(PipeError::InvalidPeriod(name.to_string()));
        }
        self.add_node(name, NodeKind::Sampler { period })
    }

    pub fn add_fanout(&mut self, name: &str) -> PipeResult<NodeId> {
        self.add_node(name, NodeKind::Fanout)
    }

    fn slot(&self, id: NodeId) -> PipeResult<&NodeSlot> {
        self.nodes.get(id.index()).ok_or(PipeError::UnknownNode(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> PipeResult<&mut NodeSlot> {
        self.nodes.get_mut(id.index()).ok_or(PipeError::UnknownNode(id))
    }

    /// Install the computation a node runs for every envelope.
    pub fn set_stage(&mut self, id: NodeId, stage: impl Into<AnyStage>) -> PipeResult<()> {
        self.slot_mut(id)?.stage = Some(stage.into());
        Ok(())
    }

    /// Capacity of the buffer on the node's inbound edge.
    pub fn set_capacity(&mut self, id: NodeId, capacity: usize) -> PipeResult<()> {
        let slot = self.slot_mut(id)?;
        if capacity == 0 {
            return Err(PipeError::InvalidCapacity {
                what: format!("inbound buffer of '{}'", slot.name),
                capacity,
            });
        }
        if slot.kind.is_source() {
            return Err(PipeError::InvalidEdge(format!(
                "source '{}' has no inbound buffer",
                slot.name
            )));
        }
        slot.capacity = Some(capacity);
        Ok(())
    }

    // --- Queries ---

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_ref() == name)
            .map(NodeId::from_index)
    }

    /// Like [`find`](Self::find), but an unknown name is an error.
    pub fn node_id(&self, name: &str) -> PipeResult<NodeId> {
        self.find(name)
            .ok_or_else(|| PipeError::UnknownNodeName(name.to_string()))
    }

    pub fn name_of(&self, id: NodeId) -> PipeResult<&str> {
        Ok(&self.slot(id)?.name)
    }

    pub fn kind(&self, id: NodeId) -> PipeResult<&NodeKind> {
        Ok(&self.slot(id)?.kind)
    }

    pub fn depth(&self, id: NodeId) -> PipeResult<u32> {
        Ok(self.slot(id)?.depth)
    }

    pub fn predecessor(&self, id: NodeId) -> PipeResult<Option<NodeId>> {
        Ok(self.slot(id)?.predecessor)
    }

    pub fn successors(&self, id: NodeId) -> PipeResult<&[NodeId]> {
        Ok(&self.slot(id)?.successors)
    }

    /// Effective capacity of the node's inbound buffer.
    pub fn capacity(&self, id: NodeId) -> PipeResult<Option<usize>> {
        let slot = self.slot(id)?;
        Ok(slot.kind.inbound().map(|kind| {
            slot.capacity.unwrap_or(match kind {
                BranchKind::Push => self.queue_capacity,
                BranchKind::Sample => self.slot_capacity,
            })
        }))
    }

    // --- Wiring ---

    /// Make `child` the successor of `parent`.
    ///
    /// A point-to-point parent that already has a successor replaces it; the
    /// displaced subtree becomes detached. A fanout parent gains a branch.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> PipeResult<()> {
        let parent_slot = self.slot(parent)?;
        let child_slot = self.slot(child)?;

        if parent == child {
            return Err(PipeError::InvalidEdge(format!(
                "cannot attach '{}' to itself",
                child_slot.name
            )));
        }
        if child_slot.kind.is_source() {
            return Err(PipeError::InvalidEdge(format!(
                "source '{}' cannot have a predecessor",
                child_slot.name
            )));
        }
        if let Some(existing) = child_slot.predecessor {
            return Err(PipeError::AlreadyAttached {
                child: child_slot.name.to_string(),
                parent: self.nodes[existing.index()].name.to_string(),
            });
        }
        if self.is_ancestor(child, parent) {
            return Err(PipeError::CycleDetected {
                parent: parent_slot.name.to_string(),
                child: child_slot.name.to_string(),
            });
        }

        if parent_slot.kind.is_point_to_point() {
            let displaced = self.nodes[parent.index()].successors.pop();
            if let Some(old) = displaced {
                tracing::debug!(
                    "'{}' replaces '{}' as successor of '{}'",
                    self.nodes[child.index()].name,
                    self.nodes[old.index()].name,
                    self.nodes[parent.index()].name
                );
                self.nodes[old.index()].predecessor = None;
                self.propagate_depth(old, 0);
            }
        }

        self.nodes[parent.index()].successors.push(child);
        self.nodes[child.index()].predecessor = Some(parent);
        let depth = self.nodes[parent.index()].depth + 1;
        self.propagate_depth(child, depth);
        Ok(())
    }

    /// Add `child` as a branch of the fanout `fanout`. Returns how the branch
    /// receives envelopes, derived from the child's kind.
    pub fn branch(&mut self, fanout: NodeId, child: NodeId) -> PipeResult<BranchKind> {
        let parent_slot = self.slot(fanout)?;
        if !matches!(parent_slot.kind, NodeKind::Fanout) {
            return Err(PipeError::NotAFanout(parent_slot.name.to_string()));
        }
        self.attach(fanout, child)?;
        let child_slot = self.slot(child)?;
        child_slot.kind.inbound().ok_or_else(|| {
            PipeError::InvalidEdge(format!("'{}' cannot be a branch", child_slot.name))
        })
    }

    /// Build a chain `first -> ... -> last`, returning the last node.
    pub fn chain(&mut self, nodes: &[NodeId]) -> PipeResult<Option<NodeId>> {
        for pair in nodes.windows(2) {
            self.attach(pair[0], pair[1])?;
        }
        Ok(nodes.last().copied())
    }

    /// Whether `ancestor` lies on the predecessor path of `node` (or is `node`).
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.index()].predecessor;
        }
        false
    }

    fn propagate_depth(&mut self, root: NodeId, depth: u32) {
        let mut stack = vec![(root, depth)];
        while let Some((id, depth)) = stack.pop() {
            let slot = &mut self.nodes[id.index()];
            slot.depth = depth;
            stack.extend(slot.successors.iter().map(|&s| (s, depth + 1)));
        }
    }

    // --- Validation ---

    /// Exactly one source, and every node reachable from it.
    pub fn validate(&self) -> PipeResult<NodeId> {
        let source = self.source.ok_or(PipeError::NoSource)?;
        let mut reached = vec![false; self.nodes.len()];
        for id in self.preorder(source) {
            reached[id.index()] = true;
        }
        if let Some(index) = reached.iter().position(|r| !r) {
            return Err(PipeError::Detached(self.nodes[index].name.to_string()));
        }
        for slot in &self.nodes {
            if matches!(slot.kind, NodeKind::Fanout) && slot.successors.is_empty() {
                tracing::warn!("Fanout '{}' has no branches", slot.name);
            }
        }
        Ok(source)
    }

    /// Depth-first order starting at `root`, parents before children.
    pub(crate) fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.index()].successors.iter().rev().copied());
        }
        order
    }

    /// Depth-first order starting at `root`, children before parents.
    pub(crate) fn postorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            stack.extend(
                self.nodes[id.index()]
                    .successors
                    .iter()
                    .rev()
                    .map(|&s| (s, false)),
            );
        }
        order
    }

    // --- Diagnostics ---

    /// Indented text tree of the graph. `->` marks a point-to-point successor,
    /// `=>` a fanout branch. Detached subtrees are listed after the source.
    pub fn render(&self) -> String {
        let mut out = format!("graph '{}'\n", self.name);
        let roots = self
            .source
            .into_iter()
            .chain(
                (0..self.nodes.len())
                    .map(NodeId::from_index)
                    .filter(|&id| {
                        Some(id) != self.source && self.nodes[id.index()].predecessor.is_none()
                    }),
            )
            .collect::<Vec<_>>();

        for root in roots {
            for id in self.preorder(root) {
                let slot = &self.nodes[id.index()];
                let indent = "  ".repeat(slot.depth as usize);
                let glyph = match slot.predecessor {
                    Some(p) if matches!(self.nodes[p.index()].kind, NodeKind::Fanout) => "=> ",
                    Some(_) => "-> ",
                    None => "",
                };
                let _ = write!(out, "{}{}{} [{}]", indent, glyph, slot.name, slot.kind.label());
                if let Some(stage) = &slot.stage {
                    let _ = write!(out, " <{}>", stage.name());
                }
                if slot.predecessor.is_none() && !slot.kind.is_source() {
                    out.push_str(" (detached)");
                }
                out.push('\n');
            }
        }
        out
    }

    pub fn topology(&self) -> TopologySnapshot {
        TopologySnapshot {
            name: self.name.clone(),
            nodes: self
                .nodes
                .iter()
                .enumerate()
                .map(|(index, slot)| NodeSnapshot {
                    id: NodeId::from_index(index),
                    name: slot.name.to_string(),
                    kind: slot.kind.label(),
                    depth: slot.depth,
                    predecessor: slot.predecessor,
                    successors: slot.successors.clone(),
                    inbound: slot.kind.inbound(),
                    stage: slot.stage.as_ref().map(|s| s.name().to_string()),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("source", &self.source)
            .finish()
    }
}
