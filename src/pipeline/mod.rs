//! Thread-per-node streaming graph.
//!
//! Envelopes flow from one rate-paced source through a tree of stages. Every
//! node runs on its own OS thread; every edge owns one buffer.
//!
//! # Architecture
//!
//! ```text
//! [Source] ─FIFO─► [Relay] ─FIFO─► [Fanout] ═slot═► [Sampler] ─FIFO─► [Relay]
//!                                           ╚FIFO═► [Relay]
//! ```
//!
//! # Design
//!
//! - **Arena graph**: nodes addressed by `NodeId`, wired with `attach` / `branch`.
//! - **Two buffer disciplines**: lossless `BlockingQueue` for push edges,
//!   lossy `LatestValueSlot` for sampling edges. Chosen per edge from the kind
//!   of the node it feeds.
//! - **Enum dispatch on hot path**: `BuiltinStage` enum for the built-in
//!   stages, `Box<dyn Stage>` for plugins.
//! - **Terminal-envelope shutdown**: no timeouts; a poison pill walks the tree.
//! - **Stage traces**: every node stamps enter/exit times on each envelope.

pub mod active;
pub mod bridge;
pub mod clock;
pub mod diagnostics;
pub mod edge;
pub mod envelope;
pub mod executor;
pub mod fifo;
pub mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod slot;

pub use active::{ActiveThread, NodeState, NodeStatus};
pub use bridge::{EngineEvent, EngineEvents, EventBridge};
pub use clock::{Clock, Pacer};
pub use diagnostics::{LatencyMonitor, LatencyReport, LatencyStats, StageLatency};
pub use edge::BranchKind;
pub use envelope::{Envelope, StageTrace};
pub use executor::{NodeReport, RunningGraph, StopReport};
pub use fifo::BlockingQueue;
pub use graph::{Graph, NodeSnapshot, TopologySnapshot};
pub use id::NodeId;
pub use node::{AnyStage, BuiltinStage, FnStage, NodeKind, SourceSettings, Stage, StageContext};
pub use nodes::{LatencyProbe, PassthroughStage, SimulatedWork};
pub use slot::LatestValueSlot;
