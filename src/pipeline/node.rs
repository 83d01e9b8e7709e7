//! Node kinds and the stage computation contract.
//!
//! Two-layer design for stage computations:
//! - **`Stage` trait**: for pluggable user computations (capture, inference,
//!   encoding, ...), boxed as trait objects.
//! - **`BuiltinStage` enum**: for the stages shipped with the engine. The
//!   compiler can inline match arms, avoiding dynamic dispatch on the hot path.
//!
//! `AnyStage` wraps either variant so a node can hold both uniformly.
//!
//! The graph vertices themselves form a closed sum type, [`NodeKind`], whose
//! per-kind run loops live in the executor.

use crate::pipeline::clock::Clock;
use crate::pipeline::edge::BranchKind;
use crate::pipeline::envelope::Envelope;
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::{LatencyProbe, PassthroughStage, SimulatedWork};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Context handed to stage hooks. Identifies the node running the stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub node: NodeId,
    pub name: Arc<str>,
    pub depth: u32,
    pub clock: Clock,
}

/// Trait for pluggable stage computations.
///
/// `process` runs synchronously on the node's own thread for every
/// non-terminal envelope. It may read or replace the envelope payload but
/// cannot alter its sequence id or trace. Returning an error (or panicking)
/// stops the whole graph.
#[cfg_attr(test, mockall::automock)]
pub trait Stage: Send {
    /// Called on the node thread before the first envelope.
    fn on_start(&mut self, _ctx: &StageContext) {}

    /// Called for every non-terminal envelope.
    fn process(&mut self, envelope: &mut Envelope, ctx: &StageContext) -> anyhow::Result<()>;

    /// Called on the node thread after the terminal envelope was forwarded.
    fn on_stop(&mut self, _ctx: &StageContext) {}
}

/// Adapter turning a closure into a [`Stage`].
pub struct FnStage<F>(pub F);

impl<F> Stage for FnStage<F>
where
    F: FnMut(&mut Envelope) -> anyhow::Result<()> + Send,
{
    fn process(&mut self, envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        (self.0)(envelope)
    }
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    Passthrough(PassthroughStage),
    Simulated(SimulatedWork),
    LatencyProbe(LatencyProbe),
}

impl BuiltinStage {
    pub fn name(&self) -> &str {
        match self {
            BuiltinStage::Passthrough(s) => s.name(),
            BuiltinStage::Simulated(s) => s.name(),
            BuiltinStage::LatencyProbe(s) => s.name(),
        }
    }

    pub fn on_start(&mut self, ctx: &StageContext) {
        match self {
            BuiltinStage::Passthrough(s) => s.on_start(ctx),
            BuiltinStage::Simulated(s) => s.on_start(ctx),
            BuiltinStage::LatencyProbe(s) => s.on_start(ctx),
        }
    }

    pub fn process(&mut self, envelope: &mut Envelope, ctx: &StageContext) -> anyhow::Result<()> {
        match self {
            BuiltinStage::Passthrough(s) => s.process(envelope, ctx),
            BuiltinStage::Simulated(s) => s.process(envelope, ctx),
            BuiltinStage::LatencyProbe(s) => s.process(envelope, ctx),
        }
    }

    pub fn on_stop(&mut self, ctx: &StageContext) {
        match self {
            BuiltinStage::Passthrough(s) => s.on_stop(ctx),
            BuiltinStage::Simulated(s) => s.on_stop(ctx),
            BuiltinStage::LatencyProbe(s) => s.on_stop(ctx),
        }
    }
}

/// Wrapper that holds either a built-in stage (enum dispatch) or a plugin (trait object).
pub enum AnyStage {
    Builtin(BuiltinStage),
    Plugin(Box<dyn Stage>),
}

impl AnyStage {
    pub fn plugin(stage: impl Stage + 'static) -> Self {
        AnyStage::Plugin(Box::new(stage))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut(&mut Envelope) -> anyhow::Result<()> + Send + 'static,
    {
        AnyStage::Plugin(Box::new(FnStage(f)))
    }

    pub fn name(&self) -> &str {
        match self {
            AnyStage::Builtin(s) => s.name(),
            AnyStage::Plugin(_) => "Plugin",
        }
    }

    pub fn on_start(&mut self, ctx: &StageContext) {
        match self {
            AnyStage::Builtin(s) => s.on_start(ctx),
            AnyStage::Plugin(s) => s.on_start(ctx),
        }
    }

    pub fn process(&mut self, envelope: &mut Envelope, ctx: &StageContext) -> anyhow::Result<()> {
        match self {
            AnyStage::Builtin(s) => s.process(envelope, ctx),
            AnyStage::Plugin(s) => s.process(envelope, ctx),
        }
    }

    pub fn on_stop(&mut self, ctx: &StageContext) {
        match self {
            AnyStage::Builtin(s) => s.on_stop(ctx),
            AnyStage::Plugin(s) => s.on_stop(ctx),
        }
    }
}

impl From<BuiltinStage> for AnyStage {
    fn from(stage: BuiltinStage) -> Self {
        AnyStage::Builtin(stage)
    }
}

impl From<PassthroughStage> for AnyStage {
    fn from(stage: PassthroughStage) -> Self {
        AnyStage::Builtin(BuiltinStage::Passthrough(stage))
    }
}

impl From<SimulatedWork> for AnyStage {
    fn from(stage: SimulatedWork) -> Self {
        AnyStage::Builtin(BuiltinStage::Simulated(stage))
    }
}

impl From<LatencyProbe> for AnyStage {
    fn from(stage: LatencyProbe) -> Self {
        AnyStage::Builtin(BuiltinStage::LatencyProbe(stage))
    }
}

/// Pacing and bounds for the graph's source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Target frames per second. `<= 0` means unthrottled.
    pub fps: f64,
    /// Emit the terminal envelope on its own after this many frames.
    #[serde(default)]
    pub limit: Option<u64>,
}

impl SourceSettings {
    pub fn unthrottled() -> Self {
        Self {
            fps: 0.0,
            limit: None,
        }
    }

    pub fn fps(fps: f64) -> Self {
        Self { fps, limit: None }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self::unthrottled()
    }
}

/// The closed set of graph vertex kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Graph root; originates envelopes at its own pace.
    Source(SourceSettings),
    /// Point-to-point push stage fed by a FIFO.
    Relay,
    /// Point-to-point pull stage polling a latest-value slot once per period.
    Sampler { period: Duration },
    /// Broadcast to any number of branches.
    Fanout,
}

impl NodeKind {
    /// How this node receives envelopes from its predecessor, if it has one.
    pub fn inbound(&self) -> Option<BranchKind> {
        match self {
            NodeKind::Source(_) => None,
            NodeKind::Relay | NodeKind::Fanout => Some(BranchKind::Push),
            NodeKind::Sampler { .. } => Some(BranchKind::Sample),
        }
    }

    /// Point-to-point nodes have at most one successor.
    pub fn is_point_to_point(&self) -> bool {
        !matches!(self, NodeKind::Fanout)
    }

    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Source(_))
    }

    pub fn label(&self) -> String {
        match self {
            NodeKind::Source(settings) if settings.fps > 0.0 => {
                format!("source {} fps", settings.fps)
            }
            NodeKind::Source(_) => "source".to_string(),
            NodeKind::Relay => "relay".to_string(),
            NodeKind::Sampler { period } => format!("sampler {} ms", period.as_millis()),
            NodeKind::Fanout => "fanout".to_string(),
        }
    }
}
