//! PassthroughStage: forwards envelopes untouched.
//!
//! Useful as a placeholder while wiring a topology, and as the stage of
//! relays whose only job is to add a hop (and a trace) to the chain.

use crate::pipeline::envelope::Envelope;
use crate::pipeline::node::StageContext;

#[derive(Debug, Default)]
pub struct PassthroughStage;

impl PassthroughStage {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "Passthrough"
    }

    pub fn on_start(&mut self, _ctx: &StageContext) {}

    pub fn process(&mut self, _envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        Ok(())
    }

    pub fn on_stop(&mut self, _ctx: &StageContext) {}
}
