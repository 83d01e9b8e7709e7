//! LatencyProbe: diagnostics sink for end-to-end latency.
//!
//! Records every envelope it sees into a [`LatencyMonitor`] and logs a
//! [`LatencyReport`](crate::pipeline::diagnostics::LatencyReport) every
//! `report_every` frames, plus a final one when the node stops. The latency
//! measured here covers every stage up to, but not including, the probe's own
//! node.

use crate::pipeline::diagnostics::LatencyMonitor;
use crate::pipeline::envelope::Envelope;
use crate::pipeline::node::StageContext;

pub struct LatencyProbe {
    monitor: LatencyMonitor,
    report_every: u64,
    seen: u64,
}

impl LatencyProbe {
    pub fn new(monitor: LatencyMonitor, report_every: u64) -> Self {
        Self {
            monitor,
            report_every,
            seen: 0,
        }
    }

    /// A probe with its own fresh monitor.
    pub fn named(name: &str, report_every: u64) -> Self {
        Self::new(LatencyMonitor::new(name), report_every)
    }

    pub fn monitor(&self) -> &LatencyMonitor {
        &self.monitor
    }

    pub fn name(&self) -> &str {
        "LatencyProbe"
    }

    pub fn on_start(&mut self, _ctx: &StageContext) {}

    pub fn process(&mut self, envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        self.monitor.record(envelope);
        self.seen += 1;

        tracing::trace!("{}", envelope.describe());
        if self.report_every > 0 && self.seen % self.report_every == 0 {
            tracing::info!("{}", self.monitor.report());
        }
        Ok(())
    }

    pub fn on_stop(&mut self, _ctx: &StageContext) {
        if self.seen > 0 {
            tracing::info!("final: {}", self.monitor.report());
        }
    }
}
