//! SimulatedWork: stand-in for real per-frame work.
//!
//! Sleeps a fixed duration per envelope, the way a capture, inference or
//! encoding step would occupy its thread. With `payload_bytes > 0` it also
//! fills an empty payload with a synthetic frame, so that it can act as the
//! capture stage of a source.

use crate::pipeline::envelope::Envelope;
use crate::pipeline::node::StageContext;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimulatedWork {
    work: Duration,
    payload_bytes: usize,
    frames: u64,
}

impl SimulatedWork {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            payload_bytes: 0,
            frames: 0,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Produce a synthetic frame of `bytes` bytes when the envelope has none.
    pub fn with_payload(mut self, bytes: usize) -> Self {
        self.payload_bytes = bytes;
        self
    }

    pub fn work(&self) -> Duration {
        self.work
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn name(&self) -> &str {
        "SimulatedWork"
    }

    pub fn on_start(&mut self, ctx: &StageContext) {
        tracing::debug!(
            "'{}' simulating {:?} of work per frame",
            ctx.name,
            self.work
        );
    }

    pub fn process(&mut self, envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        if self.payload_bytes > 0 && envelope.payload().is_none() {
            let fill = envelope.sequence_id() as u8;
            envelope.set_payload(vec![fill; self.payload_bytes]);
        }
        self.frames += 1;
        Ok(())
    }

    pub fn on_stop(&mut self, ctx: &StageContext) {
        tracing::debug!("'{}' simulated {} frames", ctx.name, self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::Clock;
    use crate::pipeline::id::NodeId;
    use std::sync::Arc;
    use std::time::Instant;

    fn ctx() -> StageContext {
        StageContext {
            node: NodeId(1),
            name: Arc::from("cap"),
            depth: 0,
            clock: Clock::new(),
        }
    }

    #[test]
    fn test_occupies_thread_for_work_duration() {
        let mut stage = SimulatedWork::from_millis(15);
        let start = Instant::now();
        stage.process(&mut Envelope::new(0), &ctx()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(stage.frames(), 1);
    }

    #[test]
    fn test_fills_missing_payload_only() {
        let mut stage = SimulatedWork::from_millis(0).with_payload(4);
        let mut fresh = Envelope::new(7);
        stage.process(&mut fresh, &ctx()).unwrap();
        assert_eq!(fresh.payload(), Some(&[7u8; 4][..]));

        let mut existing = Envelope::new(8);
        existing.set_payload(vec![1]);
        stage.process(&mut existing, &ctx()).unwrap();
        assert_eq!(existing.payload(), Some(&[1u8][..]));
    }
}
