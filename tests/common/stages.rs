//! Stages with observable or scripted behavior

use framepipe::pipeline::{Envelope, Stage, StageContext};
use std::sync::{Arc, Mutex};

/// Records the sequence id of every envelope it processes.
#[derive(Clone, Default)]
pub struct Recorder {
    ids: Arc<Mutex<Vec<u64>>>,
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.ids.lock().unwrap().clone()
    }

    /// Snapshots of the envelopes as they arrived, trace included.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

impl Stage for Recorder {
    fn process(&mut self, envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        self.ids.lock().unwrap().push(envelope.sequence_id());
        self.envelopes.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Fails (or panics) on the envelope with the given id.
pub struct FailAt {
    pub sequence_id: u64,
    pub panic: bool,
}

impl FailAt {
    pub fn error(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            panic: false,
        }
    }

    pub fn panic(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            panic: true,
        }
    }
}

impl Stage for FailAt {
    fn process(&mut self, envelope: &mut Envelope, _ctx: &StageContext) -> anyhow::Result<()> {
        if envelope.sequence_id() == self.sequence_id {
            if self.panic {
                panic!("decoder crashed on frame {}", self.sequence_id);
            }
            anyhow::bail!("corrupt frame {}", self.sequence_id);
        }
        Ok(())
    }
}
