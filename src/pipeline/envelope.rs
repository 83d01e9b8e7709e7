//! The unit of flow through the pipeline.
//!
//! An [`Envelope`] is created once per source cycle and carries its sequence
//! id, the terminate flag, the ordered [`StageTrace`]s recorded by every node
//! it has passed through, and an optional frame payload for the stage
//! computations. When a fanout replicates an envelope, every branch receives a
//! clone: branches share the id and the trace prefix up to the fanout, then
//! diverge. The payload is reference counted and copied on write.

use crate::pipeline::clock::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Timestamps recorded by one stage for one envelope.
///
/// Mark 0 is the enter time and mark 1 the exit time, both in microseconds on
/// the graph [`Clock`]. A stage may record further intermediate marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTrace {
    stage_name: Arc<str>,
    sequence_id: u64,
    marks: Vec<u64>,
}

impl StageTrace {
    /// Start a trace, recording the enter mark now.
    pub fn begin(stage_name: Arc<str>, sequence_id: u64, clock: &Clock) -> Self {
        let mut trace = Self {
            stage_name,
            sequence_id,
            marks: Vec::with_capacity(2),
        };
        trace.record(clock);
        trace
    }

    /// Build a trace from already recorded marks.
    pub fn from_marks(stage_name: impl Into<Arc<str>>, sequence_id: u64, marks: Vec<u64>) -> Self {
        Self {
            stage_name: stage_name.into(),
            sequence_id,
            marks,
        }
    }

    /// Record the current time as the next mark.
    pub fn record(&mut self, clock: &Clock) {
        self.marks.push(clock.now_us());
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Number of marks recorded so far.
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Timestamp of mark `index`.
    ///
    /// # Panics
    ///
    /// Panics if the mark was never recorded. Reading an unrecorded mark is a
    /// programming error, not a runtime condition.
    pub fn mark_us(&self, index: usize) -> u64 {
        assert!(
            index < self.marks.len(),
            "stage '{}' did not record mark {} for envelope {} ({} marks recorded)",
            self.stage_name,
            index,
            self.sequence_id,
            self.marks.len()
        );
        self.marks[index]
    }

    pub fn enter_us(&self) -> u64 {
        self.mark_us(0)
    }

    pub fn exit_us(&self) -> u64 {
        self.mark_us(1)
    }

    /// Time between two marks.
    pub fn span(&self, from: usize, to: usize) -> Duration {
        let start = self.mark_us(from);
        let end = self.mark_us(to);
        Duration::from_micros(end.saturating_sub(start))
    }

    /// Time spent between enter and exit.
    pub fn duration(&self) -> Duration {
        self.span(0, 1)
    }
}

/// Per-cycle unit of data flowing through the graph.
#[derive(Debug, Clone)]
pub struct Envelope {
    sequence_id: u64,
    terminate: bool,
    trace: Vec<StageTrace>,
    payload: Option<Arc<Vec<u8>>>,
}

impl Envelope {
    /// A data envelope.
    pub fn new(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            terminate: false,
            trace: Vec::new(),
            payload: None,
        }
    }

    /// The terminal (poison pill) envelope.
    pub fn terminal(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            terminate: true,
            trace: Vec::new(),
            payload: None,
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn is_terminal(&self) -> bool {
        self.terminate
    }

    pub fn trace(&self) -> &[StageTrace] {
        &self.trace
    }

    /// Append a finished stage trace. Only nodes record traces.
    pub(crate) fn push_trace(&mut self, trace: StageTrace) {
        debug_assert_eq!(trace.sequence_id, self.sequence_id);
        self.trace.push(trace);
    }

    /// A terminal envelope carrying this envelope's id and trace so far.
    pub(crate) fn to_terminal(&self) -> Self {
        Self {
            sequence_id: self.sequence_id,
            terminate: true,
            trace: self.trace.clone(),
            payload: None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref().map(|p| p.as_slice())
    }

    pub fn set_payload(&mut self, bytes: Vec<u8>) {
        self.payload = Some(Arc::new(bytes));
    }

    /// Mutable access to the payload, copying it first if another branch
    /// still shares it.
    pub fn payload_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.payload.as_mut().map(Arc::make_mut)
    }

    pub fn take_payload(&mut self) -> Option<Arc<Vec<u8>>> {
        self.payload.take()
    }

    /// End-to-end latency: exit of the last stage minus enter of the first.
    /// Zero when nothing has been traced yet.
    pub fn latency(&self) -> Duration {
        match (self.trace.first(), self.trace.last()) {
            (Some(first), Some(last)) => {
                Duration::from_micros(last.exit_us().saturating_sub(first.enter_us()))
            }
            _ => Duration::ZERO,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency().as_secs_f64() * 1000.0
    }

    /// Time spent inside each stage, in trace order.
    pub fn stage_breakdown(&self) -> Vec<(&str, Duration)> {
        self.trace
            .iter()
            .map(|t| (t.stage_name(), t.duration()))
            .collect()
    }

    /// Multi-line rendering of the trace, one stage per line.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "envelope {}{}: latency {:.3} ms",
            self.sequence_id,
            if self.terminate { " (terminal)" } else { "" },
            self.latency_ms()
        );
        for t in &self.trace {
            out.push_str(&format!(
                "\n  {:<20} enter {:>10} us  exit {:>10} us  ({:.3} ms)",
                t.stage_name(),
                t.enter_us(),
                t.exit_us(),
                t.duration().as_secs_f64() * 1000.0
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traced(name: &str, seq: u64, enter: u64, exit: u64) -> StageTrace {
        StageTrace::from_marks(name, seq, vec![enter, exit])
    }

    #[test]
    fn test_latency_spans_first_enter_to_last_exit() {
        let mut env = Envelope::new(3);
        env.push_trace(traced("cap", 3, 1_000, 21_000));
        env.push_trace(traced("preproc", 3, 21_500, 41_000));
        env.push_trace(traced("detect", 3, 41_200, 61_000));

        assert_eq!(env.latency(), Duration::from_millis(60));
        assert!((env.latency_ms() - 60.0).abs() < 1e-9);

        let breakdown = env.stage_breakdown();
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown[0], ("cap", Duration::from_millis(20)));
        assert_eq!(breakdown[1].0, "preproc");
    }

    #[test]
    fn test_empty_trace_has_zero_latency() {
        assert_eq!(Envelope::new(0).latency(), Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "did not record mark 1")]
    fn test_unrecorded_mark_panics() {
        let trace = StageTrace::from_marks("cap", 0, vec![10]);
        let _ = trace.exit_us();
    }

    #[test]
    fn test_intermediate_marks() {
        let trace = StageTrace::from_marks("venc", 1, vec![0, 500, 2_000]);
        assert_eq!(trace.span(0, 2), Duration::from_micros(2_000));
        assert_eq!(trace.span(1, 2), Duration::from_micros(1_500));
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn test_begin_records_enter() {
        let clock = Clock::new();
        let mut trace = StageTrace::begin(Arc::from("relay"), 9, &clock);
        assert_eq!(trace.len(), 1);
        trace.record(&clock);
        assert!(trace.exit_us() >= trace.enter_us());
        assert_eq!(trace.sequence_id(), 9);
    }

    #[test]
    fn test_fanout_clones_share_prefix_then_diverge() {
        let mut env = Envelope::new(5);
        env.push_trace(traced("src", 5, 0, 10));

        let mut a = env.clone();
        let mut b = env.clone();
        a.push_trace(traced("branch_a", 5, 20, 30));
        b.push_trace(traced("branch_b", 5, 20, 50));

        assert_eq!(a.trace()[0], b.trace()[0]);
        assert_eq!(a.trace()[1].stage_name(), "branch_a");
        assert_eq!(b.trace()[1].stage_name(), "branch_b");
        assert_eq!(a.sequence_id(), b.sequence_id());
    }

    #[test]
    fn test_payload_copy_on_write() {
        let mut env = Envelope::new(0);
        env.set_payload(vec![1, 2, 3]);
        let shared = env.clone();

        env.payload_mut().unwrap()[0] = 9;
        assert_eq!(env.payload(), Some(&[9, 2, 3][..]));
        assert_eq!(shared.payload(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn test_to_terminal_keeps_identity() {
        let mut env = Envelope::new(4);
        env.set_payload(vec![0; 16]);
        env.push_trace(traced("src", 4, 0, 1));
        let term = env.to_terminal();
        assert!(term.is_terminal());
        assert_eq!(term.sequence_id(), 4);
        assert_eq!(term.trace().len(), 1);
        assert!(term.payload().is_none());
    }

    #[test]
    fn test_describe_lists_stages() {
        let mut env = Envelope::new(1);
        env.push_trace(traced("cap", 1, 0, 1_000));
        let text = env.describe();
        assert!(text.starts_with("envelope 1: latency 1.000 ms"));
        assert!(text.contains("cap"));
    }

    #[test]
    fn test_trace_serializes_with_stage_name() {
        let trace = traced("detect", 4, 100, 2_100);
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains("\"detect\""));

        let parsed: StageTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, trace);
        assert_eq!(parsed.stage_name(), "detect");
        assert_eq!(parsed.duration(), Duration::from_millis(2));
    }
}
