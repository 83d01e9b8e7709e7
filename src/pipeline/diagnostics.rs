//! Latency accounting over the stage traces carried by envelopes.
//!
//! A [`LatencyMonitor`] is a cheap, cloneable handle: the probe stage records
//! into it from its node thread while the graph owner reads reports from any
//! other thread.

use crate::error::{PipeError, PipeResult};
use crate::pipeline::envelope::Envelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
struct StageTotals {
    name: String,
    total: Duration,
    samples: u64,
}

/// Running latency statistics for one observation point.
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
    frames: u64,
    duplicates: u64,
    skipped: u64,
    total_latency: Duration,
    min_latency: Option<Duration>,
    max_latency: Duration,
    last_latency: Duration,
    last_sequence: Option<u64>,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
    stages: Vec<StageTotals>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one envelope into the statistics.
    pub fn record(&mut self, envelope: &Envelope) {
        self.record_at(envelope, Instant::now());
    }

    fn record_at(&mut self, envelope: &Envelope, now: Instant) {
        let seq = envelope.sequence_id();
        match self.last_sequence {
            Some(last) if seq == last => self.duplicates += 1,
            Some(last) if seq > last + 1 => self.skipped += seq - last - 1,
            _ => {}
        }
        self.last_sequence = Some(self.last_sequence.map_or(seq, |last| last.max(seq)));

        let latency = envelope.latency();
        self.frames += 1;
        self.total_latency += latency;
        self.last_latency = latency;
        self.max_latency = self.max_latency.max(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |min| min.min(latency)));
        self.first_at.get_or_insert(now);
        self.last_at = Some(now);

        for (name, duration) in envelope.stage_breakdown() {
            match self.stages.iter_mut().find(|s| s.name == name) {
                Some(totals) => {
                    totals.total += duration;
                    totals.samples += 1;
                }
                None => self.stages.push(StageTotals {
                    name: name.to_string(),
                    total: duration,
                    samples: 1,
                }),
            }
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Envelopes seen again with the same id (sampling re-reads).
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Ids that never reached this point (overwritten in a latest-value slot).
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn mean_latency(&self) -> Duration {
        mean(self.total_latency, self.frames)
    }

    pub fn min_latency(&self) -> Duration {
        self.min_latency.unwrap_or_default()
    }

    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    pub fn last_latency(&self) -> Duration {
        self.last_latency
    }

    /// Observed frame rate between the first and the latest record.
    pub fn rate_fps(&self) -> f64 {
        match (self.first_at, self.last_at) {
            (Some(first), Some(last)) if self.frames > 1 => {
                let span = last.duration_since(first).as_secs_f64();
                if span > 0.0 {
                    (self.frames - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Mean time spent in each stage, in first-seen order.
    pub fn stage_means(&self) -> Vec<(String, Duration)> {
        self.stages
            .iter()
            .map(|s| (s.name.clone(), mean(s.total, s.samples)))
            .collect()
    }
}

/// `total / count` without narrowing the count. Zero for no samples.
fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Mean time of one stage inside a [`LatencyReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLatency {
    pub stage: String,
    pub mean_ms: f64,
    pub samples: u64,
}

/// Serializable snapshot of a [`LatencyStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    pub probe: String,
    pub captured_at: DateTime<Utc>,
    pub frames: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub rate_fps: f64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub last_ms: f64,
    pub stages: Vec<StageLatency>,
}

impl LatencyReport {
    pub fn from_stats(probe: impl Into<String>, stats: &LatencyStats) -> Self {
        Self {
            probe: probe.into(),
            captured_at: Utc::now(),
            frames: stats.frames,
            duplicates: stats.duplicates,
            skipped: stats.skipped,
            rate_fps: stats.rate_fps(),
            min_ms: ms(stats.min_latency()),
            mean_ms: ms(stats.mean_latency()),
            max_ms: ms(stats.max_latency),
            last_ms: ms(stats.last_latency),
            stages: stats
                .stages
                .iter()
                .map(|s| StageLatency {
                    stage: s.name.clone(),
                    mean_ms: ms(mean(s.total, s.samples)),
                    samples: s.samples,
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> PipeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipeError::Serialization(e.to_string()))
    }
}

impl std::fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} frames @ {:.1} fps, latency min/mean/max {:.2}/{:.2}/{:.2} ms",
            self.probe, self.frames, self.rate_fps, self.min_ms, self.mean_ms, self.max_ms
        )?;
        if self.duplicates > 0 || self.skipped > 0 {
            write!(f, " ({} repeated, {} skipped)", self.duplicates, self.skipped)?;
        }
        for stage in &self.stages {
            write!(f, " | {} {:.2} ms", stage.stage, stage.mean_ms)?;
        }
        Ok(())
    }
}

/// Shared handle onto the statistics of one probe.
#[derive(Debug, Clone)]
pub struct LatencyMonitor {
    name: Arc<str>,
    stats: Arc<Mutex<LatencyStats>>,
}

impl LatencyMonitor {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            stats: Arc::new(Mutex::new(LatencyStats::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, envelope: &Envelope) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(envelope);
    }

    pub fn stats(&self) -> LatencyStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn report(&self) -> LatencyReport {
        LatencyReport::from_stats(self.name.as_ref(), &self.stats())
    }
}
