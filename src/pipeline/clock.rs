//! Monotonic time base and rate pacing.
//!
//! Every node of a graph shares one [`Clock`], so the microsecond timestamps in
//! stage traces recorded on different threads are directly comparable.
//!
//! [`Pacer`] holds a stage to a target cadence. Each cycle sleeps the residual
//! of its period (`period - elapsed`, clamped at zero). There is no catch-up:
//! a cycle that overruns its period is simply followed by the next cycle
//! without compensation.

use std::time::{Duration, Instant};

/// Residual waits longer than this are slept (minus the spin window).
const SLEEP_THRESHOLD: Duration = Duration::from_millis(2);
/// Final stretch of each wait that is spun for sub-millisecond accuracy.
const SPIN_WINDOW: Duration = Duration::from_millis(1);

/// Shared monotonic epoch for one graph.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds elapsed since the epoch.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Convert an instant into a timestamp on this clock.
    pub fn timestamp_of(&self, instant: Instant) -> u64 {
        instant
            .checked_duration_since(self.epoch)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stage cadence controller.
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Option<Duration>,
    overruns: u64,
}

impl Pacer {
    /// A pacer targeting `fps` cycles per second. `fps <= 0` (or non-finite)
    /// means unthrottled.
    pub fn from_fps(fps: f64) -> Self {
        let period = if fps.is_finite() && fps > 0.0 {
            Some(Duration::from_micros((1e6 / fps) as u64))
        } else {
            None
        };
        Self {
            period,
            overruns: 0,
        }
    }

    /// A pacer with an explicit period. A zero period means unthrottled.
    pub fn from_period(period: Duration) -> Self {
        Self {
            period: (!period.is_zero()).then_some(period),
            overruns: 0,
        }
    }

    pub fn unthrottled() -> Self {
        Self {
            period: None,
            overruns: 0,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Number of cycles whose work took longer than the period.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Residual of the period for a cycle that started at `cycle_start`.
    pub fn residual(&self, cycle_start: Instant) -> Duration {
        match self.period {
            Some(period) => period.saturating_sub(cycle_start.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep out the rest of the cycle that started at `cycle_start`.
    pub fn pace(&mut self, cycle_start: Instant) {
        let Some(period) = self.period else {
            return;
        };

        let elapsed = cycle_start.elapsed();
        if elapsed >= period {
            self.overruns += 1;
            return;
        }

        let remaining = period - elapsed;
        // Sleep for larger waits, spin the tail for accuracy
        if remaining > SLEEP_THRESHOLD {
            std::thread::sleep(remaining - SPIN_WINDOW);
        }
        while cycle_start.elapsed() < period {
            std::hint::spin_loop();
        }
    }
}
