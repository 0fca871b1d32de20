//! Tick Scheduling
//!
//! Fixed-interval accumulator. Elapsed wall-clock time is added to a running
//! total; once the total exceeds the interval exactly one tick fires and the
//! interval is subtracted. Whole extra intervals are discarded, never
//! caught up.

use std::time::{Duration, Instant};

use tracing::debug;

/// Real-time accumulator, independent of any clock.
#[derive(Debug, Clone)]
pub struct TickAccumulator {
    interval: Duration,
    accumulated: Duration,
}

impl TickAccumulator {
    /// New accumulator. A zero interval is bumped to one millisecond.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            accumulated: Duration::ZERO,
        }
    }

    /// Time carried toward the next tick.
    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    /// Add elapsed time. Returns `true` when a tick is due.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        self.accumulated += elapsed;
        if self.accumulated <= self.interval {
            return false;
        }
        self.accumulated -= self.interval;
        if self.accumulated > self.interval {
            let skipped = self.accumulated.as_nanos() / self.interval.as_nanos();
            debug!("Scheduler behind, skipping {} intervals", skipped);
            let nanos = self.accumulated.as_nanos() % self.interval.as_nanos();
            self.accumulated = Duration::from_nanos(nanos as u64);
        }
        true
    }
}

/// Accumulator driven by `Instant`s.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    accumulator: TickAccumulator,
    last: Instant,
}

impl TickScheduler {
    /// Start measuring from `now`.
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            accumulator: TickAccumulator::new(interval),
            last: now,
        }
    }

    /// Account for time up to `now`. Returns `true` when a tick is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        self.accumulator.advance(elapsed)
    }
}
