//! Linear value interpolation records for smoothing sparse updates.
//!
//! The view model keeps one record per device slot that is mid-transition and
//! drives them from a shared frame loop. Records are pure data; all timing
//! uses `tokio::time::Instant` so the loop is testable under a paused clock.

use std::time::Duration;

use tokio::time::Instant;

/// Default transition duration for a smoothed value change.
pub const DEFAULT_DURATION: Duration = Duration::from_millis(200);

/// Differences at or below this threshold are applied immediately instead of
/// being animated.
pub const MIN_DELTA: f64 = 0.01;

/// An in-flight transition of one device slot toward a target value.
#[derive(Debug, Clone)]
pub struct Interpolation {
    pub index: usize,
    pub start_value: f64,
    pub target_value: f64,
    pub start: Instant,
    pub end: Instant,
}

impl Interpolation {
    pub fn new(index: usize, start_value: f64, target_value: f64, duration: Duration) -> Self {
        let start = Instant::now();
        Self {
            index,
            start_value,
            target_value,
            start,
            end: start + duration,
        }
    }

    /// Linearly interpolated value at `now`, snapping exactly to the target
    /// once the end instant is reached.
    pub fn sample(&self, now: Instant) -> f64 {
        if now >= self.end {
            return self.target_value;
        }
        let total = self.end.duration_since(self.start).as_secs_f64();
        if total <= 0.0 {
            return self.target_value;
        }
        let progress = (now.duration_since(self.start).as_secs_f64() / total).clamp(0.0, 1.0);
        self.start_value + (self.target_value - self.start_value) * progress
    }

    pub fn finished(&self, now: Instant) -> bool {
        now >= self.end
    }
}
