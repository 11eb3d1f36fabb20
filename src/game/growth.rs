//! Multiplier Growth Curve
//!
//! `m(t) = floor_to_hundredths(e^(rate * t))` with `t` in seconds since the
//! round started running. The same elapsed time always yields the same
//! multiplier, so ticks and cashouts are ordered by value, not by clock.

use std::time::Duration;

use crate::core::money::Multiplier;

/// Default growth rate per second (2.00x after ~27.7 s).
pub const DEFAULT_GROWTH_RATE: f64 = 0.025;

/// Exponential growth curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthCurve {
    rate_per_sec: f64,
}

impl Default for GrowthCurve {
    fn default() -> Self {
        Self::new(DEFAULT_GROWTH_RATE)
    }
}

impl GrowthCurve {
    /// Curve with the given exponential rate (per second, must be > 0).
    pub fn new(rate_per_sec: f64) -> Self {
        Self { rate_per_sec }
    }

    /// Rate per second.
    pub fn rate(&self) -> f64 {
        self.rate_per_sec
    }

    /// Multiplier after `elapsed` of running.
    ///
    /// Evaluated on whole milliseconds; non-decreasing in `elapsed`.
    pub fn multiplier_at(&self, elapsed: Duration) -> Multiplier {
        let secs = elapsed.as_millis() as f64 / 1000.0;
        Multiplier::from_f64_floor((self.rate_per_sec * secs).exp())
    }

    /// Time at which the curve first reaches `target`.
    ///
    /// Useful for sizing tests and for logging the expected flight time.
    pub fn time_to_reach(&self, target: Multiplier) -> Duration {
        let secs = target.as_f64().ln() / self.rate_per_sec;
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}
