//! Crash Point Sampling
//!
//! `crash = round2(max(1, min(max_crash, (1 / (1 - r)) ^ alpha)))` for a
//! uniform draw `r` in `[0, 1)`. Smaller `alpha` concentrates rounds near
//! 1.00x and thins the tail.

use crate::core::money::Multiplier;
use crate::core::rng::RandomSource;

/// Default tail shape.
pub const DEFAULT_ALPHA: f64 = 0.6;

/// Default crash cap (100.00x).
pub const DEFAULT_MAX_CRASH: Multiplier = Multiplier::from_hundredths(10_000);

/// Samples capped crash points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrashSampler {
    alpha: f64,
    max_crash: Multiplier,
}

impl Default for CrashSampler {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            max_crash: DEFAULT_MAX_CRASH,
        }
    }
}

impl CrashSampler {
    /// Create a sampler. `alpha` must lie in `(0, 1]`; config validation
    /// enforces that before we get here.
    pub fn new(alpha: f64, max_crash: Multiplier) -> Self {
        Self { alpha, max_crash }
    }

    /// Tail shape.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Cap.
    pub fn max_crash(&self) -> Multiplier {
        self.max_crash
    }

    /// Draw a crash point.
    pub fn sample<R: RandomSource + ?Sized>(&self, rng: &mut R) -> Multiplier {
        self.from_draw(rng.next_unit())
    }

    /// Map a uniform draw to a crash point.
    ///
    /// Out-of-range draws are clamped into `[0, 1)`, and a draw at the
    /// top of the range lands on the cap instead of overflowing.
    pub fn from_draw(&self, r: f64) -> Multiplier {
        let r = if r.is_nan() { 0.0 } else { r.clamp(0.0, 1.0) };
        let raw = (1.0 / (1.0 - r)).powf(self.alpha);
        let capped = if raw.is_finite() {
            raw.min(self.max_crash.as_f64())
        } else {
            self.max_crash.as_f64()
        };
        Multiplier::from_f64_rounded(capped.max(1.0)).min(self.max_crash)
    }
}
