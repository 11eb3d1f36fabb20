//! Fixed-Point Money and Multipliers
//!
//! Stakes, payouts and multipliers are integers so settlement never drifts.
//!
//! ## Formats
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Cents       u64   1 unit = 0.01 of the stake currency      │
//! │  Multiplier  u32   1 unit = 0.01x   (100 = 1.00x)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  payout = round_half_up(cents * hundredths / 100)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Floats only appear at the edges: parsing a client amount, evaluating
//! the growth curve, and rendering JSON numbers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hundredths per whole unit.
pub const HUNDREDTHS: u64 = 100;

/// Largest stake accepted from the wire before any configured limit (10^12 units).
pub const MAX_REPRESENTABLE_CENTS: u64 = 100_000_000_000_000;

// =============================================================================
// CENTS
// =============================================================================

/// Why a client amount has no [`Cents`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// NaN, infinite, zero or negative.
    #[error("amount is not a positive finite number")]
    NotPositive,

    /// Positive but rounds to zero cents.
    #[error("amount below 0.01")]
    BelowMinimum,

    /// Beyond [`MAX_REPRESENTABLE_CENTS`].
    #[error("amount too large to represent")]
    TooLarge,
}

/// A monetary amount in hundredths of a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cents(pub u64);

impl Cents {
    /// Zero.
    pub const ZERO: Cents = Cents(0);

    /// Convert a client-supplied amount, rounding to two decimals.
    pub fn from_amount(amount: f64) -> Result<Self, AmountError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AmountError::NotPositive);
        }
        let scaled = (amount * HUNDREDTHS as f64).round();
        if scaled < 1.0 {
            return Err(AmountError::BelowMinimum);
        }
        if scaled > MAX_REPRESENTABLE_CENTS as f64 {
            return Err(AmountError::TooLarge);
        }
        Ok(Cents(scaled as u64))
    }

    /// Construct from whole units.
    pub const fn from_units(units: u64) -> Self {
        Cents(units * HUNDREDTHS)
    }

    /// Raw hundredths.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Value for display / JSON.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS as f64
    }

    /// Is this zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Saturating sum.
    pub fn saturating_add(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / HUNDREDTHS, self.0 % HUNDREDTHS)
    }
}

// =============================================================================
// MULTIPLIER
// =============================================================================

/// A payout multiplier in hundredths (`100` = 1.00x).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Multiplier(u32);

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl Multiplier {
    /// 1.00x
    pub const ONE: Multiplier = Multiplier(100);

    /// Largest representable multiplier.
    pub const MAX: Multiplier = Multiplier(u32::MAX);

    /// Construct from raw hundredths, clamped to at least 1.00x.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        if hundredths < Self::ONE.0 {
            Self::ONE
        } else {
            Multiplier(hundredths)
        }
    }

    /// Round a float to the nearest hundredth, floored at 1.00x.
    ///
    /// NaN maps to 1.00x, values past the range saturate at [`Multiplier::MAX`].
    pub fn from_f64_rounded(value: f64) -> Self {
        Self::from_scaled((value * HUNDREDTHS as f64).round())
    }

    /// Truncate a float down to a hundredth, floored at 1.00x.
    pub fn from_f64_floor(value: f64) -> Self {
        Self::from_scaled((value * HUNDREDTHS as f64).floor())
    }

    fn from_scaled(scaled: f64) -> Self {
        if scaled.is_nan() || scaled < Self::ONE.0 as f64 {
            Self::ONE
        } else if scaled >= u32::MAX as f64 {
            Self::MAX
        } else {
            Multiplier(scaled as u32)
        }
    }

    /// Raw hundredths.
    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// Value for display / JSON (exactly two decimals).
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS as f64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / HUNDREDTHS as u32, self.0 % HUNDREDTHS as u32)
    }
}

/// `amount × multiplier`, rounded half-up to the cent.
///
/// Computed in `u128` so no stake/multiplier pair can overflow.
pub fn payout(amount: Cents, multiplier: Multiplier) -> Cents {
    let product = amount.0 as u128 * multiplier.0 as u128;
    let rounded = (product + (HUNDREDTHS as u128 / 2)) / HUNDREDTHS as u128;
    Cents(rounded.min(u64::MAX as u128) as u64)
}

// =============================================================================
// TESTS
// =============================================================================
