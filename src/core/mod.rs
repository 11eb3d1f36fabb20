//! Core deterministic primitives.
//!
//! Fixed-point money and a seeded PRNG. Nothing here touches the clock.

pub mod money;
pub mod rng;

// Re-export core types
pub use money::{payout, AmountError, Cents, Multiplier};
pub use rng::{DeterministicRng, RandomSource};
