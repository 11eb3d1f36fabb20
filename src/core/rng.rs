//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded per round, so any round's crash draw can be
//! re-derived offline from the server seed and the round id.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source of uniform draws in `[0, 1)`.
///
/// The crash sampler only ever sees this trait, which lets tests inject
/// exact draws.
pub trait RandomSource {
    /// Next uniform value in `[0, 1)`.
    fn next_unit(&mut self) -> f64;
}

/// Deterministic PRNG using Xorshift128+.
///
/// # Example
///
/// ```
/// use crash_round::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(7);
/// let mut b = DeterministicRng::new(7);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// SplitMix64 spreads weak seeds over the whole state.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // All-zero state is a fixed point of xorshift
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// RNG for one round, seeded from the server seed and the round id.
    pub fn for_round(server_seed: &[u8; 32], round_id: u64) -> Self {
        Self::new(derive_round_seed(server_seed, round_id))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: [u64; 2]) {
        self.state = state;
    }
}

impl RandomSource for DeterministicRng {
    /// Top 53 bits scaled into `[0, 1)`; never returns 1.0.
    #[inline]
    fn next_unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the seed for one round.
///
/// `SHA-256("CRASH_ROUND_SEED_V1" || server_seed || round_id_le)`, first
/// 8 bytes little-endian.
pub fn derive_round_seed(server_seed: &[u8; 32], round_id: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"CRASH_ROUND_SEED_V1");
    hasher.update(server_seed);
    hasher.update(round_id.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}

/// Fresh server seed from two v4 UUIDs.
pub fn random_server_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    seed[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    seed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_unit_range() {
        let mut rng = DeterministicRng::new(99);
        for _ in 0..10_000 {
            let u = rng.next_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_round_seed_depends_on_round() {
        let server_seed = [7u8; 32];
        assert_eq!(derive_round_seed(&server_seed, 1), derive_round_seed(&server_seed, 1));
        assert_ne!(derive_round_seed(&server_seed, 1), derive_round_seed(&server_seed, 2));
        assert_ne!(derive_round_seed(&server_seed, 1), derive_round_seed(&[8u8; 32], 1));
    }

    #[test]
    fn test_for_round_replays() {
        let server_seed = [3u8; 32];
        let mut a = DeterministicRng::for_round(&server_seed, 42);
        let mut b = DeterministicRng::for_round(&server_seed, 42);
        assert_eq!(a.next_unit(), b.next_unit());
    }

    #[test]
    fn test_state_checkpoint() {
        let mut rng = DeterministicRng::new(5555);
        for _ in 0..50 {
            rng.next_u64();
        }

        let saved_state = rng.state();
        let next_values: Vec<u64> = (0..10).map(|_| rng.next_u64()).collect();
        rng.set_state(saved_state);

        for expected in next_values {
            assert_eq!(rng.next_u64(), expected);
        }
    }

    #[test]
    fn test_random_server_seed_unique() {
        assert_ne!(random_server_seed(), random_server_seed());
    }
}
