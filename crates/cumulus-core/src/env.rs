//! Environment abstraction for deterministic testing.
//!
//! Decouples liveness logic from system resources (time, randomness). Tests
//! run against a virtual clock and a seeded RNG; production uses the real
//! monotonic clock and OS entropy.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `tokio::time::Instant`, while simulation
    /// environments use a virtual instant.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for connection IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a uniformly distributed index in `[0, bound)`.
    ///
    /// Rejection sampling keeps the distribution free of modulo bias. Returns
    /// 0 when `bound` is 0.
    fn random_index(&self, bound: usize) -> usize {
        if bound <= 1 {
            return 0;
        }

        let bound = bound as u64;
        // Largest multiple of `bound` that fits; values at or above it would
        // skew the low indices.
        let zone = u64::MAX - (u64::MAX % bound);

        loop {
            let value = self.random_u64();
            if value < zone {
                return (value % bound) as usize;
            }
        }
    }
}
