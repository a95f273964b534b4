//! Production Environment implementation using the tokio clock and OS RNG.
//!
//! `SystemEnv` reads time from `tokio::time::Instant`, which follows the real
//! monotonic clock in production and the paused clock under
//! `#[tokio::test(start_paused = true)]`. Randomness comes from getrandom and
//! is not reproducible.

use cumulus_core::env::Environment;

/// Production environment using the tokio clock and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. Connection IDs and bucket assignment depend on
/// it and there is no sensible fallback; RNG failure indicates OS-level
/// issues.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn time_follows_tokio_clock() {
        let env = SystemEnv::new();

        let t1 = env.now();
        tokio::time::advance(Duration::from_millis(300)).await;
        let t2 = env.now();

        assert_eq!(t2 - t1, Duration::from_millis(300));
    }

    #[test]
    fn random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn random_index_stays_in_range() {
        let env = SystemEnv::new();

        for _ in 0..1000 {
            assert!(env.random_index(100) < 100);
        }
    }
}
