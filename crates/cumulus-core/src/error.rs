//! Error types for the Cumulus core.
//!
//! Strongly-typed errors for each concern: scheduler lifecycle misuse,
//! registry bookkeeping, and liveness configuration.
//!
//! Stale state (a pong or disconnect for a connection that is already gone)
//! is not an error. Those operations report `false`/`None` instead, since the
//! race between a transport close and an eviction is expected.

use std::time::Duration;

use thiserror::Error;

/// Invalid scheduler lifecycle transition.
///
/// Fatal misuse by the caller. The scheduler does not recover; the caller
/// must fix the double call rather than retry it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start()` called while the scheduler is already running
    #[error("liveness scheduler already running")]
    AlreadyRunning,

    /// `stop()` called while the scheduler is stopped
    #[error("liveness scheduler not running")]
    NotRunning,
}

/// Errors from explicit registry placement.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Requested bucket is outside `[0, bucket_count)`
    #[error("bucket {bucket} out of range (bucket count {bucket_count})")]
    BucketOutOfRange {
        /// Requested bucket
        bucket: usize,
        /// Number of buckets in the registry
        bucket_count: usize,
    },

    /// Connection ID is already tracked
    #[error("connection {0:#018x} already registered")]
    DuplicateConnection(u64),
}

/// Invalid liveness configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one bucket is required
    #[error("bucket count must be at least 1")]
    ZeroBuckets,

    /// Bucket count does not fit the tick arithmetic
    #[error("bucket count {0} is too large")]
    TooManyBuckets(usize),

    /// `timeout / bucket_count` rounds down to zero
    #[error("tick period is zero: timeout {timeout:?} over {bucket_count} buckets")]
    TickTooShort {
        /// Configured timeout
        timeout: Duration,
        /// Configured bucket count
        bucket_count: usize,
    },
}
