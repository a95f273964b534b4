//! Cumulus connection-liveness core.
//!
//! Tracks every connected client, detects dead or stalled connections without
//! relying on transport timeouts, and spreads the probing workload over time
//! so thousands of clients are never probed in one burst.
//!
//! # Architecture
//!
//! The core is Sans-IO. It never sleeps, never touches a socket, and never
//! reads the clock on its own:
//!
//! - [`ConnectionRegistry`] owns the tracked connections and their bucket
//!   assignment. Pure data structure, no timing logic.
//! - [`LivenessScheduler`] holds the start/stop state and drains one bucket
//!   per [`LivenessScheduler::tick`], probing or evicting.
//! - [`ConnectionProxy`] is the seam to the transport: the runtime implements
//!   it for its socket handles, tests implement it with recorders.
//! - [`Environment`] supplies time and randomness so tests can run on a
//!   virtual clock with a seeded RNG.
//!
//! The runtime owns the repeating timer and calls `tick` on every firing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod registry;
pub mod scheduler;

pub use connection::{Connection, ConnectionId, ConnectionProxy, EvictionReason, RoomId};
pub use env::Environment;
pub use error::{ConfigError, LifecycleError, RegistryError};
pub use registry::ConnectionRegistry;
pub use scheduler::{
    DEFAULT_BUCKET_COUNT, DEFAULT_TIMEOUT, LivenessConfig, LivenessScheduler, SchedulerState,
    TickReport, Verdict, assess,
};
