//! Deterministic simulation harness for Cumulus liveness testing.
//!
//! Virtual-clock [`SimEnv`], a recording [`RecordingProxy`] in place of real
//! transports, and [`SimFleet`], which drives the real registry and scheduler
//! tick by tick with simulated clients that answer (or ignore) probes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fleet;
pub mod proxy;
pub mod sim_env;

pub use fleet::{Eviction, FleetError, SimFleet};
pub use proxy::RecordingProxy;
pub use sim_env::{SimEnv, SimInstant};
