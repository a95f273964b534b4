//! Simulated client fleet.
//!
//! `SimFleet` plays the role of the production runtime against the real
//! registry and scheduler: it connects clients, fires ticks on the virtual
//! clock, and answers probes on behalf of every client that has not been
//! silenced. Tests drive it explicitly, one tick or one cycle at a time.

use std::collections::{HashMap, HashSet};

use cumulus_core::{
    ConfigError, ConnectionId, ConnectionRegistry, Environment, EvictionReason, LifecycleError,
    LivenessConfig, LivenessScheduler, RegistryError, RoomId, TickReport,
};

use crate::{RecordingProxy, SimEnv, SimInstant};

/// Errors building a [`SimFleet`].
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Rejected liveness configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Scheduler refused to start
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// One eviction observed during the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    /// Evicted connection
    pub id: ConnectionId,
    /// Why it was evicted
    pub reason: EvictionReason,
    /// Virtual time of the tick that evicted it
    pub at: SimInstant,
}

/// Registry, scheduler and simulated clients on a virtual clock.
pub struct SimFleet {
    env: SimEnv,
    scheduler: LivenessScheduler,
    registry: ConnectionRegistry<RecordingProxy, SimInstant>,
    /// Test-side copies of every proxy ever handed to the registry
    proxies: HashMap<ConnectionId, RecordingProxy>,
    /// Clients that no longer answer probes
    silent: HashSet<ConnectionId>,
    /// Time each connection was last probed
    last_probe: HashMap<ConnectionId, SimInstant>,
    evictions: Vec<Eviction>,
}

impl SimFleet {
    /// Build a fleet with a running scheduler.
    pub fn new(config: LivenessConfig, seed: u64) -> Result<Self, FleetError> {
        let (mut scheduler, registry) = LivenessScheduler::with_registry(config)?;
        scheduler.start()?;

        Ok(Self {
            env: SimEnv::with_seed(seed),
            scheduler,
            registry,
            proxies: HashMap::new(),
            silent: HashSet::new(),
            last_probe: HashMap::new(),
            evictions: Vec::new(),
        })
    }

    /// Shared virtual environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Registry under test.
    pub fn registry(&self) -> &ConnectionRegistry<RecordingProxy, SimInstant> {
        &self.registry
    }

    /// Scheduler under test.
    pub fn scheduler(&self) -> &LivenessScheduler {
        &self.scheduler
    }

    /// Disarm the simulated timer.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.scheduler.stop()
    }

    /// Re-arm the simulated timer.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.scheduler.start()
    }

    /// Connect a client into a random bucket.
    pub fn connect(&mut self) -> ConnectionId {
        let now = self.env.now();

        loop {
            let id = ConnectionId(self.env.random_u64());
            let proxy = RecordingProxy::new();

            if self.registry.handle_connect(id, proxy.clone(), now, &self.env).is_some() {
                self.proxies.insert(id, proxy);
                return id;
            }
        }
    }

    /// Connect a client into a specific bucket.
    pub fn connect_in_bucket(&mut self, bucket: usize) -> Result<ConnectionId, RegistryError> {
        let id = ConnectionId(self.env.random_u64());
        let proxy = RecordingProxy::new();

        self.registry.handle_connect_in_bucket(id, proxy.clone(), self.env.now(), bucket)?;
        self.proxies.insert(id, proxy);
        Ok(id)
    }

    /// Connect a client and complete its handshake immediately.
    pub fn connect_joined(&mut self, room: &RoomId) -> ConnectionId {
        let id = self.connect();
        self.registry.join_room(id, room.clone());
        id
    }

    /// Complete the handshake for a client.
    pub fn join(&mut self, id: ConnectionId, room: &RoomId) -> bool {
        self.registry.join_room(id, room.clone())
    }

    /// Stop answering probes for a client.
    pub fn silence(&mut self, id: ConnectionId) {
        self.silent.insert(id);
    }

    /// Simulate the transport closing out-of-band before the disconnect
    /// callback runs.
    pub fn drop_transport(&mut self, id: ConnectionId) -> bool {
        self.registry.detach_transport(id).is_some()
    }

    /// Simulate the transport close callback.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.registry.handle_disconnect(id).is_some()
    }

    /// Test-side handle to a client's proxy.
    pub fn proxy(&self, id: ConnectionId) -> Option<&RecordingProxy> {
        self.proxies.get(&id)
    }

    /// Time a client was last probed.
    pub fn last_probe(&self, id: ConnectionId) -> Option<SimInstant> {
        self.last_probe.get(&id).copied()
    }

    /// Every eviction so far, in order.
    pub fn evictions(&self) -> &[Eviction] {
        &self.evictions
    }

    /// Advance the clock by one tick period and fire the timer.
    ///
    /// Returns `None` while the scheduler is stopped (time still advances).
    /// Clients that are not silenced answer their probe right after the tick.
    pub fn step(&mut self) -> Option<TickReport> {
        self.env.advance(self.scheduler.tick_period());

        if !self.scheduler.is_running() {
            return None;
        }

        let now = self.env.now();
        let report = self.scheduler.tick(&mut self.registry, now);

        for id in &report.probed {
            self.last_probe.insert(*id, now);
            if !self.silent.contains(id) {
                self.registry.handle_pong(*id);
            }
        }

        for (id, reason) in &report.evicted {
            tracing::debug!(connection = %id, %reason, "simulated eviction");
            self.evictions.push(Eviction { id: *id, reason: *reason, at: now });
        }

        Some(report)
    }

    /// Fire `ticks` ticks.
    pub fn run_ticks(&mut self, ticks: usize) -> Vec<TickReport> {
        (0..ticks).filter_map(|_| self.step()).collect()
    }

    /// Fire one full cycle (`bucket_count` ticks).
    pub fn run_cycle(&mut self) -> Vec<TickReport> {
        self.run_ticks(self.registry.bucket_count())
    }
}
