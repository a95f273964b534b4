//! Liveness scheduler.
//!
//! Drives one round-robin sweep step per tick. Each tick drains exactly one
//! bucket of the [`ConnectionRegistry`]: connections that failed the previous
//! probe cycle are evicted, the rest are probed again.
//!
//! The tick period is `timeout / bucket_count`, so every connection is
//! visited exactly once per `timeout` regardless of how many are connected.
//! A probe's deadline is therefore one full cycle, and detection latency is
//! bounded by one cycle independent of load. Probe frames per tick average
//! `connections / bucket_count`.
//!
//! The scheduler is Sans-IO: it holds no timer. The runtime arms a repeating
//! timer on [`LivenessScheduler::start`], disarms it on
//! [`LivenessScheduler::stop`], and calls [`LivenessScheduler::tick`] with the
//! current time on every firing.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  start()   ┌─────────┐
//! │ Stopped │───────────>│ Running │
//! └─────────┘<───────────└─────────┘
//!               stop()
//! ```

use std::{
    num::NonZeroUsize,
    ops::Sub,
    time::{Duration, Instant},
};

use crate::{
    connection::{Connection, ConnectionId, ConnectionProxy, EvictionReason},
    error::{ConfigError, LifecycleError},
    registry::ConnectionRegistry,
};

/// Time after which an unresponsive or handshake-less connection is dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of buckets the connections are spread over.
pub const DEFAULT_BUCKET_COUNT: usize = 100;

/// Liveness configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Full cycle length: probe deadline and handshake deadline
    pub timeout: Duration,
    /// Number of buckets drained round-robin, one per tick
    pub bucket_count: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, bucket_count: DEFAULT_BUCKET_COUNT }
    }
}

impl LivenessConfig {
    /// Interval between ticks: `timeout / bucket_count`.
    ///
    /// Zero for configurations that fail [`Self::validate`].
    pub fn tick_period(&self) -> Duration {
        u32::try_from(self.bucket_count)
            .ok()
            .and_then(|buckets| self.timeout.checked_div(buckets))
            .unwrap_or(Duration::ZERO)
    }

    /// Check the configuration and return the bucket count.
    ///
    /// # Errors
    ///
    /// - `ConfigError::ZeroBuckets` if `bucket_count` is 0
    /// - `ConfigError::TooManyBuckets` if `bucket_count` exceeds `u32::MAX`
    /// - `ConfigError::TickTooShort` if the tick period rounds to zero
    pub fn validate(&self) -> Result<NonZeroUsize, ConfigError> {
        let buckets = NonZeroUsize::new(self.bucket_count).ok_or(ConfigError::ZeroBuckets)?;

        if u32::try_from(self.bucket_count).is_err() {
            return Err(ConfigError::TooManyBuckets(self.bucket_count));
        }

        if self.tick_period().is_zero() {
            return Err(ConfigError::TickTooShort {
                timeout: self.timeout,
                bucket_count: self.bucket_count,
            });
        }

        Ok(buckets)
    }
}

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Timer disarmed
    Stopped,
    /// Timer armed, ticks are firing
    Running,
}

/// Outcome of inspecting one connection during a bucket drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Connection looks alive: send it a new probe
    Probe,
    /// Connection is dead: close and forget it
    Evict(EvictionReason),
}

/// Decide what to do with a connection whose bucket is being drained.
///
/// Rules apply in order, first match wins:
/// 1. no transport → evict
/// 2. previous probe unanswered → evict (one strike, no grace period)
/// 3. no room joined and connected longer than `timeout` → evict
/// 4. otherwise → probe
pub fn assess<P, I>(conn: &Connection<P, I>, now: I, timeout: Duration) -> Verdict
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    if conn.transport().is_none() {
        return Verdict::Evict(EvictionReason::NoTransport);
    }

    if !conn.probe_acknowledged() {
        return Verdict::Evict(EvictionReason::NoProbeResponse);
    }

    if conn.joined_room().is_none() && conn.age(now) > timeout {
        return Verdict::Evict(EvictionReason::HandshakeTimeout);
    }

    Verdict::Probe
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bucket drained by this tick
    pub bucket: usize,
    /// Connections sent a fresh probe
    pub probed: Vec<ConnectionId>,
    /// Connections evicted, with the reason
    pub evicted: Vec<(ConnectionId, EvictionReason)>,
    /// Total tracked connections, computed once per cycle (bucket 0 ticks)
    pub total: Option<usize>,
}

/// Round-robin liveness scheduler.
///
/// Holds the configuration and the start/stop state; the registry it sweeps
/// is passed to [`Self::tick`].
#[derive(Debug, Clone)]
pub struct LivenessScheduler {
    config: LivenessConfig,
    state: SchedulerState,
}

impl LivenessScheduler {
    /// Create a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Any error from [`LivenessConfig::validate`].
    pub fn new(config: LivenessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, state: SchedulerState::Stopped })
    }

    /// Create a stopped scheduler together with an empty registry sized for
    /// it.
    pub fn with_registry<P, I>(
        config: LivenessConfig,
    ) -> Result<(Self, ConnectionRegistry<P, I>), ConfigError>
    where
        I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
    {
        let buckets = config.validate()?;
        Ok((Self { config, state: SchedulerState::Stopped }, ConnectionRegistry::new(buckets)))
    }

    /// Active configuration.
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Interval the runtime must tick at.
    pub fn tick_period(&self) -> Duration {
        self.config.tick_period()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    /// Transition to `Running`. The caller arms its timer after this
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::AlreadyRunning` if already running
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state == SchedulerState::Running {
            return Err(LifecycleError::AlreadyRunning);
        }

        self.state = SchedulerState::Running;
        Ok(())
    }

    /// Transition to `Stopped`. The caller disarms its timer after this
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::NotRunning` if already stopped
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if self.state == SchedulerState::Stopped {
            return Err(LifecycleError::NotRunning);
        }

        self.state = SchedulerState::Stopped;
        Ok(())
    }

    /// Drain the bucket under the registry cursor.
    ///
    /// Advances the cursor, logs the connection total once per cycle, then
    /// probes or evicts every connection in the drained bucket. Evictions
    /// call [`ConnectionProxy::force_close`] and remove the connection from
    /// the registry before returning.
    pub fn tick<P, I>(&self, registry: &mut ConnectionRegistry<P, I>, now: I) -> TickReport
    where
        P: ConnectionProxy,
        I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
    {
        let bucket = registry.advance_cursor();
        let mut report = TickReport { bucket, ..TickReport::default() };

        if bucket == 0 {
            let total = registry.count_all();
            if total > 0 {
                tracing::info!(total, "tracked connections");
            }
            report.total = Some(total);
        }

        let members: Vec<ConnectionId> = registry.bucket_members(bucket).collect();

        for id in members {
            let Some(conn) = registry.get_mut(id) else {
                continue;
            };

            match assess(conn, now, self.config.timeout) {
                Verdict::Probe => {
                    conn.mark_probed();
                    if let Some(transport) = conn.transport() {
                        transport.send_probe();
                    }
                    report.probed.push(id);
                },
                Verdict::Evict(reason) => {
                    if let Some(transport) = conn.transport() {
                        transport.force_close(reason);
                    }
                    registry.handle_disconnect(id);

                    tracing::info!(connection = %id, %reason, "evicting connection");
                    report.evicted.push((id, reason));
                },
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::connection::RoomId;

    #[derive(Debug, Default)]
    struct ProxyLog {
        probes: usize,
        closed: Option<EvictionReason>,
    }

    #[derive(Debug, Clone, Default)]
    struct TestProxy(Rc<RefCell<ProxyLog>>);

    impl ConnectionProxy for TestProxy {
        fn send_probe(&self) {
            self.0.borrow_mut().probes += 1;
        }

        fn force_close(&self, reason: EvictionReason) {
            self.0.borrow_mut().closed = Some(reason);
        }
    }

    fn config(timeout_ms: u64, bucket_count: usize) -> LivenessConfig {
        LivenessConfig { timeout: Duration::from_millis(timeout_ms), bucket_count }
    }

    fn setup(
        timeout_ms: u64,
        bucket_count: usize,
    ) -> (LivenessScheduler, ConnectionRegistry<TestProxy>) {
        LivenessScheduler::with_registry(config(timeout_ms, bucket_count)).unwrap()
    }

    #[test]
    fn default_tick_period_is_300ms() {
        assert_eq!(LivenessConfig::default().tick_period(), Duration::from_millis(300));
    }

    #[test]
    fn validate_rejects_bad_configs() {
        assert_eq!(config(30_000, 0).validate(), Err(ConfigError::ZeroBuckets));
        assert!(matches!(config(0, 10).validate(), Err(ConfigError::TickTooShort { .. })));
        assert_eq!(config(30_000, 100).validate().unwrap().get(), 100);
    }

    #[test]
    fn start_stop_state_machine() {
        let mut scheduler = LivenessScheduler::new(LivenessConfig::default()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        assert_eq!(scheduler.stop(), Err(LifecycleError::NotRunning));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.start(), Err(LifecycleError::AlreadyRunning));

        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.stop(), Err(LifecycleError::NotRunning));

        // Restart after a clean stop
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
    }

    #[test]
    fn assess_rule_order() {
        let t0 = Instant::now();
        let timeout = Duration::from_secs(30);
        let late = t0 + Duration::from_secs(31);

        let mut conn = Connection::new(0, (), t0);
        assert_eq!(assess(&conn, t0, timeout), Verdict::Probe);

        // Handshake deadline is strict
        assert_eq!(assess(&conn, t0 + timeout, timeout), Verdict::Probe);
        assert_eq!(assess(&conn, late, timeout), Verdict::Evict(EvictionReason::HandshakeTimeout));

        // Unanswered probe wins over handshake timeout
        conn.mark_probed();
        assert_eq!(assess(&conn, late, timeout), Verdict::Evict(EvictionReason::NoProbeResponse));

        // Missing transport wins over everything
        conn.detach();
        assert_eq!(assess(&conn, late, timeout), Verdict::Evict(EvictionReason::NoTransport));
    }

    #[test]
    fn joined_connection_is_probed_after_timeout() {
        let t0 = Instant::now();
        let mut conn = Connection::new(0, (), t0);
        conn.join(RoomId::new("1"));

        assert_eq!(assess(&conn, t0 + Duration::from_secs(3600), DEFAULT_TIMEOUT), Verdict::Probe);
    }

    #[test]
    fn tick_drains_only_the_cursor_bucket() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        let a = TestProxy::default();
        let b = TestProxy::default();
        registry.handle_connect_in_bucket(ConnectionId(1), a.clone(), t0, 0).unwrap();
        registry.handle_connect_in_bucket(ConnectionId(2), b.clone(), t0, 1).unwrap();

        let report = scheduler.tick(&mut registry, t0);

        assert_eq!(report.bucket, 0);
        assert_eq!(report.probed, vec![ConnectionId(1)]);
        assert_eq!(a.0.borrow().probes, 1);
        assert_eq!(b.0.borrow().probes, 0);
        assert!(!registry.get(ConnectionId(1)).unwrap().probe_acknowledged());
        assert!(registry.get(ConnectionId(2)).unwrap().probe_acknowledged());
        assert_eq!(registry.cursor(), 1);
    }

    #[test]
    fn total_reported_once_per_cycle() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        registry.handle_connect_in_bucket(ConnectionId(1), TestProxy::default(), t0, 2).unwrap();

        let totals: Vec<Option<usize>> =
            (0..8).map(|_| scheduler.tick(&mut registry, t0).total).collect();

        assert_eq!(totals, vec![Some(1), None, None, None, Some(1), None, None, None]);
    }

    #[test]
    fn unanswered_probe_evicts_next_cycle() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        let proxy = TestProxy::default();
        registry.handle_connect_in_bucket(ConnectionId(1), proxy.clone(), t0, 0).unwrap();
        registry.join_room(ConnectionId(1), RoomId::new("1"));

        scheduler.tick(&mut registry, t0);
        for _ in 1..4 {
            scheduler.tick(&mut registry, t0);
        }
        let report = scheduler.tick(&mut registry, t0 + Duration::from_millis(400));

        assert_eq!(report.evicted, vec![(ConnectionId(1), EvictionReason::NoProbeResponse)]);
        assert_eq!(proxy.0.borrow().closed, Some(EvictionReason::NoProbeResponse));
        assert!(!registry.contains(ConnectionId(1)));
        assert_eq!(registry.count_all(), 0);
    }

    #[test]
    fn answered_probe_keeps_connection() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        let proxy = TestProxy::default();
        registry.handle_connect_in_bucket(ConnectionId(1), proxy.clone(), t0, 0).unwrap();
        registry.join_room(ConnectionId(1), RoomId::new("1"));

        for cycle in 0..5 {
            for _ in 0..4 {
                scheduler.tick(&mut registry, t0 + Duration::from_millis(400 * cycle));
            }
            registry.handle_pong(ConnectionId(1));
        }

        assert!(registry.contains(ConnectionId(1)));
        assert_eq!(proxy.0.borrow().probes, 5);
        assert_eq!(proxy.0.borrow().closed, None);
    }

    #[test]
    fn detached_transport_is_evicted_without_close() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        let proxy = TestProxy::default();
        registry.handle_connect_in_bucket(ConnectionId(1), proxy.clone(), t0, 0).unwrap();
        registry.detach_transport(ConnectionId(1));

        let report = scheduler.tick(&mut registry, t0);

        assert_eq!(report.evicted, vec![(ConnectionId(1), EvictionReason::NoTransport)]);
        assert_eq!(proxy.0.borrow().closed, None);
        assert!(!registry.contains(ConnectionId(1)));
    }

    #[test]
    fn handshake_timeout_evicts_responsive_connection() {
        let (scheduler, mut registry) = setup(400, 4);
        let t0 = Instant::now();
        let proxy = TestProxy::default();
        registry.handle_connect_in_bucket(ConnectionId(1), proxy.clone(), t0, 0).unwrap();

        scheduler.tick(&mut registry, t0 + Duration::from_millis(100));
        registry.handle_pong(ConnectionId(1));
        for _ in 1..4 {
            scheduler.tick(&mut registry, t0 + Duration::from_millis(200));
        }
        let report = scheduler.tick(&mut registry, t0 + Duration::from_millis(500));

        assert_eq!(report.evicted, vec![(ConnectionId(1), EvictionReason::HandshakeTimeout)]);
        assert_eq!(proxy.0.borrow().closed, Some(EvictionReason::HandshakeTimeout));
    }

    #[test]
    fn tick_on_empty_registry_is_quiet() {
        let (scheduler, mut registry) = setup(400, 4);

        let report = scheduler.tick(&mut registry, Instant::now());

        assert_eq!(report.total, Some(0));
        assert!(report.probed.is_empty());
        assert!(report.evicted.is_empty());
    }
}
