//! Property-based tests for ConnectionRegistry and LivenessScheduler
//!
//! Random sequences of connects, disconnects, pongs, joins, transport drops
//! and ticks run against a simple model. After every step the bucket
//! invariants must hold, and every tick must probe or evict exactly what the
//! model predicts.

use std::{collections::HashMap, time::Duration};

use cumulus_core::{
    ConnectionId, ConnectionRegistry, Environment, EvictionReason, LivenessConfig,
    LivenessScheduler, RoomId,
};
use cumulus_harness::{RecordingProxy, SimEnv, SimInstant};
use proptest::prelude::*;

const TIMEOUT: Duration = Duration::from_millis(80);
const BUCKETS: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Disconnect(usize),
    Pong(usize),
    Join(usize),
    DropTransport(usize),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Connect),
        1 => any::<usize>().prop_map(Op::Disconnect),
        3 => any::<usize>().prop_map(Op::Pong),
        2 => any::<usize>().prop_map(Op::Join),
        1 => any::<usize>().prop_map(Op::DropTransport),
        4 => Just(Op::Tick),
    ]
}

/// What the test believes about one tracked connection.
#[derive(Debug, Clone)]
struct Model {
    acknowledged: bool,
    has_transport: bool,
    joined: bool,
    connected_at: SimInstant,
    proxy: RecordingProxy,
}

impl Model {
    fn expected(&self, now: SimInstant) -> Option<EvictionReason> {
        if !self.has_transport {
            Some(EvictionReason::NoTransport)
        } else if !self.acknowledged {
            Some(EvictionReason::NoProbeResponse)
        } else if !self.joined && now - self.connected_at > TIMEOUT {
            Some(EvictionReason::HandshakeTimeout)
        } else {
            None
        }
    }
}

fn pick(models: &HashMap<ConnectionId, Model>, index: usize) -> Option<ConnectionId> {
    let mut ids: Vec<ConnectionId> = models.keys().copied().collect();
    ids.sort_unstable();
    (!ids.is_empty()).then(|| ids[index % ids.len()])
}

fn check_invariants(
    registry: &ConnectionRegistry<RecordingProxy, SimInstant>,
    models: &HashMap<ConnectionId, Model>,
) -> Result<(), TestCaseError> {
    prop_assert_eq!(registry.count_all(), models.len());
    prop_assert!(registry.cursor() < registry.bucket_count());

    let bucket_total: usize = (0..registry.bucket_count()).map(|b| registry.bucket_len(b)).sum();
    prop_assert_eq!(bucket_total, models.len());

    for bucket in 0..registry.bucket_count() {
        for id in registry.bucket_members(bucket) {
            prop_assert_eq!(registry.bucket_of(id), Some(bucket));
            prop_assert!(models.contains_key(&id));
        }
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: registry and scheduler agree with the model for any
    /// sequence of operations
    #[test]
    fn prop_registry_matches_model(
        seed in any::<u64>(),
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let env = SimEnv::with_seed(seed);
        let config = LivenessConfig { timeout: TIMEOUT, bucket_count: BUCKETS };
        let (mut scheduler, mut registry) =
            LivenessScheduler::with_registry::<RecordingProxy, SimInstant>(config)?;
        scheduler.start()?;

        let mut models: HashMap<ConnectionId, Model> = HashMap::new();
        let mut next_id = 0u64;

        for op in ops {
            match op {
                Op::Connect => {
                    let id = ConnectionId(next_id);
                    next_id += 1;
                    let proxy = RecordingProxy::new();
                    let bucket = registry.handle_connect(id, proxy.clone(), env.now(), &env);
                    prop_assert!(bucket.is_some_and(|b| b < BUCKETS));

                    models.insert(id, Model {
                        acknowledged: true,
                        has_transport: true,
                        joined: false,
                        connected_at: env.now(),
                        proxy,
                    });
                },
                Op::Disconnect(index) => {
                    if let Some(id) = pick(&models, index) {
                        prop_assert!(registry.handle_disconnect(id).is_some());
                        prop_assert!(registry.handle_disconnect(id).is_none());
                        models.remove(&id);
                    }
                },
                Op::Pong(index) => {
                    if let Some(id) = pick(&models, index) {
                        prop_assert!(registry.handle_pong(id));
                        if let Some(model) = models.get_mut(&id) {
                            model.acknowledged = true;
                        }
                    }
                },
                Op::Join(index) => {
                    if let Some(id) = pick(&models, index) {
                        prop_assert!(registry.join_room(id, RoomId::new("1")));
                        if let Some(model) = models.get_mut(&id) {
                            model.joined = true;
                        }
                    }
                },
                Op::DropTransport(index) => {
                    if let Some(id) = pick(&models, index) {
                        let was_attached = models.get(&id).is_some_and(|m| m.has_transport);
                        prop_assert_eq!(registry.detach_transport(id).is_some(), was_attached);
                        if let Some(model) = models.get_mut(&id) {
                            model.has_transport = false;
                        }
                    }
                },
                Op::Tick => {
                    env.advance(scheduler.tick_period());
                    let now = env.now();
                    let bucket = registry.cursor();

                    let mut expected_evicted: Vec<(ConnectionId, EvictionReason)> = Vec::new();
                    let mut expected_probed: Vec<ConnectionId> = Vec::new();
                    for id in registry.bucket_members(bucket) {
                        match models.get(&id).and_then(|m| m.expected(now)) {
                            Some(reason) => expected_evicted.push((id, reason)),
                            None => expected_probed.push(id),
                        }
                    }

                    let mut report = scheduler.tick(&mut registry, now);
                    report.probed.sort_unstable();
                    report.evicted.sort_unstable_by_key(|(id, _)| *id);
                    expected_probed.sort_unstable();
                    expected_evicted.sort_unstable_by_key(|(id, _)| *id);

                    prop_assert_eq!(report.bucket, bucket);
                    prop_assert_eq!(&report.probed, &expected_probed);
                    prop_assert_eq!(&report.evicted, &expected_evicted);

                    for id in &report.probed {
                        if let Some(model) = models.get_mut(id) {
                            model.acknowledged = false;
                        }
                    }
                    for (id, reason) in &report.evicted {
                        if let Some(model) = models.remove(id) {
                            let expected_close = model.has_transport.then_some(*reason);
                            prop_assert_eq!(model.proxy.closed_with(), expected_close);
                        }
                    }
                },
            }

            check_invariants(&registry, &models)?;
        }
    }

    /// Property: the cursor visits buckets in order and wraps
    #[test]
    fn prop_cursor_round_robin(bucket_count in 1usize..50, ticks in 0usize..200) {
        let config = LivenessConfig {
            timeout: Duration::from_millis(bucket_count as u64),
            bucket_count,
        };
        let (scheduler, mut registry) =
            LivenessScheduler::with_registry::<RecordingProxy, SimInstant>(config)?;

        for tick in 0..ticks {
            let report = scheduler.tick(&mut registry, SimInstant::ZERO);
            prop_assert_eq!(report.bucket, tick % bucket_count);
            prop_assert_eq!(report.total.is_some(), tick % bucket_count == 0);
        }
        prop_assert_eq!(registry.cursor(), ticks % bucket_count);
    }
}
