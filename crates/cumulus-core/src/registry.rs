//! Connection registry with bucketed probe scheduling.
//!
//! The registry owns every tracked [`Connection`] and partitions them into a
//! fixed number of buckets. The liveness scheduler drains one bucket per tick,
//! so each connection is visited once per cycle no matter how many are
//! connected.
//!
//! Buckets are assigned uniformly at random. Sequential assignment would let a
//! burst of connects (or an adversary) pile many connections into the same
//! bucket and defeat the load smoothing.
//!
//! # Invariants
//!
//! - A connection is a member of exactly one bucket, the one equal to its
//!   `bucket_index`.
//! - A connection is in some bucket iff it is in `connections`.
//! - `cursor` is always in `[0, bucket_count)`.

use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    ops::Sub,
    time::{Duration, Instant},
};

use crate::{
    connection::{Connection, ConnectionId, RoomId},
    env::Environment,
    error::RegistryError,
};

/// Registry of all tracked connections and their bucket assignment.
///
/// Constructed by the caller and passed by reference to whatever accepts
/// transport connections; there is no process-wide instance.
#[derive(Debug)]
pub struct ConnectionRegistry<P, I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Bucket index → connection IDs probed on that bucket's tick
    buckets: Vec<HashSet<ConnectionId>>,
    /// Connection ID → liveness record
    connections: HashMap<ConnectionId, Connection<P, I>>,
    /// Next bucket the scheduler will drain
    cursor: usize,
}

impl<P, I> ConnectionRegistry<P, I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an empty registry with `bucket_count` buckets.
    pub fn new(bucket_count: NonZeroUsize) -> Self {
        Self {
            buckets: (0..bucket_count.get()).map(|_| HashSet::new()).collect(),
            connections: HashMap::new(),
            cursor: 0,
        }
    }

    /// Track a new connection in a uniformly random bucket.
    ///
    /// Returns the assigned bucket, or `None` if `id` is already tracked (the
    /// existing record is left untouched).
    pub fn handle_connect<E: Environment>(
        &mut self,
        id: ConnectionId,
        transport: P,
        now: I,
        env: &E,
    ) -> Option<usize> {
        if self.connections.contains_key(&id) {
            return None;
        }

        let bucket = env.random_index(self.buckets.len());
        self.insert(id, transport, now, bucket);
        Some(bucket)
    }

    /// Track a new connection in a caller-chosen bucket.
    ///
    /// # Errors
    ///
    /// - `RegistryError::BucketOutOfRange` if `bucket >= bucket_count`
    /// - `RegistryError::DuplicateConnection` if `id` is already tracked
    pub fn handle_connect_in_bucket(
        &mut self,
        id: ConnectionId,
        transport: P,
        now: I,
        bucket: usize,
    ) -> Result<(), RegistryError> {
        if bucket >= self.buckets.len() {
            return Err(RegistryError::BucketOutOfRange {
                bucket,
                bucket_count: self.buckets.len(),
            });
        }

        if self.connections.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection(id.0));
        }

        self.insert(id, transport, now, bucket);
        Ok(())
    }

    fn insert(&mut self, id: ConnectionId, transport: P, now: I, bucket: usize) {
        debug_assert!(bucket < self.buckets.len());

        self.buckets[bucket].insert(id);
        self.connections.insert(id, Connection::new(bucket, transport, now));
    }

    /// Stop tracking a connection.
    ///
    /// Idempotent: returns the removed record the first time and `None` on
    /// every later call, so the eviction path and the transport close callback
    /// can both call it.
    pub fn handle_disconnect(&mut self, id: ConnectionId) -> Option<Connection<P, I>> {
        let conn = self.connections.remove(&id)?;

        let removed = self.buckets[conn.bucket_index()].remove(&id);
        debug_assert!(removed, "connection {id} missing from bucket {}", conn.bucket_index());

        Some(conn)
    }

    /// Record a probe response. Returns `false` for untracked connections.
    pub fn handle_pong(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.mark_acknowledged();
                true
            },
            None => false,
        }
    }

    /// Record handshake completion. Returns `false` for untracked connections.
    pub fn join_room(&mut self, id: ConnectionId, room: RoomId) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.join(room);
                true
            },
            None => false,
        }
    }

    /// Clear the transport handle of a connection whose transport closed
    /// out-of-band. The record stays tracked until the scheduler evicts it or
    /// the disconnect callback runs.
    pub fn detach_transport(&mut self, id: ConnectionId) -> Option<P> {
        self.connections.get_mut(&id)?.detach()
    }

    /// Total tracked connections.
    pub fn count_all(&self) -> usize {
        debug_assert_eq!(
            self.buckets.iter().map(HashSet::len).sum::<usize>(),
            self.connections.len()
        );
        self.connections.len()
    }

    /// Liveness record for a connection. `None` if not tracked.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection<P, I>> {
        self.connections.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<P, I>> {
        self.connections.get_mut(&id)
    }

    /// Check if a connection is tracked.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Bucket a connection was assigned to. `None` if not tracked.
    pub fn bucket_of(&self, id: ConnectionId) -> Option<usize> {
        self.connections.get(&id).map(Connection::bucket_index)
    }

    /// Number of connections in a bucket (0 for out-of-range indices).
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets.get(bucket).map_or(0, HashSet::len)
    }

    /// Connection IDs currently in a bucket.
    pub fn bucket_members(&self, bucket: usize) -> impl Iterator<Item = ConnectionId> + '_ {
        self.buckets.get(bucket).into_iter().flat_map(|b| b.iter().copied())
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket the next tick will drain.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Consume the bucket under the cursor and advance the cursor by one,
    /// wrapping at `bucket_count`.
    pub fn advance_cursor(&mut self) -> usize {
        let bucket = self.cursor;
        self.cursor = (self.cursor + 1) % self.buckets.len();
        bucket
    }

    /// All tracked connections.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Connection<P, I>)> + '_ {
        self.connections.iter().map(|(id, conn)| (*id, conn))
    }
}
