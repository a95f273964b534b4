//! Per-connection liveness record.
//!
//! A [`Connection`] is the bookkeeping the liveness scheduler keeps for one
//! transport session: which bucket it lives in, whether it answered the last
//! probe, whether it completed the application handshake, and the transport
//! handle used to probe or close it.
//!
//! The record is pure data. Time is passed in by callers, and all I/O goes
//! through the [`ConnectionProxy`] the runtime supplies.
//!
//! # Lifecycle
//!
//! ```text
//!   connect                probe sent              probe response
//! ──────────> acknowledged ───────────> awaiting ──────────────────> acknowledged
//!                  │                       │
//!                  │ no transport /        │ bucket revisited
//!                  │ handshake timeout     │ without response
//!                  ↓                       ↓
//!               evicted                 evicted
//! ```

use std::{
    fmt,
    ops::Sub,
    time::{Duration, Instant},
};

/// Opaque identity of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Room a connection joined at handshake (one room per project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a project identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a connection was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Transport handle was cleared before the disconnect callback ran
    NoTransport,
    /// Previous probe was not answered before the bucket came around again
    NoProbeResponse,
    /// Connected for longer than the timeout without joining a room
    HandshakeTimeout,
}

impl EvictionReason {
    /// Short reason string, sent as the close reason and written to logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoTransport => "no transport",
            Self::NoProbeResponse => "no probe response",
            Self::HandshakeTimeout => "handshake timeout",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport handle for a single client, as seen by the scheduler.
///
/// Both operations are fire-and-forget: the scheduler never waits on the
/// transport. Implementations must not call back into the registry
/// synchronously, since the scheduler holds it mutably while probing.
pub trait ConnectionProxy {
    /// Queue a liveness probe (e.g. a WebSocket Ping frame).
    fn send_probe(&self);

    /// Close the transport. The transport's close path is expected to call
    /// `handle_disconnect` afterwards, which is a no-op once evicted.
    fn force_close(&self, reason: EvictionReason);
}

/// Liveness state of a single tracked connection.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<P, I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Bucket assigned at connect, immutable afterwards
    bucket_index: usize,
    /// Whether the last probe was answered (true until the first probe)
    probe_acknowledged: bool,
    /// Room joined at handshake completion
    joined_room: Option<RoomId>,
    /// When the transport was accepted
    connected_at: I,
    /// Live transport; `None` once the transport closed out-of-band
    transport: Option<P>,
}

impl<P, I> Connection<P, I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a freshly connected record. New connections count as alive
    /// until a probe cycle proves otherwise.
    pub fn new(bucket_index: usize, transport: P, now: I) -> Self {
        Self {
            bucket_index,
            probe_acknowledged: true,
            joined_room: None,
            connected_at: now,
            transport: Some(transport),
        }
    }

    /// Bucket this connection is probed from.
    pub fn bucket_index(&self) -> usize {
        self.bucket_index
    }

    /// Whether the most recent probe was answered.
    pub fn probe_acknowledged(&self) -> bool {
        self.probe_acknowledged
    }

    /// Room joined at handshake. `None` before the handshake completes.
    pub fn joined_room(&self) -> Option<&RoomId> {
        self.joined_room.as_ref()
    }

    /// Time the connection was accepted.
    pub fn connected_at(&self) -> I {
        self.connected_at
    }

    /// Transport handle. `None` if the transport closed out-of-band.
    pub fn transport(&self) -> Option<&P> {
        self.transport.as_ref()
    }

    /// How long the connection has existed at `now`.
    pub fn age(&self, now: I) -> Duration {
        now - self.connected_at
    }

    pub(crate) fn mark_probed(&mut self) {
        self.probe_acknowledged = false;
    }

    pub(crate) fn mark_acknowledged(&mut self) {
        self.probe_acknowledged = true;
    }

    pub(crate) fn join(&mut self, room: RoomId) {
        self.joined_room = Some(room);
    }

    pub(crate) fn detach(&mut self) -> Option<P> {
        self.transport.take()
    }
}
