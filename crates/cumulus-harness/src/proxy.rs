//! Recording connection proxy.
//!
//! Stands in for a real transport handle. Probes and closes are counted
//! instead of sent, and clones share the same log so a test can keep one copy
//! while the registry owns another.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cumulus_core::{ConnectionProxy, EvictionReason};

#[derive(Debug, Default)]
struct ProxyLog {
    probes: usize,
    closed: Option<EvictionReason>,
}

/// [`ConnectionProxy`] that records what the scheduler asked of it.
#[derive(Debug, Clone, Default)]
pub struct RecordingProxy {
    log: Arc<Mutex<ProxyLog>>,
}

impl RecordingProxy {
    /// Fresh proxy with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of probes sent.
    pub fn probes(&self) -> usize {
        self.lock().probes
    }

    /// Reason passed to `force_close`, if it was called.
    pub fn closed_with(&self) -> Option<EvictionReason> {
        self.lock().closed
    }

    /// Whether `force_close` was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ProxyLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionProxy for RecordingProxy {
    fn send_probe(&self) {
        self.lock().probes += 1;
    }

    fn force_close(&self, reason: EvictionReason) {
        let mut log = self.lock();
        debug_assert!(log.closed.is_none(), "connection closed twice");
        log.closed = Some(reason);
    }
}
