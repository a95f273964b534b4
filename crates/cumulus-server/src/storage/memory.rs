use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use cumulus_core::RoomId;
use serde_json::Value;

use super::{Storage, StorageError};

/// In-memory storage, used in tests and when no data path is configured.
///
/// Lost on restart. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<RoomId, BTreeMap<String, Value>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, BTreeMap<String, Value>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn load_room(&self, room: &RoomId) -> Result<BTreeMap<String, Value>, StorageError> {
        Ok(self.lock().get(room).cloned().unwrap_or_default())
    }

    fn get(&self, room: &RoomId, name: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.lock().get(room).and_then(|vars| vars.get(name)).cloned())
    }

    fn set(&self, room: &RoomId, name: &str, value: &Value) -> Result<(), StorageError> {
        self.lock().entry(room.clone()).or_default().insert(name.to_string(), value.clone());
        Ok(())
    }
}
