//! Cloud-variable storage.
//!
//! Each room (one per project) owns a flat map of variable name to JSON
//! value. The trait is synchronous: every call is a short map lookup or a
//! single redb transaction, made while the caller holds no transport locks.

mod error;
mod memory;
mod redb;

use std::collections::BTreeMap;

use cumulus_core::RoomId;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde_json::Value;

pub use self::redb::RedbStorage;

/// Storage abstraction for room variables.
///
/// Must be Clone (shared by every connection task), Send + Sync, and
/// synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// All variables of a room. Empty if the room has never been written.
    fn load_room(&self, room: &RoomId) -> Result<BTreeMap<String, Value>, StorageError>;

    /// One variable. `None` if it has never been set.
    fn get(&self, room: &RoomId, name: &str) -> Result<Option<Value>, StorageError>;

    /// Create or overwrite a variable.
    fn set(&self, room: &RoomId, name: &str, value: &Value) -> Result<(), StorageError>;
}
