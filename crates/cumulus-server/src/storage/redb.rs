//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Variables survive server restarts.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use cumulus_core::RoomId;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;

use super::{Storage, StorageError};

/// Table: variables
/// Key: `room_id \0 variable_name`
/// Value: JSON text of the variable value
const VARIABLES: TableDefinition<&str, &str> = TableDefinition::new("variables");

const SEPARATOR: char = '\0';

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(VARIABLES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn load_room(&self, room: &RoomId) -> Result<BTreeMap<String, Value>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(VARIABLES).map_err(|e| StorageError::Io(e.to_string()))?;

        let (start, end) = room_range(room);
        let results = table
            .range(start.as_str()..end.as_str())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut vars = BTreeMap::new();
        for result in results {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let Some((_, name)) = decode_key(key.value()) else {
                continue;
            };

            vars.insert(name.to_string(), serde_json::from_str(value.value())?);
        }

        Ok(vars)
    }

    fn get(&self, room: &RoomId, name: &str) -> Result<Option<Value>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(VARIABLES).map_err(|e| StorageError::Io(e.to_string()))?;

        let key = encode_key(room, name);

        match table.get(key.as_str()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, room: &RoomId, name: &str, value: &Value) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(value)?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(VARIABLES).map_err(|e| StorageError::Io(e.to_string()))?;

            let key = encode_key(room, name);
            table
                .insert(key.as_str(), encoded.as_str())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}

fn encode_key(room: &RoomId, name: &str) -> String {
    format!("{}{SEPARATOR}{name}", room.as_str())
}

fn decode_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(SEPARATOR)
}

/// Half-open key range covering every variable of `room`.
///
/// `\u{1}` is the successor of the separator, so `room\0..room\u{1}` holds
/// exactly the keys with prefix `room\0`.
fn room_range(room: &RoomId) -> (String, String) {
    (format!("{}{SEPARATOR}", room.as_str()), format!("{}\u{1}", room.as_str()))
}
