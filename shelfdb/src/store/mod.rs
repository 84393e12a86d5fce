//! In-memory object stores: the read cache and the async-write queue
//! share this structure.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;

/// Per-type map of serialized records. Entries are stored as JSON
/// trees, so every read and write hands out an independent copy and
/// callers can never mutate shared state, the same isolation a
/// serialize/deserialize round trip would give.
#[derive(Debug, Default)]
struct ObjectMap {
    m: RwLock<HashMap<String, JsonValue>>,
}

impl ObjectMap {
    fn put(&self, uuid: &str, value: JsonValue) {
        self.m.write().insert(uuid.to_string(), value);
    }

    fn get(&self, uuid: &str) -> Option<JsonValue> {
        self.m.read().get(uuid).cloned()
    }

    fn delete(&self, uuid: &str) {
        self.m.write().remove(uuid);
    }

    fn len(&self) -> usize {
        self.m.read().len()
    }

    fn drain(&self) -> Vec<(String, JsonValue)> {
        std::mem::take(&mut *self.m.write()).into_iter().collect()
    }
}

/// Type-sharded store: `type → (uuid → record)`. Shards carry their
/// own locks so bookkeeping stays safe under a database reader lock.
#[derive(Debug, Default)]
pub(crate) struct ObjectStore {
    shards: RwLock<HashMap<String, Arc<ObjectMap>>>,
}

impl ObjectStore {
    fn shard(&self, type_name: &str) -> Option<Arc<ObjectMap>> {
        self.shards.read().get(type_name).cloned()
    }

    fn shard_or_create(&self, type_name: &str) -> Arc<ObjectMap> {
        if let Some(shard) = self.shard(type_name) {
            return shard;
        }
        self.shards
            .write()
            .entry(type_name.to_string())
            .or_default()
            .clone()
    }

    pub fn put(&self, type_name: &str, uuid: &str, value: JsonValue) {
        self.shard_or_create(type_name).put(uuid, value);
    }

    pub fn get(&self, type_name: &str, uuid: &str) -> Option<JsonValue> {
        self.shard(type_name)?.get(uuid)
    }

    pub fn delete(&self, type_name: &str, uuid: &str) {
        if let Some(shard) = self.shard(type_name) {
            shard.delete(uuid);
        }
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.shard(type_name).map(|s| s.len()).unwrap_or(0)
    }

    /// Takes every pending entry of one type out of the store.
    pub fn drain(&self, type_name: &str) -> Vec<(String, JsonValue)> {
        self.shard(type_name).map(|s| s.drain()).unwrap_or_default()
    }

    /// Takes every pending entry of every type out of the store.
    pub fn drain_all(&self) -> Vec<(String, Vec<(String, JsonValue)>)> {
        let shards = self.shards.read();
        shards
            .iter()
            .map(|(type_name, shard)| (type_name.clone(), shard.drain()))
            .collect()
    }

    pub fn remove_type(&self, type_name: &str) {
        self.shards.write().remove(type_name);
    }

    pub fn clear(&self) {
        self.shards.write().clear();
    }
}
