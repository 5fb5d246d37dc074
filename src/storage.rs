//! Request-scoped session storage.
//!
//! A [`Storage`] holds the data of every container in the session plus a
//! side-channel metadata map. Both round-trip together through
//! [`Storage::to_array`] / [`Storage::from_array`], which is the only shape a
//! save handler ever sees.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{Result, StorageError};

/// Metadata key holding the fixed "now" of the current request.
pub const REQUEST_ACCESS_TIME: &str = "_REQUEST_ACCESS_TIME";
/// Metadata key holding the persisted validator registry.
pub const VALID: &str = "_VALID";
/// Metadata key set when the whole storage is locked.
pub const READONLY: &str = "_READONLY";
/// Metadata key holding per-key locks.
pub const LOCKS: &str = "_LOCKS";
/// Entry under which metadata is carried in the persisted map.
pub const METADATA_KEY: &str = "__META";

/// Storage shared between a manager, its containers and its validator chain.
pub type SharedStorage = Arc<RwLock<Storage>>;

pub fn shared(storage: Storage) -> SharedStorage {
    Arc::new(RwLock::new(storage))
}

pub(crate) fn read(storage: &SharedStorage) -> RwLockReadGuard<'_, Storage> {
    storage.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write(storage: &SharedStorage) -> RwLockWriteGuard<'_, Storage> {
    storage.write().unwrap_or_else(PoisonError::into_inner)
}

fn current_access_time() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone)]
pub struct Storage {
    data: Map<String, Value>,
    metadata: Map<String, Value>,
    immutable: bool,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    /// Create empty storage stamped with the current wall-clock time.
    pub fn new() -> Self {
        Self::with_request_access_time(current_access_time())
    }

    /// Create empty storage with an explicit request access time.
    pub fn with_request_access_time(ts: f64) -> Self {
        let mut metadata = Map::new();
        metadata.insert(REQUEST_ACCESS_TIME.to_string(), Value::from(ts));
        Self {
            data: Map::new(),
            metadata,
            immutable: false,
        }
    }

    /// Fractional Unix timestamp recorded when this request's storage was
    /// created. Does not follow the wall clock.
    pub fn request_access_time(&self) -> f64 {
        self.metadata
            .get(REQUEST_ACCESS_TIME)
            .and_then(Value::as_f64)
            .unwrap_or_default()
    }

    /// Whole seconds of [`Storage::request_access_time`].
    pub fn request_time(&self) -> i64 {
        self.request_access_time().floor() as i64
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a nested value, e.g. `["container", "key"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.data.get(*first)?, |node, key| node.get(*key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fails for locked keys, on immutable storage, and for
    /// [`METADATA_KEY`], which the persisted form reserves.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.ensure_writable(key)?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Write a nested value, creating intermediate maps as needed. Any
    /// non-map value found along the path is replaced by a map.
    pub fn set_path(&mut self, path: &[&str], value: Value) -> Result<(), StorageError> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(());
        };
        self.ensure_writable(first)?;
        let slot = self.data.entry(first.to_string()).or_insert(Value::Null);
        insert_path(slot, rest, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, StorageError> {
        self.ensure_writable(key)?;
        Ok(self.data.remove(key))
    }

    pub fn remove_path(&mut self, path: &[&str]) -> Result<Option<Value>, StorageError> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };
        self.ensure_writable(first)?;
        if rest.is_empty() {
            return Ok(self.data.remove(*first));
        }
        Ok(self
            .data
            .get_mut(*first)
            .and_then(|node| remove_path_in(node, rest)))
    }

    /// Set metadata under `key`.
    ///
    /// When both the existing and the new value are maps and `overwrite` is
    /// false, the new map is merged recursively into the existing one and its
    /// entries win on conflict. Otherwise the value is replaced.
    pub fn set_metadata(
        &mut self,
        key: &str,
        value: Value,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        if self.immutable {
            return Err(StorageError::Immutable);
        }
        if !overwrite {
            if let Value::Object(incoming) = &value {
                if let Some(Value::Object(existing)) = self.metadata.get_mut(key) {
                    merge_maps(existing, incoming.clone());
                    return Ok(());
                }
            }
        }
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Metadata stored under `key`; `None` when absent.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn all_metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn remove_metadata(&mut self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.immutable {
            return Err(StorageError::Immutable);
        }
        Ok(self.metadata.remove(key))
    }

    /// Lock a single key, or the whole storage when `key` is `None`.
    pub fn lock(&mut self, key: Option<&str>) {
        match key {
            None => {
                self.metadata.insert(READONLY.to_string(), Value::Bool(true));
            }
            Some(key) => {
                let locks = self
                    .metadata
                    .entry(LOCKS.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !locks.is_object() {
                    *locks = Value::Object(Map::new());
                }
                if let Value::Object(locks) = locks {
                    locks.insert(key.to_string(), Value::Bool(true));
                }
            }
        }
    }

    /// Unlock a single key, or every lock when `key` is `None`.
    ///
    /// Unlocking one key while the whole storage is locked turns the global
    /// lock into per-key locks on every other existing key.
    pub fn unlock(&mut self, key: Option<&str>) {
        let Some(key) = key else {
            self.metadata.remove(READONLY);
            self.metadata.remove(LOCKS);
            return;
        };

        if self.is_globally_locked() {
            self.metadata.remove(READONLY);
            let locks: Map<String, Value> = self
                .data
                .keys()
                .filter(|existing| existing.as_str() != key)
                .map(|existing| (existing.clone(), Value::Bool(true)))
                .collect();
            self.metadata.insert(LOCKS.to_string(), Value::Object(locks));
            return;
        }

        let now_empty = match self.metadata.get_mut(LOCKS) {
            Some(Value::Object(locks)) => {
                locks.remove(key);
                locks.is_empty()
            }
            _ => false,
        };
        if now_empty {
            self.metadata.remove(LOCKS);
        }
    }

    /// With `None`, reports whether the whole storage is locked. With a key,
    /// reports whether writes to that key are refused.
    pub fn is_locked(&self, key: Option<&str>) -> bool {
        if self.is_globally_locked() {
            return true;
        }
        match key {
            None => false,
            Some(key) => self
                .metadata
                .get(LOCKS)
                .and_then(|locks| locks.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    fn is_globally_locked(&self) -> bool {
        self.metadata
            .get(READONLY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// One-way latch: after this, every write fails.
    pub fn mark_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Whether a data write to `key` would currently succeed.
    pub fn can_write(&self, key: &str) -> bool {
        !self.immutable && !self.is_locked(Some(key))
    }

    fn ensure_writable(&self, key: &str) -> Result<(), StorageError> {
        if key == METADATA_KEY {
            return Err(StorageError::ReservedKey {
                key: key.to_string(),
            });
        }
        if self.immutable {
            return Err(StorageError::Immutable);
        }
        if self.is_locked(Some(key)) {
            return Err(StorageError::LockedKey {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Drop data and metadata for `key`, or everything when `key` is `None`.
    /// The request access time survives a full clear.
    pub fn clear(&mut self, key: Option<&str>) -> Result<(), StorageError> {
        if self.immutable {
            return Err(StorageError::Immutable);
        }
        match key {
            None => {
                let ts = self.request_access_time();
                self.data.clear();
                self.metadata.clear();
                self.metadata
                    .insert(REQUEST_ACCESS_TIME.to_string(), Value::from(ts));
            }
            Some(key) => {
                self.ensure_writable(key)?;
                self.data.remove(key);
                self.metadata.remove(key);
            }
        }
        Ok(())
    }

    /// Replace contents from a persisted map, keeping this request's access
    /// time.
    pub fn from_array(&mut self, mut array: Map<String, Value>) -> Result<(), StorageError> {
        if self.immutable {
            return Err(StorageError::Immutable);
        }
        let ts = self.request_access_time();
        let metadata = match array.remove(METADATA_KEY) {
            Some(Value::Object(metadata)) => metadata,
            _ => Map::new(),
        };
        self.data = array;
        self.metadata = metadata;
        self.metadata
            .insert(REQUEST_ACCESS_TIME.to_string(), Value::from(ts));
        Ok(())
    }

    pub fn to_array(&self, include_metadata: bool) -> Map<String, Value> {
        let mut array = self.data.clone();
        if include_metadata {
            array.insert(
                METADATA_KEY.to_string(),
                Value::Object(self.metadata.clone()),
            );
        }
        array
    }

    /// Hydrate from a serialized blob. An empty blob leaves empty storage.
    pub fn from_blob(&mut self, blob: &str) -> crate::Result<()> {
        let array = if blob.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(blob)?
        };
        self.from_array(array)?;
        Ok(())
    }

    /// Serialize data and metadata for a save handler.
    pub fn to_blob(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.to_array(true))?)
    }
}

fn insert_path(node: &mut Value, path: &[&str], value: Value) {
    match path.split_first() {
        None => *node = value,
        Some((key, rest)) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(key.to_string()).or_insert(Value::Null);
                insert_path(child, rest, value);
            }
        }
    }
}

fn remove_path_in(node: &mut Value, path: &[&str]) -> Option<Value> {
    let (key, rest) = path.split_first()?;
    let map = node.as_object_mut()?;
    if rest.is_empty() {
        map.remove(*key)
    } else {
        remove_path_in(map.get_mut(*key)?, rest)
    }
}

fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_maps(existing, nested);
                continue;
            }
            target.insert(key, Value::Object(nested));
        } else {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_merges_by_default() {
        let mut storage = Storage::new();
        storage
            .set_metadata("K", json!({"a": 1, "b": 2}), false)
            .unwrap();
        storage
            .set_metadata("K", json!({"b": 3, "c": 4}), false)
            .unwrap();
        assert_eq!(storage.metadata("K"), Some(&json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn test_metadata_overwrite_replaces() {
        let mut storage = Storage::new();
        storage
            .set_metadata("K", json!({"a": 1, "b": 2}), false)
            .unwrap();
        storage
            .set_metadata("K", json!({"b": 3, "c": 4}), true)
            .unwrap();
        assert_eq!(storage.metadata("K"), Some(&json!({"b": 3, "c": 4})));
    }

    #[test]
    fn test_metadata_merge_is_recursive() {
        let mut storage = Storage::new();
        storage
            .set_metadata("K", json!({"EXPIRE_KEYS": {"foo": 10}}), false)
            .unwrap();
        storage
            .set_metadata("K", json!({"EXPIRE_KEYS": {"bar": 20}}), false)
            .unwrap();
        assert_eq!(
            storage.metadata("K"),
            Some(&json!({"EXPIRE_KEYS": {"foo": 10, "bar": 20}}))
        );
    }

    #[test]
    fn test_missing_metadata_is_none() {
        let storage = Storage::new();
        assert!(storage.metadata("nothing").is_none());
    }

    #[test]
    fn test_key_lock_blocks_only_that_key() {
        let mut storage = Storage::new();
        storage.lock(Some("foo"));
        assert!(matches!(
            storage.set("foo", json!(1)),
            Err(StorageError::LockedKey { .. })
        ));
        storage.set("bar", json!(1)).unwrap();
        storage.unlock(Some("foo"));
        storage.set("foo", json!(2)).unwrap();
        assert_eq!(storage.get("foo"), Some(&json!(2)));
    }

    #[test]
    fn test_global_lock_then_unlock_one_key() {
        let mut storage = Storage::new();
        storage.set("foo", json!(1)).unwrap();
        storage.set("bar", json!(1)).unwrap();
        storage.lock(None);
        assert!(storage.is_locked(None));
        assert!(storage.set("baz", json!(1)).is_err());

        storage.unlock(Some("foo"));
        assert!(!storage.is_locked(None));
        assert!(!storage.is_locked(Some("foo")));
        assert!(storage.is_locked(Some("bar")));
        storage.set("foo", json!(2)).unwrap();
        assert!(storage.set("bar", json!(2)).is_err());
    }

    #[test]
    fn test_metadata_key_is_reserved() {
        let mut storage = Storage::new();
        assert!(matches!(
            storage.set(METADATA_KEY, json!(1)),
            Err(StorageError::ReservedKey { .. })
        ));
        assert!(matches!(
            storage.set_path(&[METADATA_KEY, "x"], json!(1)),
            Err(StorageError::ReservedKey { .. })
        ));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_immutable_blocks_clear_forever() {
        let mut storage = Storage::new();
        storage.set("foo", json!("bar")).unwrap();
        storage.mark_immutable();
        assert!(matches!(storage.clear(None), Err(StorageError::Immutable)));
        assert!(matches!(
            storage.set("foo", json!(1)),
            Err(StorageError::Immutable)
        ));
        storage.unlock(None);
        assert!(storage.is_immutable());
        assert_eq!(storage.get("foo"), Some(&json!("bar")));
    }

    #[test]
    fn test_clear_keeps_request_access_time() {
        let mut storage = Storage::with_request_access_time(1000.5);
        storage.set("foo", json!(1)).unwrap();
        storage.set_metadata("foo", json!({"x": 1}), false).unwrap();
        storage.clear(None).unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.request_access_time(), 1000.5);
    }

    #[test]
    fn test_round_trip_preserves_current_access_time() {
        let mut previous = Storage::with_request_access_time(100.0);
        previous.set_path(&["Default", "foo"], json!("bar")).unwrap();
        previous
            .set_metadata("Default", json!({"EXPIRE": 500}), false)
            .unwrap();
        let array = previous.to_array(true);

        let mut current = Storage::with_request_access_time(200.0);
        current.from_array(array).unwrap();
        assert_eq!(current.get_path(&["Default", "foo"]), Some(&json!("bar")));
        assert_eq!(current.metadata("Default"), Some(&json!({"EXPIRE": 500})));
        assert_eq!(current.request_access_time(), 200.0);
        assert!(!current.to_array(false).contains_key(METADATA_KEY));
    }

    #[test]
    fn test_nested_paths() {
        let mut storage = Storage::new();
        storage.set_path(&["a", "b", "c"], json!(1)).unwrap();
        assert_eq!(storage.get("a"), Some(&json!({"b": {"c": 1}})));
        assert_eq!(storage.remove_path(&["a", "b", "c"]).unwrap(), Some(json!(1)));
        assert_eq!(storage.get_path(&["a", "b"]), Some(&json!({})));
        assert_eq!(storage.remove_path(&["a", "missing"]).unwrap(), None);
    }

    #[test]
    fn test_blob_round_trip() {
        let mut storage = Storage::new();
        storage.set_path(&["Default", "n"], json!([1, 2])).unwrap();
        let blob = storage.to_blob().unwrap();

        let mut restored = Storage::new();
        restored.from_blob(&blob).unwrap();
        assert_eq!(restored.get_path(&["Default", "n"]), Some(&json!([1, 2])));

        let mut empty = Storage::new();
        empty.from_blob("").unwrap();
        assert!(empty.is_empty());
    }
}
