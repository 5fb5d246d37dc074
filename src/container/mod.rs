//! Named views over session storage.
//!
//! A [`Container`] owns no data. Every call resolves the manager's current
//! storage, runs an expiry pass for its slot, and then reads or writes
//! `storage[name][key]`. Expired data is purged as part of that pass
//! whenever the slot is writable; on locked or immutable storage the same
//! evaluation only filters what is returned.

pub mod expiry;

use std::fmt;

use log::debug;
use serde_json::{Map, Value};

use crate::context;
use crate::error::{Result, SessionError, StorageError};
use crate::manager::SessionManager;
use crate::storage::{self, Storage};
use expiry::{Evaluation, ExpiryMetadata, HopBudget};

pub const DEFAULT_NAME: &str = "Default";

/// Container names: an ASCII letter or digit, then letters, digits,
/// underscores or backslashes.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\\')
}

#[derive(Clone)]
pub struct Container {
    name: String,
    manager: SessionManager,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("name", &self.name).finish()
    }
}

impl Container {
    /// Open the container `name`, on `manager` or the process default.
    pub fn new(name: &str, manager: Option<SessionManager>) -> Result<Self> {
        if !is_valid_name(name) {
            return Err(SessionError::InvalidArgument(format!(
                "container name must be alphanumerics, underscores and backslashes, got {:?}",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            manager: manager.unwrap_or_else(context::default_manager),
        })
    }

    /// The container named [`DEFAULT_NAME`].
    pub fn default_for(manager: Option<SessionManager>) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            manager: manager.unwrap_or_else(context::default_manager),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Run `f` under the storage write guard after an expiry pass.
    fn with_storage<T>(&self, f: impl FnOnce(&mut Storage, &Evaluation) -> T) -> T {
        let shared = self.manager.storage();
        let mut guard = storage::write(&shared);
        let storage: &mut Storage = &mut guard;
        let evaluation = self.expire(storage);
        f(storage, &evaluation)
    }

    fn expire(&self, storage: &mut Storage) -> Evaluation {
        let mut metadata = ExpiryMetadata::from_slot(storage.metadata(&self.name));
        let evaluation = metadata.evaluate(storage.request_time(), storage.request_access_time());
        if !evaluation.changed || storage.is_immutable() {
            return evaluation;
        }

        // Hop charges are persisted even when the data itself is locked.
        let result = if storage.can_write(&self.name) {
            self.purge(storage, &mut metadata, &evaluation)
        } else {
            self.write_metadata(storage, &metadata)
        };
        if let Err(e) = result {
            debug!("Could not update expiry for {}: {}", self.name, e);
        }
        evaluation
    }

    fn purge(
        &self,
        storage: &mut Storage,
        metadata: &mut ExpiryMetadata,
        evaluation: &Evaluation,
    ) -> Result<(), StorageError> {
        if evaluation.container_expired {
            debug!("Container {} expired", self.name);
            storage.set(&self.name, Value::Object(Map::new()))?;
        } else {
            for key in &evaluation.expired_keys {
                debug!("Key {} in container {} expired", key, self.name);
                storage.remove_path(&[self.name.as_str(), key.as_str()])?;
            }
        }
        metadata.settle(evaluation);
        self.write_metadata(storage, metadata)
    }

    fn write_metadata(
        &self,
        storage: &mut Storage,
        metadata: &ExpiryMetadata,
    ) -> Result<(), StorageError> {
        if metadata.is_empty() {
            storage.remove_metadata(&self.name)?;
        } else {
            storage.set_metadata(&self.name, metadata.to_slot(), true)?;
        }
        Ok(())
    }

    fn visible(&self, storage: &Storage, evaluation: &Evaluation) -> Map<String, Value> {
        if evaluation.container_expired {
            return Map::new();
        }
        match storage.get(&self.name) {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter(|(key, _)| !evaluation.hides(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Map::new(),
        }
    }

    /// Value stored under `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_storage(|storage, evaluation| {
            if evaluation.hides(key) {
                return None;
            }
            storage.get_path(&[self.name.as_str(), key]).cloned()
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Store `value` under `key`. Writing a key that had expired revives
    /// it without any of its old expiry markers; container-level expiry is
    /// left as it is.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_storage(|storage, _| storage.set_path(&[self.name.as_str(), key], value))?;
        Ok(())
    }

    /// Remove `key` and its expiry markers. Returns the removed value if it
    /// was still visible.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.with_storage(|storage, evaluation| -> Result<Option<Value>> {
            let removed = storage.remove_path(&[self.name.as_str(), key])?;
            let mut metadata = ExpiryMetadata::from_slot(storage.metadata(&self.name));
            if metadata.forget_key(key) {
                self.write_metadata(storage, &metadata)?;
            }
            Ok(removed.filter(|_| !evaluation.hides(key)))
        })
    }

    /// Expire the whole container (`keys == None`) or the listed keys `ttl`
    /// seconds after the current request time.
    ///
    /// Keys that are not currently set are skipped. Each call only touches
    /// the scope it names; earlier expirations elsewhere are kept.
    pub fn set_expiration_seconds(&self, ttl: i64, keys: Option<&[&str]>) -> Result<()> {
        self.with_storage(|storage, _| {
            let expires_at = storage.request_time().saturating_add(ttl);
            self.update_expiry(storage, keys, |metadata, key| match key {
                None => metadata.expire = Some(expires_at),
                Some(key) => {
                    metadata.expire_keys.insert(key.to_string(), expires_at);
                }
            })
        })
    }

    /// Expire the whole container or the listed keys after `hops` further
    /// requests. Scoping rules match [`Container::set_expiration_seconds`].
    pub fn set_expiration_hops(&self, hops: i64, keys: Option<&[&str]>) -> Result<()> {
        self.with_storage(|storage, _| {
            let budget = HopBudget::new(hops, storage.request_access_time());
            self.update_expiry(storage, keys, |metadata, key| match key {
                None => metadata.expire_hops = Some(budget),
                Some(key) => {
                    metadata.expire_hops_keys.insert(key.to_string(), budget);
                }
            })
        })
    }

    fn update_expiry(
        &self,
        storage: &mut Storage,
        keys: Option<&[&str]>,
        mut apply: impl FnMut(&mut ExpiryMetadata, Option<&str>),
    ) -> Result<()> {
        let mut metadata = ExpiryMetadata::from_slot(storage.metadata(&self.name));
        match keys {
            None => apply(&mut metadata, None),
            Some(keys) => {
                let present: Vec<&str> = keys
                    .iter()
                    .copied()
                    .filter(|key| storage.get_path(&[self.name.as_str(), *key]).is_some())
                    .collect();
                if present.is_empty() {
                    return Ok(());
                }
                for key in present {
                    apply(&mut metadata, Some(key));
                }
            }
        }
        self.write_metadata(storage, &metadata)?;
        Ok(())
    }

    /// Replace every key with `entries`, returning what was visible before.
    pub fn exchange(&self, entries: Map<String, Value>) -> Result<Map<String, Value>> {
        self.with_storage(|storage, evaluation| -> Result<Map<String, Value>> {
            let previous = self.visible(storage, evaluation);

            let mut metadata = ExpiryMetadata::from_slot(storage.metadata(&self.name));
            let stale: Vec<String> = metadata
                .expire_keys
                .keys()
                .chain(metadata.expire_hops_keys.keys())
                .filter(|key| !entries.contains_key(key.as_str()))
                .cloned()
                .collect();

            storage.set(&self.name, Value::Object(entries))?;
            if !stale.is_empty() {
                for key in &stale {
                    metadata.forget_key(key);
                }
                self.write_metadata(storage, &metadata)?;
            }
            Ok(previous)
        })
    }

    /// Drop every key and every expiry marker.
    pub fn clear(&self) -> Result<()> {
        self.with_storage(|storage, _| -> Result<()> {
            storage.set(&self.name, Value::Object(Map::new()))?;
            let mut metadata = ExpiryMetadata::from_slot(storage.metadata(&self.name));
            metadata.clear_markers();
            self.write_metadata(storage, &metadata)?;
            Ok(())
        })
    }

    /// Copy of all visible entries.
    pub fn to_map(&self) -> Map<String, Value> {
        self.with_storage(|storage, evaluation| self.visible(storage, evaluation))
    }

    pub fn keys(&self) -> Vec<String> {
        self.to_map().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.to_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate visible entries. Each step re-checks expiry, so an entry
    /// that expires mid-iteration is skipped.
    pub fn iter(&self) -> Iter {
        let keys: Vec<String> = self.with_storage(|storage, _| match storage.get(&self.name) {
            Some(Value::Object(entries)) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        });
        Iter {
            container: self.clone(),
            keys: keys.into_iter(),
        }
    }
}

pub struct Iter {
    container: Container,
    keys: std::vec::IntoIter<String>,
}

impl Iterator for Iter {
    type Item = (String, Value);

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            if let Some(value) = self.container.get(&key) {
                return Some((key, value));
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a Container {
    type Item = (String, Value);
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}
