//! Ordered, persisted list of validators run when a session resumes.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::{RequestContext, Validator, ValidatorRegistry};
use crate::error::Result;
use crate::storage::{self, SharedStorage, VALID};

enum Entry {
    Ready(Box<dyn Validator>),
    /// Persisted under a name the registry could not rebuild.
    Unresolved { name: String, reason: String },
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Ready(validator) => validator.name(),
            Entry::Unresolved { name, .. } => name,
        }
    }
}

/// Per-validator outcome of one [`ValidatorChain::validate`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub results: Vec<(String, bool)>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.results.iter().all(|(_, passed)| *passed)
    }

    pub fn failed(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub struct ValidatorChain {
    storage: SharedStorage,
    registry: Arc<ValidatorRegistry>,
    entries: Vec<Entry>,
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("validators", &self.names())
            .finish()
    }
}

impl ValidatorChain {
    /// Build the chain from whatever `_VALID` holds in `storage`, in
    /// persisted order.
    pub fn new(storage: SharedStorage, registry: Arc<ValidatorRegistry>) -> Self {
        let persisted = persisted_map(&storage);
        let entries = persisted
            .into_iter()
            .map(|(name, data)| match registry.construct(&name, data) {
                Ok(validator) => {
                    debug!("Restored validator {}", name);
                    Entry::Ready(validator)
                }
                Err(e) => {
                    warn!("Cannot restore validator {}: {}", name, e);
                    Entry::Unresolved {
                        name,
                        reason: e.to_string(),
                    }
                }
            })
            .collect();

        Self {
            storage,
            registry,
            entries,
        }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Register `validator` for the current session and persist its
    /// reference data.
    ///
    /// Attaching a name that is already present replaces both the stored
    /// data and the existing entry, keeping its position, so each name runs
    /// exactly once.
    pub fn attach(&mut self, validator: Box<dyn Validator>) -> Result<()> {
        let name = validator.name().to_string();
        {
            let mut storage = storage::write(&self.storage);
            let mut persisted = match storage.metadata(VALID) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            persisted.insert(name.clone(), validator.data());
            storage.set_metadata(VALID, Value::Object(persisted), true)?;
        }

        match self.entries.iter().position(|entry| entry.name() == name) {
            Some(index) => self.entries[index] = Entry::Ready(validator),
            None => self.entries.push(Entry::Ready(validator)),
        }
        info!("Attached validator {}", name);
        Ok(())
    }

    /// Run every validator in order. All of them run even after a failure;
    /// the report is valid only if each one passed.
    pub fn validate(&self, request: &RequestContext) -> ValidationReport {
        let results = self
            .entries
            .iter()
            .map(|entry| {
                let passed = match entry {
                    Entry::Ready(validator) => validator.is_valid(request),
                    Entry::Unresolved { name, reason } => {
                        warn!("Validator {} cannot run: {}", name, reason);
                        false
                    }
                };
                if !passed {
                    warn!("Session validator {} failed", entry.name());
                }
                (entry.name().to_string(), passed)
            })
            .collect();
        ValidationReport { results }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| entry.name().to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `name → reference data` map currently persisted in storage.
    pub fn persisted(&self) -> Map<String, Value> {
        persisted_map(&self.storage)
    }
}

fn persisted_map(storage: &SharedStorage) -> Map<String, Value> {
    match storage::read(storage).metadata(VALID) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}
