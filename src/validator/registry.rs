//! Name → constructor table used to rebuild persisted validators.
//!
//! Persisted names are looked up here instead of being resolved to types at
//! runtime, so a tampered session record can only ever select a validator
//! that was registered at startup.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::{csrf, http_user_agent, id, remote_addr};
use super::{CsrfValidator, HttpUserAgentValidator, IdValidator, ProxyOptions, RemoteAddrValidator, Validator};
use crate::error::{Result, SessionError};

type Constructor = Box<dyn Fn(Value) -> Result<Box<dyn Validator>> + Send + Sync>;

pub struct ValidatorRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins(5, ProxyOptions::default())
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("ValidatorRegistry")
            .field("names", &names)
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in `id`, `http_user_agent`, `remote_addr`
    /// and `csrf` validators.
    pub fn with_builtins(sid_bits_per_character: u8, proxy: ProxyOptions) -> Self {
        let mut registry = Self::empty();
        registry.register(id::NAME, move |data| {
            IdValidator::from_data(data, sid_bits_per_character)
        });
        registry.register(http_user_agent::NAME, HttpUserAgentValidator::from_data);
        registry.register(remote_addr::NAME, move |data| {
            RemoteAddrValidator::from_data(data, proxy.clone())
        });
        registry.register(csrf::NAME, CsrfValidator::from_data);
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(Value) -> Result<Box<dyn Validator>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Rebuild the validator `name` from its persisted reference data.
    pub fn construct(&self, name: &str, data: Value) -> Result<Box<dyn Validator>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            SessionError::InvalidArgument(format!("unknown validator: {}", name))
        })?;
        constructor(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::RequestContext;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let registry = ValidatorRegistry::default();
        for name in ["id", "http_user_agent", "remote_addr", "csrf"] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_construct_round_trips_data() {
        let registry = ValidatorRegistry::default();
        let validator = registry
            .construct("remote_addr", json!("192.168.1.1"))
            .unwrap();
        assert_eq!(validator.name(), "remote_addr");
        assert!(validator.is_valid(&RequestContext::new().with_remote_addr("192.168.1.1")));
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let registry = ValidatorRegistry::default();
        assert!(matches!(
            registry.construct("std::process::Command", json!(null)),
            Err(SessionError::InvalidArgument(_))
        ));
    }
}
