//! Process-wide default session manager.
//!
//! Containers created without an explicit manager use the one installed
//! here. Lifecycle:
//!
//! - [`set_default_manager`]`(Some(m))` installs `m` (typically once per
//!   request, at composition time).
//! - [`default_manager`] returns the installed manager, or builds and
//!   installs [`SessionManager::in_memory`] when none is set.
//! - [`set_default_manager`]`(None)` resets, so the next lookup builds a
//!   fresh one.

use std::sync::{PoisonError, RwLock};

use log::debug;
use once_cell::sync::Lazy;

use crate::manager::SessionManager;

static DEFAULT_MANAGER: Lazy<RwLock<Option<SessionManager>>> = Lazy::new(|| RwLock::new(None));

pub fn default_manager() -> SessionManager {
    if let Some(manager) = DEFAULT_MANAGER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return manager.clone();
    }

    let mut slot = DEFAULT_MANAGER
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    slot.get_or_insert_with(|| {
        debug!("Building default in-memory session manager");
        SessionManager::in_memory()
    })
    .clone()
}

pub fn set_default_manager(manager: Option<SessionManager>) {
    *DEFAULT_MANAGER
        .write()
        .unwrap_or_else(PoisonError::into_inner) = manager;
}

pub fn has_default_manager() -> bool {
    DEFAULT_MANAGER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}
