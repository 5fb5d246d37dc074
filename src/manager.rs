//! Request-scoped session manager.
//!
//! Ties a [`SessionConfig`], a [`SaveHandler`], the request's [`Storage`] and
//! the [`ValidatorChain`] together and drives the session lifecycle:
//!
//! ```text
//! start ──▶ read + hydrate ──▶ validate ──▶ (containers) ──▶ write_close
//!                                  │
//!                                  └─ failure ──▶ destroy
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};

use crate::config::{SameSite, SessionConfig};
use crate::error::{Result, SessionError};
use crate::save_handler::{MemorySaveHandler, SaveHandler};
use crate::storage::{self, SharedStorage, Storage};
use crate::validator::remote_addr::ProxyOptions;
use crate::validator::{RequestContext, Validator, ValidatorChain, ValidatorRegistry};

/// Alphabet for 6 bits per character; its first 16 and 32 characters are
/// the 4- and 5-bit alphabets.
const SID_ALPHABET: &[u8; 64] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-,";

/// Random session id of `length` characters at `bits_per_character`
/// (4, 5 or 6).
pub fn generate_id(length: usize, bits_per_character: u8) -> String {
    let bits = bits_per_character.clamp(4, 6);
    let mask = (1u8 << bits) - 1;
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| SID_ALPHABET[(b & mask) as usize] as char)
        .collect()
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Cookie attributes the web layer should emit for the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieParams {
    pub name: String,
    /// Empty when the cookie is being expired.
    pub value: String,
    /// `None` for a browser-session cookie.
    pub max_age: Option<u64>,
    pub path: String,
    pub domain: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl CookieParams {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if !self.domain.is_empty() {
            header.push_str(&format!("; Domain={}", self.domain));
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header.push_str(&format!("; SameSite={}", self.same_site));
        header
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    id: Option<String>,
    started: bool,
    /// Overrides the configured cookie lifetime after remember_me/forget_me.
    cookie_lifetime: Option<u64>,
    cookie_expired: bool,
}

struct Inner {
    config: SessionConfig,
    storage: SharedStorage,
    registry: Arc<ValidatorRegistry>,
    save_handler: Mutex<Box<dyn SaveHandler>>,
    chain: Mutex<ValidatorChain>,
    state: Mutex<ManagerState>,
}

/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SessionManager")
            .field("name", &self.inner.config.name)
            .field("id", &state.id)
            .field("started", &state.started)
            .finish()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    pub fn new(config: SessionConfig, save_handler: Box<dyn SaveHandler>) -> Result<Self> {
        Self::with_storage(config, save_handler, Storage::new())
    }

    pub fn with_storage(
        config: SessionConfig,
        save_handler: Box<dyn SaveHandler>,
        storage: Storage,
    ) -> Result<Self> {
        config.validate()?;
        let registry =
            ValidatorRegistry::with_builtins(config.sid_bits_per_character, ProxyOptions::default());
        Ok(Self::assemble(config, save_handler, storage, registry))
    }

    /// Use a custom validator registry, e.g. one with proxy settings or
    /// application validators.
    pub fn with_registry(
        config: SessionConfig,
        save_handler: Box<dyn SaveHandler>,
        storage: Storage,
        registry: ValidatorRegistry,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, save_handler, storage, registry))
    }

    /// Default configuration over an in-memory save handler.
    pub fn in_memory() -> Self {
        let config = SessionConfig::default();
        let registry =
            ValidatorRegistry::with_builtins(config.sid_bits_per_character, ProxyOptions::default());
        Self::assemble(
            config,
            Box::new(MemorySaveHandler::new()),
            Storage::new(),
            registry,
        )
    }

    fn assemble(
        config: SessionConfig,
        save_handler: Box<dyn SaveHandler>,
        storage: Storage,
        registry: ValidatorRegistry,
    ) -> Self {
        let storage = storage::shared(storage);
        let registry = Arc::new(registry);
        let chain = ValidatorChain::new(Arc::clone(&storage), Arc::clone(&registry));
        Self {
            inner: Arc::new(Inner {
                config,
                storage,
                registry,
                save_handler: Mutex::new(save_handler),
                chain: Mutex::new(chain),
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        lock(&self.inner.state)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> SharedStorage {
        Arc::clone(&self.inner.storage)
    }

    pub fn validator_chain(&self) -> MutexGuard<'_, ValidatorChain> {
        lock(&self.inner.chain)
    }

    pub fn attach_validator(&self, validator: Box<dyn Validator>) -> Result<()> {
        self.validator_chain().attach(validator)
    }

    /// Re-run the chain against `request` under the current session id.
    pub fn is_valid(&self, request: &RequestContext) -> bool {
        let request = match self.id() {
            Some(id) => request.clone().with_session_id(id),
            None => request.clone(),
        };
        self.validator_chain().validate(&request).is_valid()
    }

    pub fn id(&self) -> Option<String> {
        self.state().id.clone()
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    /// Start or resume a session.
    ///
    /// With `id`, the stored session is read and hydrated into storage and
    /// the persisted validators are run against `request`; any failure
    /// returns [`SessionError::ValidationFailed`] with the session left
    /// started so the caller can destroy it. Without `id`, a fresh id is
    /// generated. Starting an already started session is a no-op.
    pub fn start(&self, id: Option<&str>, request: &RequestContext) -> Result<String> {
        if let Some(current) = self.id().filter(|_| self.is_started()) {
            debug!("Session {} already started", short_id(&current));
            return Ok(current);
        }

        let config = &self.inner.config;
        let id = {
            let mut handler = lock(&self.inner.save_handler);
            handler.open(&config.save_path, &config.name)?;
            match id {
                Some(id) => {
                    let blob = handler.read(id)?;
                    storage::write(&self.inner.storage).from_blob(&blob)?;
                    id.to_string()
                }
                None => generate_id(config.sid_length, config.sid_bits_per_character),
            }
        };

        // Validators see the id being resumed, not whatever the caller carried.
        let request = request.clone().with_session_id(id.as_str());
        let chain = ValidatorChain::new(self.storage(), Arc::clone(&self.inner.registry));
        let report = chain.validate(&request);
        *self.validator_chain() = chain;

        {
            let mut state = self.state();
            state.id = Some(id.clone());
            state.started = true;
            state.cookie_expired = false;
        }

        if !report.is_valid() {
            warn!(
                "Session {} failed validation: {:?}",
                short_id(&id),
                report.failed()
            );
            return Err(SessionError::ValidationFailed {
                failed: report.failed(),
            });
        }

        info!("Session {} started", short_id(&id));
        Ok(id)
    }

    fn require_id(&self) -> Result<String> {
        let state = self.state();
        match (&state.id, state.started) {
            (Some(id), true) => Ok(id.clone()),
            _ => Err(SessionError::NotStarted),
        }
    }

    /// Switch to a new id, keeping the data. With `delete_old`, the record
    /// stored under the previous id is destroyed.
    pub fn regenerate_id(&self, delete_old: bool) -> Result<String> {
        let old = self.require_id()?;
        let config = &self.inner.config;
        let new = generate_id(config.sid_length, config.sid_bits_per_character);
        if delete_old {
            lock(&self.inner.save_handler).destroy(&old)?;
        }
        self.state().id = Some(new.clone());
        info!(
            "Session {} regenerated as {}",
            short_id(&old),
            short_id(&new)
        );
        Ok(new)
    }

    /// Persist storage, close the handler and freeze storage for the rest of
    /// the request.
    pub fn write_close(&self) -> Result<()> {
        let Ok(id) = self.require_id() else {
            return Ok(());
        };
        let blob = storage::read(&self.inner.storage).to_blob()?;
        {
            let mut handler = lock(&self.inner.save_handler);
            handler.write(&id, &blob)?;
            handler.close()?;
        }
        storage::write(&self.inner.storage).mark_immutable();
        self.state().started = false;
        debug!("Session {} written ({} bytes)", short_id(&id), blob.len());
        Ok(())
    }

    /// Destroy the stored session and expire its cookie.
    pub fn destroy(&self) -> Result<()> {
        let Ok(id) = self.require_id() else {
            return Ok(());
        };
        {
            let mut handler = lock(&self.inner.save_handler);
            handler.destroy(&id)?;
            handler.close()?;
        }
        if self.inner.config.clear_storage_on_destroy {
            storage::write(&self.inner.storage).clear(None)?;
            *self.validator_chain() =
                ValidatorChain::new(self.storage(), Arc::clone(&self.inner.registry));
        }
        {
            let mut state = self.state();
            state.started = false;
            state.cookie_expired = true;
        }
        info!("Session {} destroyed", short_id(&id));
        Ok(())
    }

    pub fn gc(&self) -> Result<bool> {
        let lifetime = self.inner.config.gc_maxlifetime;
        Ok(lock(&self.inner.save_handler).gc(lifetime)?)
    }

    /// Keep the session cookie for `seconds` (the configured remember-me
    /// lifetime when `None`) and move to a new id.
    pub fn remember_me(&self, seconds: Option<u64>) -> Result<()> {
        let lifetime = seconds.unwrap_or(self.inner.config.remember_me_seconds);
        self.state().cookie_lifetime = Some(lifetime);
        if self.is_started() {
            self.regenerate_id(true)?;
        }
        Ok(())
    }

    /// Turn the session cookie back into a browser-session cookie.
    pub fn forget_me(&self) -> Result<()> {
        self.remember_me(Some(0))
    }

    /// Ask the client to drop its session cookie.
    pub fn expire_session_cookie(&self) {
        self.state().cookie_expired = true;
    }

    pub fn cookie_params(&self) -> CookieParams {
        let config = &self.inner.config;
        let state = self.state();
        let (value, max_age) = if state.cookie_expired {
            (String::new(), Some(0))
        } else {
            let lifetime = state.cookie_lifetime.unwrap_or(config.cookie_lifetime);
            (
                state.id.clone().unwrap_or_default(),
                (lifetime > 0).then_some(lifetime),
            )
        };
        CookieParams {
            name: config.name.clone(),
            value,
            max_age,
            path: config.cookie_path.clone(),
            domain: config.cookie_domain.clone(),
            secure: config.cookie_secure,
            http_only: config.cookie_httponly,
            same_site: config.cookie_samesite,
        }
    }
}
