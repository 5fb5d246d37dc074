//! Session configuration.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::validator::id::check_bits;

/// Cookie lifetime used by `remember_me` when none is given (two weeks).
pub const DEFAULT_REMEMBER_ME_SECONDS: u64 = 1_209_600;

/// Idle seconds after which gc may discard a session.
pub const DEFAULT_GC_MAXLIFETIME: u64 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session (cookie) name
    pub name: String,
    pub save_path: String,
    pub gc_maxlifetime: u64,
    /// 0 keeps the cookie until the browser closes
    pub cookie_lifetime: u64,
    pub cookie_path: String,
    pub cookie_domain: String,
    pub cookie_secure: bool,
    pub cookie_httponly: bool,
    pub cookie_samesite: SameSite,
    pub remember_me_seconds: u64,
    pub sid_length: usize,
    pub sid_bits_per_character: u8,
    pub clear_storage_on_destroy: bool,
    pub redis_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "SESSID".to_string(),
            save_path: env::temp_dir().to_string_lossy().into_owned(),
            gc_maxlifetime: DEFAULT_GC_MAXLIFETIME,
            cookie_lifetime: 0,
            cookie_path: "/".to_string(),
            cookie_domain: String::new(),
            cookie_secure: false,
            cookie_httponly: true,
            cookie_samesite: SameSite::Lax,
            remember_me_seconds: DEFAULT_REMEMBER_ME_SECONDS,
            sid_length: 32,
            sid_bits_per_character: 5,
            clear_storage_on_destroy: true,
            redis_url: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `SESSION_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            name: env::var("SESSION_NAME").unwrap_or_else(|_| defaults.name.clone()),
            save_path: env::var("SESSION_SAVE_PATH")
                .unwrap_or_else(|_| defaults.save_path.clone()),
            gc_maxlifetime: parse_env("SESSION_GC_MAXLIFETIME", defaults.gc_maxlifetime)?,
            cookie_lifetime: parse_env("SESSION_COOKIE_LIFETIME", defaults.cookie_lifetime)?,
            cookie_secure: parse_env("SESSION_COOKIE_SECURE", defaults.cookie_secure)?,
            sid_length: parse_env("SESSION_SID_LENGTH", defaults.sid_length)?,
            sid_bits_per_character: parse_env(
                "SESSION_SID_BITS_PER_CHARACTER",
                defaults.sid_bits_per_character,
            )?,
            redis_url: env::var("SESSION_REDIS_URL").ok(),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SessionError::InvalidArgument(format!(
                "session name must be non-empty and alphanumeric, got {:?}",
                self.name
            )));
        }
        if !(22..=256).contains(&self.sid_length) {
            return Err(SessionError::InvalidArgument(format!(
                "sid length must be between 22 and 256, got {}",
                self.sid_length
            )));
        }
        check_bits(self.sid_bits_per_character)
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SessionError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
