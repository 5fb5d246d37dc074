//! CSRF token check.
//!
//! Only the SHA-256 digest of the token is kept in the session; the token
//! itself goes to the client and must come back with each request.

use rand_core::{OsRng, RngCore};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{RequestContext, Validator};
use crate::error::{Result, SessionError};

pub const NAME: &str = "csrf";

/// Token length in bytes before hex encoding.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct CsrfValidator {
    hash: String,
}

impl CsrfValidator {
    /// Create a validator for a fresh random token. Returns the token that
    /// must be handed to the client.
    pub fn generate() -> (Self, String) {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        (Self::from_hash(hash_token(&token)), token)
    }

    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    pub fn from_data(data: Value) -> Result<Box<dyn Validator>> {
        match data {
            Value::String(hash) => Ok(Box::new(Self::from_hash(hash))),
            other => Err(SessionError::InvalidArgument(format!(
                "csrf reference must be a string, got {}",
                other
            ))),
        }
    }

    pub fn verify(&self, token: &str) -> bool {
        constant_time_eq(hash_token(token).as_bytes(), self.hash.as_bytes())
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl Validator for CsrfValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn data(&self) -> Value {
        Value::String(self.hash.clone())
    }

    fn is_valid(&self, request: &RequestContext) -> bool {
        request
            .csrf_token
            .as_deref()
            .is_some_and(|token| self.verify(token))
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
