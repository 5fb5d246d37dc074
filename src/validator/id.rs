use serde_json::Value;

use super::{RequestContext, Validator};
use crate::error::{Result, SessionError};

pub const NAME: &str = "id";

/// Checks that a session id only uses the alphabet produced for the
/// configured bits per character:
/// 4 → `[0-9a-f]`, 5 → `[0-9a-v]`, 6 → `[0-9a-zA-Z,-]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdValidator {
    id: String,
    bits_per_character: u8,
}

impl IdValidator {
    pub fn new(id: impl Into<String>, bits_per_character: u8) -> Result<Self> {
        check_bits(bits_per_character)?;
        Ok(Self {
            id: id.into(),
            bits_per_character,
        })
    }

    pub fn from_data(data: Value, bits_per_character: u8) -> Result<Box<dyn Validator>> {
        match data {
            Value::String(id) => Ok(Box::new(Self::new(id, bits_per_character)?)),
            other => Err(SessionError::InvalidArgument(format!(
                "session id reference must be a string, got {}",
                other
            ))),
        }
    }
}

pub(crate) fn check_bits(bits_per_character: u8) -> Result<()> {
    if (4..=6).contains(&bits_per_character) {
        Ok(())
    } else {
        Err(SessionError::InvalidArgument(format!(
            "bits per character must be 4, 5 or 6, got {}",
            bits_per_character
        )))
    }
}

/// Whether `id` is a non-empty string over the alphabet for
/// `bits_per_character`.
pub fn charset_matches(id: &str, bits_per_character: u8) -> bool {
    !id.is_empty()
        && id.chars().all(|c| match bits_per_character {
            4 => matches!(c, '0'..='9' | 'a'..='f'),
            5 => matches!(c, '0'..='9' | 'a'..='v'),
            _ => c.is_ascii_alphanumeric() || c == '-' || c == ',',
        })
}

impl Validator for IdValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn data(&self) -> Value {
        Value::String(self.id.clone())
    }

    /// Checks the id presented by the request, falling back to the captured
    /// one.
    fn is_valid(&self, request: &RequestContext) -> bool {
        let id = request.session_id.as_deref().unwrap_or(&self.id);
        charset_matches(id, self.bits_per_character)
    }
}
