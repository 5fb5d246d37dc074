//! Session hijacking checks.
//!
//! A [`Validator`] captures a reference value when a session is established
//! (the user agent, the remote address, ...) and later compares it with what
//! the current request presents. Validators are persisted by name in the
//! storage's `_VALID` metadata and rebuilt through a [`ValidatorRegistry`]
//! when a session resumes.
//!
//! ```text
//! ┌────────────────┐  attach   ┌────────────────┐  _VALID   ┌─────────┐
//! │   Validator    │──────────▶│ ValidatorChain │──────────▶│ Storage │
//! └────────────────┘           └────────────────┘           └─────────┘
//!         ▲                            │ resume
//!         │ construct(name, data)      ▼
//! ┌────────────────┐◀──────────────────┘
//! │ValidatorRegistry│
//! └────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod chain;
pub mod csrf;
pub mod http_user_agent;
pub mod id;
pub mod registry;
pub mod remote_addr;

pub use chain::{ValidationReport, ValidatorChain};
pub use csrf::CsrfValidator;
pub use http_user_agent::HttpUserAgentValidator;
pub use id::IdValidator;
pub use registry::ValidatorRegistry;
pub use remote_addr::{ProxyOptions, RemoteAddrValidator};

/// A check that the current request matches the one that established the
/// session.
pub trait Validator: Send + Sync {
    /// Stable identifier, used as the key in persisted validator state.
    fn name(&self) -> &str;

    /// Reference value captured at construction.
    fn data(&self) -> Value;

    fn is_valid(&self, request: &RequestContext) -> bool;
}

/// What validators are allowed to see of the current request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
    /// Header names are stored lowercased.
    pub headers: BTreeMap<String, String>,
    pub session_id: Option<String>,
    pub csrf_token: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = RequestContext::new().with_header("X-Forwarded-For", "10.0.0.1");
        assert_eq!(request.header("x-forwarded-for"), Some("10.0.0.1"));
        assert_eq!(request.header("X-FORWARDED-FOR"), Some("10.0.0.1"));
        assert_eq!(request.header("via"), None);
    }
}
