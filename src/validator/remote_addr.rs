use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RequestContext, Validator};
use crate::error::{Result, SessionError};

pub const NAME: &str = "remote_addr";

/// How to find the client address behind reverse proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    pub use_proxy: bool,
    pub trusted_proxies: Vec<String>,
    pub proxy_header: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            use_proxy: false,
            trusted_proxies: Vec::new(),
            proxy_header: "X-Forwarded-For".to_string(),
        }
    }
}

impl ProxyOptions {
    /// Client address for `request`.
    ///
    /// Only consults the proxy header when the peer itself is a trusted
    /// proxy; the right-most untrusted address in the header wins.
    pub fn resolve(&self, request: &RequestContext) -> String {
        let remote = request.remote_addr.clone().unwrap_or_default();
        if !self.use_proxy || !self.is_trusted(&remote) {
            return remote;
        }
        let Some(header) = request.header(&self.proxy_header) else {
            return remote;
        };
        header
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && !self.is_trusted(ip))
            .last()
            .map(String::from)
            .unwrap_or(remote)
    }

    fn is_trusted(&self, ip: &str) -> bool {
        self.trusted_proxies.iter().any(|proxy| proxy == ip)
    }
}

/// Exact match of the client address seen when the session was established.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAddrValidator {
    address: String,
    options: ProxyOptions,
}

impl RemoteAddrValidator {
    pub fn new(address: impl Into<String>, options: ProxyOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }

    pub fn from_request(request: &RequestContext, options: ProxyOptions) -> Self {
        let address = options.resolve(request);
        Self::new(address, options)
    }

    pub fn from_data(data: Value, options: ProxyOptions) -> Result<Box<dyn Validator>> {
        match data {
            Value::String(address) => Ok(Box::new(Self::new(address, options))),
            other => Err(SessionError::InvalidArgument(format!(
                "remote address reference must be a string, got {}",
                other
            ))),
        }
    }
}

impl Validator for RemoteAddrValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn data(&self) -> Value {
        Value::String(self.address.clone())
    }

    fn is_valid(&self, request: &RequestContext) -> bool {
        self.options.resolve(request) == self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxied() -> ProxyOptions {
        ProxyOptions {
            use_proxy: true,
            trusted_proxies: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            ..ProxyOptions::default()
        }
    }

    #[test]
    fn test_direct_address() {
        let request = RequestContext::new().with_remote_addr("192.168.1.10");
        let validator = RemoteAddrValidator::from_request(&request, ProxyOptions::default());
        assert!(validator.is_valid(&request));
        assert!(!validator.is_valid(&RequestContext::new().with_remote_addr("192.168.1.11")));
    }

    #[test]
    fn test_header_ignored_without_proxy_mode() {
        let request = RequestContext::new()
            .with_remote_addr("10.0.0.1")
            .with_header("X-Forwarded-For", "203.0.113.7");
        assert_eq!(ProxyOptions::default().resolve(&request), "10.0.0.1");
    }

    #[test]
    fn test_trusted_proxy_chain_resolves_client() {
        let request = RequestContext::new()
            .with_remote_addr("10.0.0.1")
            .with_header("x-forwarded-for", "198.51.100.3, 203.0.113.7, 10.0.0.2");
        assert_eq!(proxied().resolve(&request), "203.0.113.7");
    }

    #[test]
    fn test_untrusted_peer_header_is_ignored() {
        let request = RequestContext::new()
            .with_remote_addr("192.0.2.99")
            .with_header("X-Forwarded-For", "203.0.113.7");
        assert_eq!(proxied().resolve(&request), "192.0.2.99");
    }
}
