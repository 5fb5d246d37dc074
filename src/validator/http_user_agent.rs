use serde_json::Value;

use super::{RequestContext, Validator};
use crate::error::{Result, SessionError};

pub const NAME: &str = "http_user_agent";

/// Exact match of the `User-Agent` seen when the session was established.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpUserAgentValidator {
    user_agent: String,
}

impl HttpUserAgentValidator {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    pub fn from_request(request: &RequestContext) -> Self {
        Self::new(request.user_agent.clone().unwrap_or_default())
    }

    pub fn from_data(data: Value) -> Result<Box<dyn Validator>> {
        match data {
            Value::String(user_agent) => Ok(Box::new(Self::new(user_agent))),
            Value::Null => Ok(Box::new(Self::new(String::new()))),
            other => Err(SessionError::InvalidArgument(format!(
                "user agent reference must be a string, got {}",
                other
            ))),
        }
    }
}

impl Validator for HttpUserAgentValidator {
    fn name(&self) -> &str {
        NAME
    }

    fn data(&self) -> Value {
        Value::String(self.user_agent.clone())
    }

    fn is_valid(&self, request: &RequestContext) -> bool {
        request.user_agent.as_deref().unwrap_or_default() == self.user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matches_captured_agent() {
        let request = RequestContext::new().with_user_agent("Mozilla/5.0");
        let validator = HttpUserAgentValidator::from_request(&request);
        assert!(validator.is_valid(&request));
        assert!(!validator.is_valid(&RequestContext::new().with_user_agent("curl/8.0")));
        assert!(!validator.is_valid(&RequestContext::new()));
    }

    #[test]
    fn test_rebuilds_from_data() {
        let validator = HttpUserAgentValidator::from_data(json!("Mozilla/5.0")).unwrap();
        assert_eq!(validator.data(), json!("Mozilla/5.0"));
        assert!(HttpUserAgentValidator::from_data(json!(42)).is_err());
    }
}
