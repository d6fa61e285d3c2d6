//! Operation parameter bag and the opaque success payload.

use crate::error::DispatchError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Named operation parameters. Validation happens per job inside the protocol client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Params(BTreeMap::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-negative integer parameter, e.g. a pool or chain index.
    pub fn require_u64(&self, operation: &str, key: &str) -> Result<u64, DispatchError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(DispatchError::parameter(operation, format!("requires '{}' parameter", key))),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| DispatchError::parameter(operation, format!("'{}' must be a non-negative integer, got {}", key, v))),
        }
    }

    pub fn require_str(&self, operation: &str, key: &str) -> Result<&str, DispatchError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(DispatchError::parameter(operation, format!("requires '{}' parameter", key))),
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(v) => Err(DispatchError::parameter(operation, format!("'{}' must be a string, got {}", key, v))),
        }
    }

    pub fn get_bool(&self, operation: &str, key: &str) -> Result<Option<bool>, DispatchError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(v) => Err(DispatchError::parameter(operation, format!("'{}' must be a boolean, got {}", key, v))),
        }
    }
}

/// Successful result of one protocol call. The dispatcher never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Acknowledgement of a mutating operation, or a raw non-JSON reply.
    Message(String),
    /// Decoded device response.
    Document(Value),
}

impl Payload {
    pub fn message(s: impl Into<String>) -> Self {
        Payload::Message(s.into())
    }

    /// Decode as JSON when possible, keep the raw text otherwise.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(v) => Payload::Document(v),
            Err(_) => Payload::Message(text.to_string()),
        }
    }

    pub fn as_document(&self) -> Option<&Value> {
        match self {
            Payload::Document(v) => Some(v),
            Payload::Message(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_u64_reports_missing_and_wrong_shape() {
        let p = Params::new().with("pool", "two");
        let missing = Params::new().require_u64("switchpool", "pool").unwrap_err();
        assert_eq!(missing.to_string(), "switchpool: requires 'pool' parameter");
        let wrong = p.require_u64("switchpool", "pool").unwrap_err();
        assert!(matches!(wrong, DispatchError::Parameter { .. }));
        assert_eq!(Params::new().with("pool", 3).require_u64("switchpool", "pool").unwrap(), 3);
        assert!(Params::new().with("pool", -1).require_u64("switchpool", "pool").is_err());
    }

    #[test]
    fn require_str_and_bool() {
        let p = Params::new().with("url", "stratum+tcp://pool:3333").with("blink", true).with("n", 1);
        assert_eq!(p.require_str("addpool", "url").unwrap(), "stratum+tcp://pool:3333");
        assert!(p.require_str("addpool", "n").is_err());
        assert_eq!(p.get_bool("find-miner", "blink").unwrap(), Some(true));
        assert_eq!(p.get_bool("find-miner", "missing").unwrap(), None);
        assert!(p.get_bool("find-miner", "url").is_err());
    }

    #[test]
    fn payload_from_text_prefers_json() {
        assert_eq!(Payload::from_text("{\"a\":1}"), Payload::Document(json!({"a": 1})));
        assert_eq!(Payload::from_text("BYE"), Payload::message("BYE"));
        assert_eq!(serde_json::to_value(Payload::message("ok")).unwrap(), json!("ok"));
    }
}
