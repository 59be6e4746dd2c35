use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated caller claims as produced by an authenticator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(pub Value);

impl Claims {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// True when `role` or `roles` (string or list of strings) contains `required`
    pub fn has_role(&self, required: &str) -> bool {
        ["role", "roles"]
            .iter()
            .filter_map(|key| self.get(key))
            .any(|value| match value {
                Value::String(role) => role == required,
                Value::Array(roles) => roles.iter().any(|r| r.as_str() == Some(required)),
                _ => false,
            })
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Claims {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
