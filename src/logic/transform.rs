use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type TransformFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Named data transforms available to the `transform` action
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl TransformRegistry {
    /// Registry holding the built-in `toJSON` and `fromJSON` transforms
    pub fn new() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };
        registry.register("toJSON", to_json);
        registry.register("fromJSON", from_json);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, transform: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Apply `name` to `data`; unknown names return the data unchanged
    pub fn apply(&self, name: &str, data: Value) -> Result<Value> {
        match self.transforms.get(name) {
            Some(transform) => transform(data),
            None => {
                log::warn!("Unknown transform '{}', passing data through", name);
                Ok(data)
            }
        }
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .finish()
    }
}

fn to_json(data: Value) -> Result<Value> {
    let encoded = serde_json::to_string(&data).context("failed to encode value as JSON")?;
    Ok(Value::String(encoded))
}

fn from_json(data: Value) -> Result<Value> {
    match data {
        Value::String(text) => {
            serde_json::from_str(&text).context("value is not a valid JSON document")
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let registry = TransformRegistry::new();
        let samples = vec![
            json!(null),
            json!(3.5),
            json!("text with \"quotes\""),
            json!([1, "two", {"three": [3]}]),
            json!({"nested": {"list": [true, false, null]}, "n": -12}),
        ];

        for sample in samples {
            let encoded = registry.apply("toJSON", sample.clone()).unwrap();
            assert!(encoded.is_string());
            let decoded = registry.apply("fromJSON", encoded).unwrap();
            assert_eq!(decoded, sample);
        }
    }

    #[test]
    fn test_unknown_transform_passes_through() {
        let registry = TransformRegistry::new();
        let data = json!({"a": 1});
        assert_eq!(registry.apply("slugify", data.clone()).unwrap(), data);
    }

    #[test]
    fn test_from_json_rejects_malformed_text() {
        let registry = TransformRegistry::new();
        assert!(registry.apply("fromJSON", json!("{oops")).is_err());
        assert_eq!(registry.apply("fromJSON", json!(5)).unwrap(), json!(5));
    }

    #[test]
    fn test_custom_transform() {
        let mut registry = TransformRegistry::new();
        registry.register("upper", |v: Value| {
            Ok(Value::String(v.as_str().unwrap_or_default().to_uppercase()))
        });

        assert!(registry.contains("upper"));
        assert_eq!(registry.apply("upper", json!("ada")).unwrap(), json!("ADA"));
    }
}
