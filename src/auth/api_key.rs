use axum::http::HeaderMap;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::{header_value, AuthError, Authenticator};
use crate::model::{AuthSpec, Claims};

const DEFAULT_HEADER: &str = "x-api-key";

/// Static API keys mapped to the claims they grant
#[derive(Debug, Clone)]
pub struct ApiKeyAuthenticator {
    name: String,
    header: String,
    keys: HashMap<String, Claims>,
}

impl ApiKeyAuthenticator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            header: DEFAULT_HEADER.to_string(),
            keys: HashMap::new(),
        }
    }

    pub fn with_header(mut self, header: &str) -> Self {
        self.header = header.to_ascii_lowercase();
        self
    }

    /// Register a key. Object values are used as claims; anything else becomes `{"sub": value}`.
    pub fn with_key(mut self, key: impl Into<String>, claims: Value) -> Self {
        let claims = match claims {
            Value::Object(_) => claims,
            Value::String(sub) => json!({ "sub": sub }),
            _ => json!({ "sub": self.name }),
        };
        self.keys.insert(key.into(), Claims::new(claims));
        self
    }

    pub fn from_spec(spec: &AuthSpec) -> Result<Self, AuthError> {
        let mut authenticator = Self::new(&spec.name);
        if let Some(header) = &spec.header {
            authenticator = authenticator.with_header(header);
        }
        for (key, claims) in &spec.keys {
            authenticator = authenticator.with_key(key, claims.clone());
        }

        // a single shared secret acts as one key for the provider itself
        let shared = match (&spec.secret, &spec.secret_env) {
            (Some(secret), _) => Some(secret.clone()),
            (None, Some(var)) => std::env::var(var).ok(),
            (None, None) => None,
        };
        if let Some(secret) = shared.filter(|s| !s.is_empty()) {
            authenticator = authenticator.with_key(secret, Value::Null);
        }

        if authenticator.keys.is_empty() {
            return Err(AuthError::Config(format!(
                "api_key auth '{}' declares no keys",
                spec.name
            )));
        }
        Ok(authenticator)
    }
}

#[async_trait::async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Claims>, AuthError> {
        let Some(key) = header_value(headers, &self.header) else {
            return Ok(None);
        };

        self.keys
            .get(key)
            .cloned()
            .map(Some)
            .ok_or_else(|| AuthError::InvalidCredentials("unknown api key".to_string()))
    }
}
