use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::auth::{header_value, AuthError, Authenticator};
use crate::model::{AuthSpec, Claims};

/// HS256 bearer token authenticator
#[derive(Clone)]
pub struct JwtAuthenticator {
    name: String,
    header: String,
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(name: impl Into<String>, secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;

        Self {
            name: name.into(),
            header: "authorization".to_string(),
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    /// Build from an auth declaration; the secret comes from `secret` or the `secret_env` variable
    pub fn from_spec(spec: &AuthSpec) -> Result<Self, AuthError> {
        let secret = match (&spec.secret, &spec.secret_env) {
            (Some(secret), _) => secret.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                AuthError::Config(format!(
                    "environment variable {} for auth '{}' is not set",
                    var, spec.name
                ))
            })?,
            (None, None) => {
                return Err(AuthError::Config(format!(
                    "jwt auth '{}' needs `secret` or `secret_env`",
                    spec.name
                )))
            }
        };
        if secret.is_empty() {
            return Err(AuthError::Config(format!(
                "jwt auth '{}' has an empty secret",
                spec.name
            )));
        }

        let mut authenticator = Self::new(&spec.name, secret.as_bytes());
        if let Some(header) = &spec.header {
            authenticator.header = header.to_ascii_lowercase();
        }
        if let Some(issuer) = &spec.issuer {
            authenticator = authenticator.with_issuer(issuer);
        }
        if let Some(audience) = &spec.audience {
            authenticator = authenticator.with_audience(audience);
        }
        Ok(authenticator)
    }
}

#[async_trait::async_trait]
impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Claims>, AuthError> {
        let Some(value) = header_value(headers, &self.header) else {
            return Ok(None);
        };

        let token = match value.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => return Ok(None),
        };

        let data = decode::<Value>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;

        Ok(Some(Claims::new(data.claims)))
    }
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("name", &self.name)
            .field("header", &self.header)
            .finish()
    }
}
