pub mod api_key;
pub mod jwt;
pub mod loader;

pub use api_key::*;
pub use jwt::*;
pub use loader::*;

use axum::http::HeaderMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::Claims;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("auth configuration error: {0}")]
    Config(String),
}

/// Turns request headers into caller claims.
///
/// `Ok(None)` means the request carries no credentials this authenticator understands;
/// credentials that are present but wrong are an `InvalidCredentials` error.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Claims>, AuthError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Reject requests without credentials
    Required,
    /// Let anonymous requests through without claims
    Optional,
}

/// Authenticators tried in order under one enforcement mode
#[derive(Clone)]
pub struct AuthChain {
    mode: AuthMode,
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            authenticators: Vec::new(),
        }
    }

    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// First authenticator to recognize credentials wins. Invalid credentials fail in
    /// both modes; absent credentials fail only in `Required` mode.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Claims>, AuthError> {
        for authenticator in &self.authenticators {
            if let Some(claims) = authenticator.authenticate(headers).await? {
                log::debug!("Authenticated by '{}'", authenticator.name());
                return Ok(Some(claims));
            }
        }

        match self.mode {
            AuthMode::Required => Err(AuthError::MissingCredentials),
            AuthMode::Optional => Ok(None),
        }
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.authenticators.iter().map(|a| a.name()).collect();
        f.debug_struct("AuthChain")
            .field("mode", &self.mode)
            .field("authenticators", &names)
            .finish()
    }
}

/// Header value as string, ignoring values that are not valid UTF-8
pub(crate) fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
