use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{
    ApiKeyAuthenticator, AuthChain, AuthError, AuthMode, Authenticator, JwtAuthenticator,
};
use crate::model::{AuthKind, AuthSpec, MiddlewareSpec, RoleSpec, ServiceSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareKind {
    Authentication,
    RateLimiting,
    Cors,
    Logging,
    Other(String),
}

impl MiddlewareKind {
    pub fn parse(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "authentication" | "auth" => MiddlewareKind::Authentication,
            "rate_limiting" | "rate_limit" | "ratelimit" => MiddlewareKind::RateLimiting,
            "cors" => MiddlewareKind::Cors,
            "logging" | "log" => MiddlewareKind::Logging,
            other => MiddlewareKind::Other(other.to_string()),
        }
    }
}

/// Resolved middleware configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareDescriptor {
    pub name: String,
    pub kind: MiddlewareKind,
    pub config: Map<String, Value>,
}

impl MiddlewareDescriptor {
    pub fn new(name: impl Into<String>, kind: MiddlewareKind) -> Self {
        Self {
            name: name.into(),
            kind,
            config: Map::new(),
        }
    }

    /// `config.required`, defaulting to true
    pub fn auth_mode(&self) -> AuthMode {
        match self.config.get("required").and_then(Value::as_bool) {
            Some(false) => AuthMode::Optional,
            _ => AuthMode::Required,
        }
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Source of middleware descriptors and auth chains for the compiler
pub trait AuthConfigLoader: Send + Sync {
    fn resolve(&self, name: &str) -> Option<MiddlewareDescriptor>;

    fn build_auth_chain(
        &self,
        descriptor: &MiddlewareDescriptor,
        mode: AuthMode,
    ) -> Result<AuthChain, AuthError>;

    /// Whether a role named in an endpoint annotation is known
    fn role_declared(&self, _role: &str) -> bool {
        true
    }
}

/// Loader backed by the `auth`, `roles` and `middleware` sections of a service definition
#[derive(Debug, Clone, Default)]
pub struct SpecAuthLoader {
    auth: HashMap<String, AuthSpec>,
    roles: HashMap<String, RoleSpec>,
    middleware: HashMap<String, MiddlewareSpec>,
}

impl SpecAuthLoader {
    pub fn from_spec(spec: &ServiceSpec) -> Self {
        let mut loader = Self::default();
        for auth in &spec.auth {
            loader.add_auth(auth.clone());
        }
        for role in &spec.roles {
            loader.roles.insert(role.name.clone(), role.clone());
        }
        for middleware in &spec.middleware {
            loader.add_middleware(middleware.clone());
        }
        loader
    }

    pub fn add_auth(&mut self, auth: AuthSpec) {
        self.auth.insert(auth.name.clone(), auth);
    }

    pub fn add_middleware(&mut self, middleware: MiddlewareSpec) {
        if self.middleware.contains_key(&middleware.name) {
            log::warn!(
                "Middleware '{}' declared more than once, keeping the last declaration",
                middleware.name
            );
        }
        self.middleware.insert(middleware.name.clone(), middleware);
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.get(name)
    }

    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }

    fn provider_names(&self, descriptor: &MiddlewareDescriptor) -> Vec<String> {
        if let Some(list) = descriptor.config.get("providers").and_then(Value::as_array) {
            return list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(provider) = descriptor.config_str("provider") {
            return vec![provider.to_string()];
        }
        if self.auth.contains_key(&descriptor.name) || self.auth.len() != 1 {
            return vec![descriptor.name.clone()];
        }
        // a single declared provider serves every authentication middleware
        self.auth.keys().cloned().collect()
    }
}

impl AuthConfigLoader for SpecAuthLoader {
    fn role_declared(&self, role: &str) -> bool {
        !self.has_roles() || self.roles.contains_key(role)
    }

    fn resolve(&self, name: &str) -> Option<MiddlewareDescriptor> {
        if let Some(spec) = self.middleware.get(name) {
            return Some(MiddlewareDescriptor {
                name: spec.name.clone(),
                kind: MiddlewareKind::parse(&spec.kind),
                config: spec.config.clone(),
            });
        }

        // bare references to an auth provider or a built-in stage need no middleware entry
        if self.auth.contains_key(name) {
            return Some(MiddlewareDescriptor::new(name, MiddlewareKind::Authentication));
        }
        match MiddlewareKind::parse(name) {
            kind @ (MiddlewareKind::Cors | MiddlewareKind::Logging) => {
                Some(MiddlewareDescriptor::new(name, kind))
            }
            _ => None,
        }
    }

    fn build_auth_chain(
        &self,
        descriptor: &MiddlewareDescriptor,
        mode: AuthMode,
    ) -> Result<AuthChain, AuthError> {
        let mut chain = AuthChain::new(mode);

        for provider in self.provider_names(descriptor) {
            let spec = self.auth.get(&provider).ok_or_else(|| {
                AuthError::Config(format!(
                    "middleware '{}' references unknown auth provider '{}'",
                    descriptor.name, provider
                ))
            })?;

            let authenticator: Arc<dyn Authenticator> = match spec.kind {
                AuthKind::Jwt => Arc::new(JwtAuthenticator::from_spec(spec)?),
                AuthKind::ApiKey => Arc::new(ApiKeyAuthenticator::from_spec(spec)?),
            };
            chain = chain.with(authenticator);
        }

        if chain.is_empty() {
            return Err(AuthError::Config(format!(
                "middleware '{}' has no auth providers",
                descriptor.name
            )));
        }
        Ok(chain)
    }
}
