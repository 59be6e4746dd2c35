use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::model::{EndpointSpec, LogicStep};

/// The parsed service description the compiler walks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceSpec {
    pub name: String,
    pub version: Option<String>,
    pub auth: Vec<AuthSpec>,
    pub roles: Vec<RoleSpec>,
    pub middleware: Vec<MiddlewareSpec>,
    pub models: Vec<ModelSpec>,
    pub collections: Vec<ModelSpec>,
    pub integrations: Vec<IntegrationSpec>,
    pub workflows: Vec<WorkflowSpec>,
    pub events: Vec<EventSpec>,
    pub event_handlers: Vec<EventHandlerSpec>,
    pub endpoints: Vec<EndpointSpec>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: EndpointSpec) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareSpec) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_auth(mut self, auth: AuthSpec) -> Self {
        self.auth.push(auth);
        self
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_event(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Jwt,
    ApiKey,
}

/// Auth provider declaration referenced by authentication middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AuthKind,
    /// Inline HMAC secret for `jwt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Environment variable holding the HMAC secret for `jwt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Header carrying the key for `api_key` (default `x-api-key`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// API key to claims mapping for `api_key`
    #[serde(default)]
    pub keys: HashMap<String, Value>,
}

impl AuthSpec {
    pub fn new(name: impl Into<String>, kind: AuthKind) -> Self {
        Self {
            name: name.into(),
            kind,
            secret: None,
            secret_env: None,
            issuer: None,
            audience: None,
            header: None,
            keys: HashMap::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>, claims: Value) -> Self {
        self.keys.insert(key.into(), claims);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Named middleware configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddlewareSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl MiddlewareSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Model or collection declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: false,
            unique: false,
            primary: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// External system reachable through the `call` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_integration_kind")]
    pub kind: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_integration_kind() -> String {
    "http".to_string()
}

/// Workflow declaration; the definition is opaque to the core and handed to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub definition: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl EventSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }
}

/// Step list run whenever the named event is emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHandlerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub event: String,
    #[serde(default)]
    pub steps: Vec<LogicStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
    Auto,
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read service definition {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse service definition as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse service definition as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Parse a service definition from text
pub fn parse_service_spec(
    input: &str,
    format: DefinitionFormat,
) -> Result<ServiceSpec, DefinitionError> {
    match format {
        DefinitionFormat::Json => Ok(serde_json::from_str(input)?),
        DefinitionFormat::Yaml => Ok(serde_yaml::from_str(input)?),
        DefinitionFormat::Auto => {
            let trimmed = input.trim_start();
            if trimmed.starts_with('{') {
                match serde_json::from_str(input) {
                    Ok(spec) => Ok(spec),
                    Err(e) => serde_yaml::from_str(input).map_err(|_| DefinitionError::Json(e)),
                }
            } else {
                Ok(serde_yaml::from_str(input)?)
            }
        }
    }
}

/// Load a service definition from disk, picking the format from the file extension
pub fn load_service_spec(path: impl AsRef<Path>) -> Result<ServiceSpec, DefinitionError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => DefinitionFormat::Json,
        Some("yaml") | Some("yml") => DefinitionFormat::Yaml,
        _ => DefinitionFormat::Auto,
    };

    parse_service_spec(&text, format)
}
