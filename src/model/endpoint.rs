use serde::{Deserialize, Serialize};

use crate::model::RequestSource;

/// One endpoint declaration: method, colon-style path template and its logic body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub method: String,

    /// Path template with colon parameters, e.g. `/users/:id`
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,

    #[serde(default)]
    pub steps: Vec<LogicStep>,

    #[serde(default)]
    pub middleware: Vec<String>,

    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl EndpointSpec {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            request: None,
            response: None,
            steps: Vec::new(),
            middleware: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn with_request(mut self, name: impl Into<String>, source: RequestSource) -> Self {
        self.request = Some(RequestSpec {
            name: name.into(),
            source,
        });
        self
    }

    pub fn with_response(mut self, type_name: impl Into<String>, status: u16) -> Self {
        self.response = Some(ResponseSpec {
            type_name: Some(type_name.into()),
            status: Some(status),
        });
        self
    }

    pub fn with_step(mut self, step: LogicStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_middleware(mut self, name: impl Into<String>) -> Self {
        self.middleware.push(name.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.annotations.push(Annotation {
            key: key.into(),
            value: value.map(str::to_string),
        });
        self
    }

    /// `METHOD /path` label used in diagnostics
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    pub fn annotation(&self, key: &str) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.key.eq_ignore_ascii_case(key))
    }

    /// Source the request payload is extracted from (body when undeclared)
    pub fn request_source(&self) -> RequestSource {
        self.request
            .as_ref()
            .map(|r| r.source)
            .unwrap_or_default()
    }

    /// Declared success status, 200 when undeclared
    pub fn success_status(&self) -> u16 {
        self.response
            .as_ref()
            .and_then(|r| r.status)
            .unwrap_or(200)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub name: String,
    #[serde(default)]
    pub source: RequestSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Endpoint annotation such as `deprecated`, `role = admin` or `rate_limit = 100`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One interpreter instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicStep {
    pub action: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Variable the step result is stored under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// `field = value` filter expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl LogicStep {
    pub fn new<I, S>(action: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: action.into(),
            args: args.into_iter().map(Into::into).collect(),
            target: None,
            condition: None,
        }
    }

    pub fn into_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}
