use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::model::IntegrationSpec;

/// Client for one external system, invoked by the `call` action
#[async_trait::async_trait]
pub trait IntegrationClient: Send + Sync {
    async fn invoke(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value>;
}

/// Integration clients by declared name
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    clients: HashMap<String, Arc<dyn IntegrationClient>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn IntegrationClient>) {
        self.clients.insert(name.into(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IntegrationClient>> {
        self.clients.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.clients.keys().collect();
        names.sort();
        f.debug_struct("IntegrationRegistry")
            .field("clients", &names)
            .finish()
    }
}

/// JSON-over-HTTP integration rooted at a base URL
#[derive(Debug, Clone)]
pub struct HttpIntegrationClient {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpIntegrationClient {
    pub fn from_spec(spec: &IntegrationSpec) -> Result<Self> {
        if spec.base_url.is_empty() {
            return Err(anyhow!("integration '{}' has no base_url", spec.name));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &spec.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{}'", name))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{}'", name))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout_ms) = spec.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder
            .build()
            .with_context(|| format!("failed to build HTTP client for '{}'", spec.name))?;

        Ok(Self {
            name: spec.name.clone(),
            base_url: spec.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait::async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn invoke(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method '{}'", method))?;
        let url = self.url(path);

        log::debug!("{} calling {} {}", self.name, method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))?;

        let text = response.text().await.context("failed to read response body")?;
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(base_url: &str) -> IntegrationSpec {
        IntegrationSpec {
            name: "billing".into(),
            kind: "http".into(),
            base_url: base_url.into(),
            headers: HashMap::from([("x-api-key".to_string(), "secret".to_string())]),
            timeout_ms: Some(2_000),
        }
    }

    #[test]
    fn test_url_joining() {
        let client = HttpIntegrationClient::from_spec(&spec("http://billing.local/")).unwrap();
        assert_eq!(client.url("/invoices"), "http://billing.local/invoices");
        assert_eq!(client.url("invoices"), "http://billing.local/invoices");
        assert_eq!(client.url(""), "http://billing.local");
    }

    #[test]
    fn test_missing_base_url_rejected() {
        assert!(HttpIntegrationClient::from_spec(&spec("")).is_err());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut bad = spec("http://billing.local");
        bad.headers.insert("bad header".into(), "x".into());
        assert!(HttpIntegrationClient::from_spec(&bad).is_err());
    }

    struct Echo;

    #[async_trait::async_trait]
    impl IntegrationClient for Echo {
        async fn invoke(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value> {
            Ok(serde_json::json!({"method": method, "path": path, "body": body}))
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = IntegrationRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let client = registry.get("echo").unwrap();
        let reply = client.invoke("GET", "/ping", None).await.unwrap();
        assert_eq!(reply["path"], "/ping");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }
}
