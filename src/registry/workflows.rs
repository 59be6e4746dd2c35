use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{generate_id, WorkflowSpec};

/// Opaque handle to a declared workflow
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowHandle {
    pub name: String,
    pub definition: Value,
}

/// Engine that actually runs workflows
#[async_trait::async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a run and return its identifier
    async fn start(&self, workflow: &WorkflowHandle, input: Value) -> Result<String>;
}

/// Engine used when no workflow backend is wired in: logs the start and hands back a run id
#[derive(Debug, Clone, Default)]
pub struct DetachedWorkflowEngine;

#[async_trait::async_trait]
impl WorkflowEngine for DetachedWorkflowEngine {
    async fn start(&self, workflow: &WorkflowHandle, input: Value) -> Result<String> {
        let run_id = generate_id();
        log::info!(
            "Workflow '{}' accepted as run {} ({} input bytes)",
            workflow.name,
            run_id,
            input.to_string().len()
        );
        Ok(run_id)
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow '{0}'")]
    Unknown(String),
    #[error("workflow '{name}' failed to start: {message}")]
    Start { name: String, message: String },
}

/// Declared workflows plus the engine that starts them
#[derive(Clone)]
pub struct WorkflowRegistry {
    handles: HashMap<String, WorkflowHandle>,
    engine: Arc<dyn WorkflowEngine>,
}

impl WorkflowRegistry {
    pub fn new(engine: Arc<dyn WorkflowEngine>) -> Self {
        Self {
            handles: HashMap::new(),
            engine,
        }
    }

    pub fn register(&mut self, spec: &WorkflowSpec) {
        self.handles.insert(
            spec.name.clone(),
            WorkflowHandle {
                name: spec.name.clone(),
                definition: spec.definition.clone(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowHandle> {
        self.handles.get(name)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn start(&self, name: &str, input: Value) -> Result<String, WorkflowError> {
        let handle = self
            .get(name)
            .ok_or_else(|| WorkflowError::Unknown(name.to_string()))?;

        self.engine
            .start(handle, input)
            .await
            .map_err(|e| WorkflowError::Start {
                name: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DetachedWorkflowEngine))
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handles.keys().collect();
        names.sort();
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn onboarding() -> WorkflowSpec {
        WorkflowSpec {
            name: "onboarding".into(),
            description: None,
            definition: json!({"steps": ["welcome", "verify"]}),
        }
    }

    #[tokio::test]
    async fn test_start_registered_workflow() {
        let mut registry = WorkflowRegistry::default();
        registry.register(&onboarding());

        let run_id = registry.start("onboarding", json!({"user": "u1"})).await.unwrap();
        assert!(!run_id.is_empty());
        assert_eq!(
            registry.get("onboarding").unwrap().definition["steps"][0],
            json!("welcome")
        );
    }

    #[tokio::test]
    async fn test_start_unknown_workflow() {
        let registry = WorkflowRegistry::default();
        let err = registry.start("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Unknown(name) if name == "missing"));
    }

    struct Failing;

    #[async_trait::async_trait]
    impl WorkflowEngine for Failing {
        async fn start(&self, _workflow: &WorkflowHandle, _input: Value) -> Result<String> {
            Err(anyhow::anyhow!("engine offline"))
        }
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported() {
        let mut registry = WorkflowRegistry::new(Arc::new(Failing));
        registry.register(&onboarding());

        let err = registry.start("onboarding", json!({})).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "workflow 'onboarding' failed to start: engine offline"
        );
    }
}
