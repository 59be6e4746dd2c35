use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::logic::actions::builtin_actions;
use crate::logic::{ExecutionContext, LogicError, TransformRegistry};
use crate::model::LogicStep;
use crate::registry::{EventRegistry, IntegrationRegistry, TypeRegistry, WorkflowRegistry};
use crate::store::{CacheStore, MemoryCache, NullPersistence, Persistence};

/// Adapters and registries a step may call out to
#[derive(Clone)]
pub struct Services {
    pub persistence: Arc<dyn Persistence>,
    pub cache: Arc<dyn CacheStore>,
    pub types: Arc<TypeRegistry>,
    pub integrations: Arc<IntegrationRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
    pub events: Arc<EventRegistry>,
    pub transforms: TransformRegistry,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            persistence: Arc::new(NullPersistence),
            cache: Arc::new(MemoryCache::new()),
            types: Arc::new(TypeRegistry::new()),
            integrations: Arc::new(IntegrationRegistry::new()),
            workflows: Arc::new(WorkflowRegistry::default()),
            events: Arc::new(EventRegistry::new()),
            transforms: TransformRegistry::new(),
        }
    }
}

/// One action implementation.
///
/// `Ok(Some(value))` is stored under the step target, or becomes the running result when
/// the step has no target. `Ok(None)` leaves both untouched.
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError>;
}

/// Runs step lists against an execution context
pub struct Interpreter {
    actions: HashMap<String, Arc<dyn StepExecutor>>,
    services: Arc<Services>,
}

impl Interpreter {
    /// Interpreter with every built-in action registered
    pub fn new(services: Arc<Services>) -> Self {
        let mut interpreter = Self {
            actions: HashMap::new(),
            services,
        };
        for (name, executor) in builtin_actions() {
            interpreter.actions.insert(name.to_string(), executor);
        }
        interpreter
    }

    /// Add or replace an action
    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        let name = name.into();
        if self.actions.insert(name.clone(), executor).is_some() {
            log::debug!("Action '{}' overridden", name);
        }
    }

    pub fn supports(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Execute `steps` in order. The first failing step aborts the sequence; effects of
    /// earlier steps are kept. Unknown actions are skipped.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        steps: &[LogicStep],
    ) -> Result<Value, LogicError> {
        for (index, step) in steps.iter().enumerate() {
            let Some(executor) = self.actions.get(step.action.as_str()) else {
                log::warn!(
                    "Skipping step {} with unknown action '{}'",
                    index,
                    step.action
                );
                continue;
            };

            match executor.execute(step, ctx, &self.services).await {
                Ok(Some(value)) => match &step.target {
                    Some(target) => ctx.set(target.clone(), value),
                    None => ctx.set_result(value),
                },
                Ok(None) => {}
                Err(e) => {
                    log::debug!("Step {} ({}) failed: {}", index, step.action, e);
                    return Err(e);
                }
            }
        }

        Ok(ctx.result().unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("Interpreter")
            .field("actions", &actions)
            .finish()
    }
}
