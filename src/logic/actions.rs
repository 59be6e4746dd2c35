use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::logic::interpreter::{Services, StepExecutor};
use crate::logic::operand::{interpolate, resolve_name, value_to_key, Condition, Operand};
use crate::logic::{ExecutionContext, LogicError};
use crate::model::LogicStep;
use crate::registry::WorkflowError;

/// Built-in actions under every name they answer to
pub fn builtin_actions() -> Vec<(&'static str, Arc<dyn StepExecutor>)> {
    let find: Arc<dyn StepExecutor> = Arc::new(Find);
    let find_one: Arc<dyn StepExecutor> = Arc::new(FindOne);
    let insert: Arc<dyn StepExecutor> = Arc::new(Insert);
    let update: Arc<dyn StepExecutor> = Arc::new(Update);
    let delete: Arc<dyn StepExecutor> = Arc::new(Delete);
    let start_workflow: Arc<dyn StepExecutor> = Arc::new(StartWorkflow);

    vec![
        ("validate", Arc::new(Validate) as Arc<dyn StepExecutor>),
        ("authorize", Arc::new(Authorize) as Arc<dyn StepExecutor>),
        ("db.find", find.clone()),
        ("find", find),
        ("db.findOne", find_one.clone()),
        ("findOne", find_one),
        ("db.insert", insert.clone()),
        ("insert", insert),
        ("db.update", update.clone()),
        ("update", update),
        ("db.delete", delete.clone()),
        ("delete", delete),
        ("transform", Arc::new(Transform) as Arc<dyn StepExecutor>),
        ("emit", Arc::new(Emit) as Arc<dyn StepExecutor>),
        ("call", Arc::new(Call) as Arc<dyn StepExecutor>),
        ("cache.get", Arc::new(CacheGet) as Arc<dyn StepExecutor>),
        ("cache.set", Arc::new(CacheSet) as Arc<dyn StepExecutor>),
        ("workflow.start", start_workflow.clone()),
        ("startWorkflow", start_workflow),
    ]
}

/// Name-like argument at `index`, taken raw unless it is a reference
fn required_name(
    step: &LogicStep,
    index: usize,
    what: &str,
    ctx: &ExecutionContext,
) -> Result<String, LogicError> {
    let raw = step
        .arg(index)
        .ok_or_else(|| LogicError::invalid_step(&step.action, format!("missing {}", what)))?;

    match resolve_name(raw, ctx) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(LogicError::invalid_step(
            &step.action,
            format!("could not resolve {} from `{}`", what, raw),
        )),
    }
}

/// Value argument at `index`; a missing argument means the whole request input
fn value_or_input(step: &LogicStep, index: usize, ctx: &ExecutionContext) -> Option<Value> {
    match step.arg(index) {
        Some(raw) => Operand::parse(raw).resolve(ctx),
        None => Some(ctx.input()),
    }
}

/// Record id at `index`, rendered as a string
fn resolve_id(
    step: &LogicStep,
    index: usize,
    resource: &str,
    ctx: &ExecutionContext,
) -> Result<String, LogicError> {
    let raw = step
        .arg(index)
        .ok_or_else(|| LogicError::invalid_step(&step.action, "missing id argument"))?;

    match Operand::parse(raw).resolve(ctx) {
        Some(Value::Null) | None => Err(LogicError::Validation(format!(
            "{} id `{}` is missing",
            resource, raw
        ))),
        Some(value) => Ok(value_to_key(&value)),
    }
}

/// Data argument at `index` for writes; absent or null data is a validation failure
fn required_data(
    step: &LogicStep,
    index: usize,
    resource: &str,
    ctx: &ExecutionContext,
) -> Result<Value, LogicError> {
    match value_or_input(step, index, ctx) {
        Some(Value::Null) | None => Err(LogicError::Validation(format!(
            "no data provided for {}",
            resource
        ))),
        Some(data) => Ok(data),
    }
}

pub struct Validate;

#[async_trait::async_trait]
impl StepExecutor for Validate {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let target = step.arg(0).unwrap_or("request");
        let value = match Operand::parse(target).resolve(ctx) {
            Some(Value::Null) | None => {
                return Err(LogicError::Validation(format!("{} is required", target)))
            }
            Some(value) => value,
        };

        if let Some(model_name) = step.arg(1) {
            match services.types.get(model_name) {
                Some(model) => {
                    let missing = model.missing_required(&value);
                    if !missing.is_empty() {
                        return Err(LogicError::Validation(format!(
                            "{} is missing required field(s): {}",
                            model.name,
                            missing.join(", ")
                        )));
                    }
                }
                None => log::warn!("validate: unknown model '{}', skipping field checks", model_name),
            }
        }

        Ok(None)
    }
}

pub struct Authorize;

#[async_trait::async_trait]
impl StepExecutor for Authorize {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        _services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let Some(raw_role) = step.arg(1) else {
            return Ok(None);
        };
        let role = resolve_name(raw_role, ctx).unwrap_or_default();

        let claims = ctx
            .claims()
            .ok_or_else(|| LogicError::Authorization("authentication required".to_string()))?;

        if role.is_empty() || !claims.has_role(&role) {
            let subject = step.arg(0).unwrap_or("caller");
            return Err(LogicError::Authorization(format!(
                "{} lacks role '{}'",
                subject, role
            )));
        }
        Ok(None)
    }
}

pub struct Find;

#[async_trait::async_trait]
impl StepExecutor for Find {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let resource = required_name(step, 0, "resource", ctx)?;

        let filter = match step.arg(1).or(step.condition.as_deref()) {
            Some(raw) => Condition::parse(raw)
                .map_err(|reason| LogicError::invalid_step(&step.action, reason))?
                .to_filter(ctx),
            None => Default::default(),
        };

        let rows = services
            .persistence
            .find(&resource, &filter)
            .await
            .map_err(|e| LogicError::persistence(&resource, e))?;

        Ok(Some(Value::Array(rows)))
    }
}

pub struct FindOne;

#[async_trait::async_trait]
impl StepExecutor for FindOne {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let resource = required_name(step, 0, "resource", ctx)?;
        let id = resolve_id(step, 1, &resource, ctx)?;

        let row = services
            .persistence
            .find_one(&resource, &id)
            .await
            .map_err(|e| LogicError::persistence(&resource, e))?;

        match row {
            Some(row) => Ok(Some(row)),
            None => Err(LogicError::NotFound { resource, id }),
        }
    }
}

pub struct Insert;

#[async_trait::async_trait]
impl StepExecutor for Insert {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let resource = required_name(step, 0, "resource", ctx)?;
        let data = required_data(step, 1, &resource, ctx)?;

        let id = services
            .persistence
            .insert(&resource, data)
            .await
            .map_err(|e| LogicError::persistence(&resource, e))?;

        Ok(Some(json!({ "id": id })))
    }
}

pub struct Update;

#[async_trait::async_trait]
impl StepExecutor for Update {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let resource = required_name(step, 0, "resource", ctx)?;
        let id = resolve_id(step, 1, &resource, ctx)?;
        let data = required_data(step, 2, &resource, ctx)?;

        services
            .persistence
            .update(&resource, &id, data)
            .await
            .map_err(|e| LogicError::persistence(&resource, e))?;

        Ok(Some(json!({ "updated": true })))
    }
}

pub struct Delete;

#[async_trait::async_trait]
impl StepExecutor for Delete {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let resource = required_name(step, 0, "resource", ctx)?;
        let id = resolve_id(step, 1, &resource, ctx)?;

        services
            .persistence
            .delete(&resource, &id)
            .await
            .map_err(|e| LogicError::persistence(&resource, e))?;

        Ok(Some(json!({ "deleted": true })))
    }
}

pub struct Transform;

#[async_trait::async_trait]
impl StepExecutor for Transform {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let name = required_name(step, 0, "transform name", ctx)?;
        let data = value_or_input(step, 1, ctx).unwrap_or(Value::Null);

        let transformed = services
            .transforms
            .apply(&name, data)
            .map_err(|e| LogicError::Transform {
                name,
                message: format!("{:#}", e),
            })?;

        Ok(Some(transformed))
    }
}

pub struct Emit;

#[async_trait::async_trait]
impl StepExecutor for Emit {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let event = required_name(step, 0, "event name", ctx)?;
        let payload = value_or_input(step, 1, ctx).unwrap_or(Value::Null);

        services
            .events
            .emit_at(&event, payload, ctx.event_depth())
            .await
            .map_err(|e| LogicError::Event {
                event,
                message: e.to_string(),
            })?;

        Ok(None)
    }
}

pub struct Call;

#[async_trait::async_trait]
impl StepExecutor for Call {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let integration = required_name(step, 0, "integration", ctx)?;
        let method = step
            .arg(1)
            .and_then(|raw| resolve_name(raw, ctx))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "GET".to_string())
            .to_ascii_uppercase();
        let path = step.arg(2).map(|raw| interpolate(raw, ctx)).unwrap_or_default();
        let body = step
            .arg(3)
            .and_then(|raw| Operand::parse(raw).resolve(ctx));

        let client = services
            .integrations
            .get(&integration)
            .ok_or_else(|| LogicError::Integration {
                integration: integration.clone(),
                message: "integration is not registered".to_string(),
            })?;

        let response = client
            .invoke(&method, &path, body)
            .await
            .map_err(|e| LogicError::Integration {
                integration,
                message: format!("{:#}", e),
            })?;

        Ok(Some(response))
    }
}

pub struct CacheGet;

#[async_trait::async_trait]
impl StepExecutor for CacheGet {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let key = required_name(step, 0, "cache key", ctx)?;

        let value = services
            .cache
            .get(&key)
            .await
            .map_err(|e| LogicError::Cache(format!("{:#}", e)))?;

        Ok(Some(value.unwrap_or(Value::Null)))
    }
}

pub struct CacheSet;

#[async_trait::async_trait]
impl StepExecutor for CacheSet {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let key = required_name(step, 0, "cache key", ctx)?;
        let value = value_or_input(step, 1, ctx).unwrap_or(Value::Null);

        let ttl = match step.arg(2) {
            Some(raw) => {
                let seconds = match Operand::parse(raw).resolve(ctx) {
                    Some(Value::Number(n)) => n.as_u64(),
                    Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
                    _ => None,
                };
                let seconds = seconds.ok_or_else(|| {
                    LogicError::invalid_step(&step.action, format!("invalid ttl `{}`", raw))
                })?;
                let ttl = Duration::from_secs(seconds);
                if Instant::now().checked_add(ttl).is_none() {
                    return Err(LogicError::Validation(format!(
                        "ttl of {} seconds is out of range",
                        seconds
                    )));
                }
                Some(ttl)
            }
            None => None,
        };

        services
            .cache
            .set(&key, value, ttl)
            .await
            .map_err(|e| LogicError::Cache(format!("{:#}", e)))?;

        Ok(None)
    }
}

pub struct StartWorkflow;

#[async_trait::async_trait]
impl StepExecutor for StartWorkflow {
    async fn execute(
        &self,
        step: &LogicStep,
        ctx: &ExecutionContext,
        services: &Services,
    ) -> Result<Option<Value>, LogicError> {
        let workflow = required_name(step, 0, "workflow", ctx)?;
        let input = value_or_input(step, 1, ctx).unwrap_or(Value::Null);

        let run_id = services
            .workflows
            .start(&workflow, input)
            .await
            .map_err(|e| match e {
                WorkflowError::Unknown(_) => LogicError::Workflow {
                    workflow: workflow.clone(),
                    message: "workflow is not declared".to_string(),
                },
                WorkflowError::Start { message, .. } => LogicError::Workflow {
                    workflow: workflow.clone(),
                    message,
                },
            })?;

        Ok(Some(json!({ "run_id": run_id })))
    }
}
