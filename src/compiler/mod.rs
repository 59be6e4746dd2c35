pub mod middleware;
pub mod path;

pub use middleware::*;
pub use path::*;

use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::routing::{on, options, MethodFilter, MethodRouter};
use axum::Router;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

use crate::api::handlers::EndpointHandler;
use crate::auth::{AuthConfigLoader, AuthError, MiddlewareKind, SpecAuthLoader};
use crate::logic::{ExecutionContext, Interpreter, Services, StepExecutor, TransformRegistry};
use crate::model::{Annotation, EndpointSpec, EventHandlerSpec, LogicStep, ServiceSpec};
use crate::registry::{
    DetachedWorkflowEngine, Event, EventRegistry, EventSubscriber, HttpIntegrationClient,
    IntegrationClient, IntegrationRegistry, ModelKind, ModelType, TypeRegistry, WorkflowEngine,
    WorkflowRegistry,
};
use crate::store::{CacheStore, MemoryCache, NullPersistence, Persistence};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{endpoint}: unsupported HTTP method '{method}'")]
    UnsupportedMethod { endpoint: String, method: String },

    #[error("{endpoint}: invalid path: {reason}")]
    InvalidPath { endpoint: String, reason: String },

    #[error("{endpoint}: route conflicts with {existing}")]
    RouteConflict { endpoint: String, existing: String },

    #[error("{endpoint}: middleware '{name}' could not be built: {source}")]
    Middleware {
        endpoint: String,
        name: String,
        #[source]
        source: AuthError,
    },

    #[error("{endpoint}: unknown middleware '{name}'")]
    UnknownMiddleware { endpoint: String, name: String },

    #[error("integration '{name}' could not be built: {message}")]
    Integration { name: String, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Fail on middleware names the auth loader cannot resolve instead of skipping them
    pub strict_middleware: bool,
    /// Deadline applied to every request's step execution
    pub request_timeout: Option<Duration>,
}

/// One registered route
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInfo {
    pub method: Method,
    /// Path as declared, colon syntax
    pub template: String,
    /// Path as registered with axum
    pub path: String,
    pub params: Vec<String>,
    /// Middleware names that produced a stage, outermost first
    pub middleware: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl RouteInfo {
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.template)
    }
}

/// Everything the compiler produced for one service
#[derive(Clone)]
pub struct GeneratedRuntime {
    pub name: String,
    router: Router,
    routes: Vec<RouteInfo>,
    /// Stages wrapping each route, indexed like `routes`
    route_stages: Vec<Vec<SharedStage>>,
    middleware: Arc<MiddlewareCache>,
    types: Arc<TypeRegistry>,
    integrations: Arc<IntegrationRegistry>,
    workflows: Arc<WorkflowRegistry>,
    events: Arc<EventRegistry>,
    interpreter: Arc<Interpreter>,
}

impl GeneratedRuntime {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Stages applied to the route at `index` in [`GeneratedRuntime::routes`], outermost first
    pub fn stages(&self, index: usize) -> &[SharedStage] {
        self.route_stages.get(index).map_or(&[], Vec::as_slice)
    }

    pub fn middleware(&self) -> &MiddlewareCache {
        &self.middleware
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn integrations(&self) -> &IntegrationRegistry {
        &self.integrations
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }
}

impl std::fmt::Debug for GeneratedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedRuntime")
            .field("name", &self.name)
            .field("routes", &self.routes.len())
            .field("middleware", &self.middleware)
            .field("types", &self.types.names())
            .field("events", &self.events)
            .finish()
    }
}

/// Compiles service definitions into routers.
///
/// Adapters default to [`NullPersistence`], an in-memory cache and the detached workflow
/// engine; callers swap them in with the `with_*` methods before calling [`Compiler::compile`].
pub struct Compiler {
    options: CompileOptions,
    persistence: Arc<dyn Persistence>,
    cache: Arc<dyn CacheStore>,
    actions: Vec<(String, Arc<dyn StepExecutor>)>,
    transforms: TransformRegistry,
    integrations: IntegrationRegistry,
    workflow_engine: Arc<dyn WorkflowEngine>,
    auth_loader: Option<Arc<dyn AuthConfigLoader>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            options: CompileOptions::default(),
            persistence: Arc::new(NullPersistence),
            cache: Arc::new(MemoryCache::new()),
            actions: Vec::new(),
            transforms: TransformRegistry::new(),
            integrations: IntegrationRegistry::new(),
            workflow_engine: Arc::new(DetachedWorkflowEngine),
            auth_loader: None,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Add an action or replace a built-in one
    pub fn with_action(mut self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.actions.push((name.into(), executor));
        self
    }

    pub fn with_transform<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.transforms.register(name, transform);
        self
    }

    /// Client used for a declared integration instead of building one from its definition
    pub fn with_integration(
        mut self,
        name: impl Into<String>,
        client: Arc<dyn IntegrationClient>,
    ) -> Self {
        self.integrations.register(name, client);
        self
    }

    pub fn with_workflow_engine(mut self, engine: Arc<dyn WorkflowEngine>) -> Self {
        self.workflow_engine = engine;
        self
    }

    /// Replace the loader built from the definition's `auth`/`middleware` sections
    pub fn with_auth_loader(mut self, loader: Arc<dyn AuthConfigLoader>) -> Self {
        self.auth_loader = Some(loader);
        self
    }

    pub fn compile(&self, spec: &ServiceSpec) -> Result<GeneratedRuntime, CompileError> {
        // 1. auth configuration and types
        let loader: Arc<dyn AuthConfigLoader> = match &self.auth_loader {
            Some(loader) => loader.clone(),
            None => Arc::new(SpecAuthLoader::from_spec(spec)),
        };
        let types = Arc::new(build_types(spec));

        // 2. integrations
        let integrations = Arc::new(self.build_integrations(spec)?);

        // 3. workflows
        let mut workflows = WorkflowRegistry::new(self.workflow_engine.clone());
        for workflow in &spec.workflows {
            workflows.register(workflow);
        }
        let workflows = Arc::new(workflows);

        // 4. events, then the interpreter their handlers run on
        let mut events = EventRegistry::new();
        for event in &spec.events {
            events.declare(event.clone());
        }
        let events = Arc::new(events);

        let services = Arc::new(Services {
            persistence: self.persistence.clone(),
            cache: self.cache.clone(),
            types: types.clone(),
            integrations: integrations.clone(),
            workflows: workflows.clone(),
            events: events.clone(),
            transforms: self.transforms.clone(),
        });
        let mut interpreter = Interpreter::new(services);
        for (name, executor) in &self.actions {
            interpreter.register(name.clone(), executor.clone());
        }
        let interpreter = Arc::new(interpreter);

        for handler in &spec.event_handlers {
            subscribe_handler(&events, handler, &interpreter);
        }

        // 5. endpoints
        let middleware = Arc::new(MiddlewareCache::new());
        let mut builder = RouteBuilder::default();
        for endpoint in &spec.endpoints {
            self.compile_endpoint(endpoint, &*loader, &middleware, &interpreter, &mut builder)?;
        }
        let (router, routes, route_stages) = builder.finish();

        log::info!(
            "Compiled service '{}': {} route(s), {} middleware stage(s), {} type(s)",
            spec.name,
            routes.len(),
            middleware.len(),
            types.len()
        );

        Ok(GeneratedRuntime {
            name: spec.name.clone(),
            router,
            routes,
            route_stages,
            middleware,
            types,
            integrations,
            workflows,
            events,
            interpreter,
        })
    }

    fn build_integrations(&self, spec: &ServiceSpec) -> Result<IntegrationRegistry, CompileError> {
        let mut integrations = self.integrations.clone();
        for integration in &spec.integrations {
            if integrations.contains(&integration.name) {
                log::debug!("Integration '{}' supplied by caller", integration.name);
                continue;
            }
            if integration.kind != "http" {
                log::warn!(
                    "Integration '{}' has unsupported type '{}', skipping",
                    integration.name,
                    integration.kind
                );
                continue;
            }
            let client = HttpIntegrationClient::from_spec(integration).map_err(|e| {
                CompileError::Integration {
                    name: integration.name.clone(),
                    message: format!("{:#}", e),
                }
            })?;
            integrations.register(integration.name.clone(), Arc::new(client));
        }
        Ok(integrations)
    }

    fn compile_endpoint(
        &self,
        endpoint: &EndpointSpec,
        loader: &dyn AuthConfigLoader,
        cache: &MiddlewareCache,
        interpreter: &Arc<Interpreter>,
        builder: &mut RouteBuilder,
    ) -> Result<(), CompileError> {
        let label = endpoint.label();
        let (method, filter) = parse_method(&endpoint.method).ok_or_else(|| {
            CompileError::UnsupportedMethod {
                endpoint: label.clone(),
                method: endpoint.method.clone(),
            }
        })?;
        let converted = convert_path(&endpoint.path).map_err(|reason| CompileError::InvalidPath {
            endpoint: label.clone(),
            reason,
        })?;
        builder.check_conflict(&label, &method, &converted)?;

        let stages = self.resolve_middleware(endpoint, &label, loader, cache)?;

        let steps = endpoint_steps(endpoint, &label, loader);
        for step in &steps {
            if !interpreter.supports(&step.action) {
                log::warn!("{}: action '{}' is not supported and will be skipped", label, step.action);
            }
        }

        let status = StatusCode::from_u16(endpoint.success_status()).unwrap_or_else(|_| {
            log::warn!(
                "{}: invalid response status {}, using 200",
                label,
                endpoint.success_status()
            );
            StatusCode::OK
        });

        let handler = Arc::new(EndpointHandler {
            label: label.clone(),
            source: endpoint.request_source(),
            status,
            steps,
            deprecated: endpoint.annotation("deprecated").is_some(),
            timeout: self.options.request_timeout,
            interpreter: interpreter.clone(),
        });
        let route = on(filter, move |request: Request| {
            let handler = handler.clone();
            async move { handler.handle(request).await }
        });

        log::debug!("Registered {} as {} {}", label, method, converted.path);
        builder.add(
            RouteInfo {
                method,
                template: endpoint.path.clone(),
                path: converted.path.clone(),
                params: converted.params.clone(),
                middleware: stages.iter().map(|s| s.name().to_string()).collect(),
                annotations: endpoint.annotations.clone(),
            },
            apply_stages(route, &stages),
            &stages,
        );
        Ok(())
    }

    fn resolve_middleware(
        &self,
        endpoint: &EndpointSpec,
        label: &str,
        loader: &dyn AuthConfigLoader,
        cache: &MiddlewareCache,
    ) -> Result<Vec<SharedStage>, CompileError> {
        let mut stages = Vec::with_capacity(endpoint.middleware.len());

        for name in &endpoint.middleware {
            let stage = cache.get_or_try_insert(name, || {
                let Some(descriptor) = loader.resolve(name) else {
                    if self.options.strict_middleware {
                        return Err(CompileError::UnknownMiddleware {
                            endpoint: label.to_string(),
                            name: name.clone(),
                        });
                    }
                    log::warn!("{}: unknown middleware '{}', skipping", label, name);
                    return Ok(None);
                };
                synthesize(&descriptor, loader).map_err(|source| CompileError::Middleware {
                    endpoint: label.to_string(),
                    name: name.clone(),
                    source,
                })
            })?;

            if let Some(stage) = stage {
                stages.push(stage);
            }
        }
        Ok(stages)
    }
}

/// Compile with the default adapters
pub fn compile(spec: &ServiceSpec) -> Result<GeneratedRuntime, CompileError> {
    Compiler::new().compile(spec)
}

fn build_types(spec: &ServiceSpec) -> TypeRegistry {
    let mut types = TypeRegistry::new();
    for model in &spec.models {
        types.register(ModelType::from_spec(model, ModelKind::Model));
    }
    for collection in &spec.collections {
        types.register(ModelType::from_spec(collection, ModelKind::Collection));
    }
    types
}

fn parse_method(method: &str) -> Option<(Method, MethodFilter)> {
    let filter = match method.trim().to_ascii_uppercase().as_str() {
        "GET" => (Method::GET, MethodFilter::GET),
        "POST" => (Method::POST, MethodFilter::POST),
        "PUT" => (Method::PUT, MethodFilter::PUT),
        "PATCH" => (Method::PATCH, MethodFilter::PATCH),
        "DELETE" => (Method::DELETE, MethodFilter::DELETE),
        "HEAD" => (Method::HEAD, MethodFilter::HEAD),
        "OPTIONS" => (Method::OPTIONS, MethodFilter::OPTIONS),
        _ => return None,
    };
    Some(filter)
}

/// Declared steps, preceded by an `authorize` check when a `role` or `auth` annotation names a role
fn endpoint_steps(
    endpoint: &EndpointSpec,
    label: &str,
    loader: &dyn AuthConfigLoader,
) -> Vec<LogicStep> {
    let role = endpoint
        .annotation("role")
        .or_else(|| endpoint.annotation("auth"))
        .and_then(|a| a.value.as_deref())
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let mut steps = Vec::with_capacity(endpoint.steps.len() + 1);
    if let Some(role) = role {
        if !loader.role_declared(role) {
            log::warn!("{}: role '{}' is not declared", label, role);
        }
        steps.push(LogicStep::new("authorize", ["caller", role]));
    }
    steps.extend(endpoint.steps.iter().cloned());
    steps
}

/// Accumulates method routers per path and rejects templates axum could not register
#[derive(Default)]
struct RouteBuilder {
    routes: Vec<RouteInfo>,
    stages: Vec<Vec<SharedStage>>,
    by_path: Vec<(String, MethodRouter)>,
    methods: HashSet<(Method, String)>,
    shapes: HashMap<String, (String, String)>,
    cors: HashMap<String, SharedStage>,
}

impl RouteBuilder {
    fn check_conflict(
        &mut self,
        label: &str,
        method: &Method,
        converted: &ConvertedPath,
    ) -> Result<(), CompileError> {
        let shape = converted.shape();
        if let Some((path, existing)) = self.shapes.get(&shape) {
            if *path != converted.path {
                return Err(CompileError::RouteConflict {
                    endpoint: label.to_string(),
                    existing: existing.clone(),
                });
            }
        }
        if self.methods.contains(&(method.clone(), converted.path.clone())) {
            let existing = self
                .routes
                .iter()
                .find(|r| r.method == *method && r.path == converted.path)
                .map(RouteInfo::label)
                .unwrap_or_default();
            return Err(CompileError::RouteConflict {
                endpoint: label.to_string(),
                existing,
            });
        }

        self.shapes
            .entry(shape)
            .or_insert_with(|| (converted.path.clone(), label.to_string()));
        Ok(())
    }

    fn add(&mut self, info: RouteInfo, route: MethodRouter, stages: &[SharedStage]) {
        self.methods.insert((info.method.clone(), info.path.clone()));
        if let Some(cors) = stages.iter().find(|s| s.kind() == MiddlewareKind::Cors) {
            self.cors
                .entry(info.path.clone())
                .or_insert_with(|| cors.clone());
        }

        match self.by_path.iter_mut().find(|(path, _)| *path == info.path) {
            Some((_, existing)) => {
                let merged = std::mem::replace(existing, MethodRouter::new()).merge(route);
                *existing = merged;
            }
            None => self.by_path.push((info.path.clone(), route)),
        }
        self.routes.push(info);
        self.stages.push(stages.to_vec());
    }

    fn finish(mut self) -> (Router, Vec<RouteInfo>, Vec<Vec<SharedStage>>) {
        // preflight requests must reach the CORS stage without passing auth
        for (path, cors) in std::mem::take(&mut self.cors) {
            if self.methods.contains(&(Method::OPTIONS, path.clone())) {
                continue;
            }
            let preflight = apply_stages(options(|| async { StatusCode::NO_CONTENT }), &[cors]);
            if let Some((_, existing)) = self.by_path.iter_mut().find(|(p, _)| *p == path) {
                let merged = std::mem::replace(existing, MethodRouter::new()).merge(preflight);
                *existing = merged;
            }
        }

        let router = self
            .by_path
            .into_iter()
            .fold(Router::new(), |router, (path, route)| router.route(&path, route));
        (router, self.routes, self.stages)
    }
}

/// Runs an event handler's steps with the event payload as input
struct StepSubscriber {
    label: String,
    steps: Vec<LogicStep>,
    interpreter: Weak<Interpreter>,
}

#[async_trait::async_trait]
impl EventSubscriber for StepSubscriber {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let Some(interpreter) = self.interpreter.upgrade() else {
            return Ok(());
        };

        let ctx = ExecutionContext::detached().with_event_depth(event.depth + 1);
        ctx.set_input(event.payload.clone());
        ctx.set(
            "event",
            json!({
                "name": event.name,
                "emitted_at": event.emitted_at.to_rfc3339(),
                "depth": event.depth,
            }),
        );

        interpreter
            .execute(&ctx, &self.steps)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("{}: {}", self.label, e))
    }
}

fn subscribe_handler(
    events: &EventRegistry,
    handler: &EventHandlerSpec,
    interpreter: &Arc<Interpreter>,
) {
    let label = handler
        .name
        .clone()
        .unwrap_or_else(|| format!("on {}", handler.event));
    let subscriber = Arc::new(StepSubscriber {
        label: label.clone(),
        steps: handler.steps.clone(),
        interpreter: Arc::downgrade(interpreter),
    });

    if let Err(e) = events.subscribe(&handler.event, subscriber) {
        log::warn!("Event handler '{}' skipped: {}", label, e);
    }
}
