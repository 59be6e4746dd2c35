use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Json;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::handlers::ErrorResponse;
use crate::auth::{AuthChain, AuthConfigLoader, AuthError, MiddlewareDescriptor, MiddlewareKind};

/// One synthesized request-processing stage
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> MiddlewareKind;
    fn as_any(&self) -> &dyn Any;
    async fn handle(&self, request: Request, next: Next) -> Response;
}

pub type SharedStage = Arc<dyn Stage>;

/// Authenticates the request and stores the resulting claims in request extensions
pub struct AuthStage {
    name: String,
    chain: AuthChain,
}

impl AuthStage {
    pub fn new(name: impl Into<String>, chain: AuthChain) -> Self {
        Self {
            name: name.into(),
            chain,
        }
    }
}

#[async_trait::async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MiddlewareKind {
        MiddlewareKind::Authentication
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn handle(&self, mut request: Request, next: Next) -> Response {
        match self.chain.authenticate(request.headers()).await {
            Ok(Some(claims)) => {
                request.extensions_mut().insert(claims);
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("{} rejected {} {}: {}", self.name, request.method(), request.uri().path(), e);
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new(StatusCode::UNAUTHORIZED, e.to_string())),
                )
                    .into_response();
            }
        }
        next.run(request).await
    }
}

/// Carries the configured limit and window; requests pass through unthrottled
pub struct RateLimitStage {
    name: String,
    limit: Option<u64>,
    window: Option<Duration>,
}

impl RateLimitStage {
    pub fn new(name: impl Into<String>, limit: Option<u64>, window: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }
}

#[async_trait::async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MiddlewareKind {
        MiddlewareKind::RateLimiting
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        log::debug!(
            "{}: {} {} (limit {:?} per {:?})",
            self.name,
            request.method(),
            request.uri().path(),
            self.limit,
            self.window
        );
        next.run(request).await
    }
}

/// Adds CORS headers and answers preflight requests itself
pub struct CorsStage {
    name: String,
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
}

impl CorsStage {
    pub fn from_descriptor(descriptor: &MiddlewareDescriptor) -> Self {
        let header = |key: &str, default: &'static str| {
            descriptor
                .config
                .get(key)
                .and_then(|value| match value {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Array(items) => Some(
                        items
                            .iter()
                            .filter_map(|i| i.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                    _ => None,
                })
                .and_then(|s| HeaderValue::from_str(&s).ok())
                .unwrap_or_else(|| HeaderValue::from_static(default))
        };

        Self {
            name: descriptor.name.clone(),
            origin: header("origin", "*"),
            methods: header("methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS"),
            headers: header("headers", "Content-Type, Authorization"),
        }
    }

    fn decorate(&self, response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
    }
}

#[async_trait::async_trait]
impl Stage for CorsStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MiddlewareKind {
        MiddlewareKind::Cors
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        let mut response = if request.method() == Method::OPTIONS {
            StatusCode::OK.into_response()
        } else {
            next.run(request).await
        };
        self.decorate(&mut response);
        response
    }
}

/// Request log lines before and after the downstream call
pub struct LoggingStage {
    name: String,
}

impl LoggingStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MiddlewareKind {
        MiddlewareKind::Logging
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn handle(&self, request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();

        log::info!("--> {} {}", method, path);
        let response = next.run(request).await;
        log::info!(
            "<-- {} {} {} ({} ms)",
            method,
            path,
            response.status().as_u16(),
            started.elapsed().as_millis()
        );
        response
    }
}

/// Build the stage for a resolved descriptor; kinds without a stage yield `None`
pub fn synthesize(
    descriptor: &MiddlewareDescriptor,
    loader: &dyn AuthConfigLoader,
) -> Result<Option<SharedStage>, AuthError> {
    let stage: SharedStage = match &descriptor.kind {
        MiddlewareKind::Authentication => {
            let chain = loader.build_auth_chain(descriptor, descriptor.auth_mode())?;
            Arc::new(AuthStage::new(&descriptor.name, chain))
        }
        MiddlewareKind::RateLimiting => Arc::new(RateLimitStage::new(
            &descriptor.name,
            descriptor.config_u64("limit"),
            descriptor.config_u64("window").map(Duration::from_secs),
        )),
        MiddlewareKind::Cors => Arc::new(CorsStage::from_descriptor(descriptor)),
        MiddlewareKind::Logging => Arc::new(LoggingStage::new(&descriptor.name)),
        MiddlewareKind::Other(kind) => {
            log::warn!(
                "Middleware '{}' has unsupported type '{}', skipping",
                descriptor.name,
                kind
            );
            return Ok(None);
        }
    };
    Ok(Some(stage))
}

/// Stages memoized by middleware name so every endpoint shares one instance
#[derive(Default)]
pub struct MiddlewareCache {
    stages: RwLock<HashMap<String, SharedStage>>,
}

impl MiddlewareCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<SharedStage> {
        self.stages.read().get(name).cloned()
    }

    /// Cached stage for `name`, building and storing it on first use
    pub fn get_or_try_insert<E>(
        &self,
        name: &str,
        build: impl FnOnce() -> Result<Option<SharedStage>, E>,
    ) -> Result<Option<SharedStage>, E> {
        if let Some(stage) = self.get(name) {
            return Ok(Some(stage));
        }

        let Some(stage) = build()? else {
            return Ok(None);
        };
        let mut stages = self.stages.write();
        Ok(Some(stages.entry(name.to_string()).or_insert(stage).clone()))
    }

    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for MiddlewareCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareCache")
            .field("stages", &self.names())
            .finish()
    }
}

async fn run_stage(State(stage): State<SharedStage>, request: Request, next: Next) -> Response {
    stage.handle(request, next).await
}

/// Wrap a method router so `stages[0]` sees the request first
pub fn apply_stages(mut route: MethodRouter, stages: &[SharedStage]) -> MethodRouter {
    for stage in stages.iter().rev() {
        route = route.layer(from_fn_with_state(stage.clone(), run_stage));
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMode, SpecAuthLoader};
    use crate::model::{AuthKind, AuthSpec, MiddlewareSpec, ServiceSpec};
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;

    fn loader() -> SpecAuthLoader {
        SpecAuthLoader::from_spec(
            &ServiceSpec::new("s")
                .with_auth(AuthSpec::new("keys", AuthKind::ApiKey).with_key("k-1", json!({"sub": "svc"})))
                .with_middleware(MiddlewareSpec::new("auth", "authentication"))
                .with_middleware(
                    MiddlewareSpec::new("web", "cors").with_config("origin", json!("https://app.example")),
                )
                .with_middleware(MiddlewareSpec::new("gzip", "compression")),
        )
    }

    fn stage(name: &str) -> Option<SharedStage> {
        let loader = loader();
        let descriptor = loader.resolve(name).unwrap();
        synthesize(&descriptor, &loader).unwrap()
    }

    #[test]
    fn test_synthesize_kinds() {
        assert_eq!(stage("auth").unwrap().kind(), MiddlewareKind::Authentication);
        assert_eq!(stage("web").unwrap().kind(), MiddlewareKind::Cors);
        assert_eq!(stage("logging").unwrap().kind(), MiddlewareKind::Logging);
        assert!(stage("gzip").is_none());
    }

    #[test]
    fn test_rate_limit_reads_config() {
        let mut descriptor = MiddlewareDescriptor::new("throttle", MiddlewareKind::RateLimiting);
        descriptor.config.insert("limit".into(), json!(10));
        descriptor.config.insert("window".into(), json!(60));

        let stage = synthesize(&descriptor, &loader()).unwrap().unwrap();
        assert_eq!(stage.name(), "throttle");
        assert_eq!(stage.kind(), MiddlewareKind::RateLimiting);

        let throttle = stage.as_any().downcast_ref::<RateLimitStage>().unwrap();
        assert_eq!(throttle.limit(), Some(10));
        assert_eq!(throttle.window(), Some(Duration::from_secs(60)));

        let bare = MiddlewareDescriptor::new("open", MiddlewareKind::RateLimiting);
        let stage = synthesize(&bare, &loader()).unwrap().unwrap();
        let open = stage.as_any().downcast_ref::<RateLimitStage>().unwrap();
        assert_eq!(open.limit(), None);
        assert_eq!(open.window(), None);
    }

    #[test]
    fn test_cache_memoizes_by_name() {
        let cache = MiddlewareCache::new();
        let mut builds = 0;

        let first = cache
            .get_or_try_insert::<AuthError>("logging", || {
                builds += 1;
                Ok(Some(Arc::new(LoggingStage::new("logging")) as SharedStage))
            })
            .unwrap()
            .unwrap();
        let second = cache
            .get_or_try_insert::<AuthError>("logging", || {
                builds += 1;
                Ok(Some(Arc::new(LoggingStage::new("logging")) as SharedStage))
            })
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds, 1);
        assert_eq!(cache.names(), vec!["logging".to_string()]);
    }

    #[test]
    fn test_cache_skips_stageless_entries() {
        let cache = MiddlewareCache::new();
        let result = cache.get_or_try_insert::<AuthError>("gzip", || Ok(None)).unwrap();
        assert!(result.is_none());
        assert!(cache.is_empty());
    }

    fn app(stages: &[SharedStage]) -> Router {
        let route = get(|request: Request| async move {
            let caller = request
                .extensions()
                .get::<crate::model::Claims>()
                .and_then(|c| c.subject().map(str::to_string))
                .unwrap_or_else(|| "anonymous".to_string());
            caller
        });
        Router::new().route("/ping", apply_stages(route, stages))
    }

    async fn body_text(response: Response) -> String {
        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_auth_stage_required() {
        let app = app(&[stage("auth").unwrap()]);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("x-api-key", "k-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "svc");
    }

    #[tokio::test]
    async fn test_auth_stage_optional() {
        let loader = loader();
        let mut descriptor = loader.resolve("auth").unwrap();
        descriptor.config.insert("required".into(), json!(false));
        let chain = loader.build_auth_chain(&descriptor, AuthMode::Optional).unwrap();
        let app = app(&[Arc::new(AuthStage::new("auth", chain))]);

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_cors_headers_and_preflight() {
        let cors = stage("web").unwrap();
        let route = get(|| async { "pong" }).options(|| async { StatusCode::NO_CONTENT });
        let app = Router::new().route("/ping", apply_stages(route, &[cors]));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );

        let preflight = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(preflight.status(), StatusCode::OK);
        assert!(preflight
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn test_stage_order() {
        let app = app(&[stage("logging").unwrap(), stage("auth").unwrap()]);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("x-api-key", "bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
