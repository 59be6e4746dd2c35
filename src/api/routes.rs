use axum::{http::Method, routing::get, Router};

use crate::api::handlers;
use crate::compiler::GeneratedRuntime;

/// Router serving a compiled service, with `GET /health` added unless the service declares it
pub fn create_router(runtime: &GeneratedRuntime) -> Router {
    let declares_health = runtime
        .routes()
        .iter()
        .any(|route| route.path == "/health" && route.method == Method::GET);

    let router = runtime.router();
    if declares_health {
        router
    } else {
        router.route("/health", get(handlers::health_check))
    }
}
