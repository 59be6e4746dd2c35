pub mod api;
pub mod auth;
pub mod compiler;
pub mod config;
pub mod logic;
pub mod model;
pub mod registry;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use compiler::{compile, CompileError, CompileOptions, Compiler, GeneratedRuntime, RouteInfo};
pub use logic::{ExecutionContext, Interpreter, LogicError, StepExecutor};

// Export all model types
pub use model::*;

// Export store types
pub use store::{CacheStore, MemoryCache, MemoryPersistence, NullPersistence, Persistence};

use itertools::Itertools;
use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};
use crate::store::PostgresPersistence;

/// Build the persistence adapter selected by `database.backend`
pub async fn build_persistence(config: &AppConfig) -> anyhow::Result<Arc<dyn Persistence>> {
    let persistence: Arc<dyn Persistence> = match config.database.backend {
        StorageBackend::Memory => Arc::new(MemoryPersistence::new()),
        StorageBackend::None => Arc::new(NullPersistence),
        StorageBackend::Postgres => {
            let database_url = config.database_url()?;
            let max_connections = config.database.max_connections.unwrap_or(20);
            let postgres = PostgresPersistence::new(&database_url, max_connections).await?;

            log::info!("Running database migrations...");
            postgres.migrate().await?;
            Arc::new(postgres)
        }
    };
    Ok(persistence)
}

/// Load the configured service definition and compile it with the configured adapters
pub async fn build_runtime(config: &AppConfig) -> anyhow::Result<GeneratedRuntime> {
    let spec = load_service_spec(&config.service.definition_path)?;
    log::info!(
        "Loaded service '{}' from {} ({} endpoint(s))",
        spec.name,
        config.service.definition_path,
        spec.endpoints.len()
    );

    let cache = match config.cache_ttl() {
        Some(ttl) => MemoryCache::with_default_ttl(ttl),
        None => MemoryCache::new(),
    };

    let runtime = Compiler::new()
        .with_options(config.compile_options())
        .with_persistence(build_persistence(config).await?)
        .with_cache(Arc::new(cache))
        .compile(&spec)?;
    Ok(runtime)
}

/// Compile the configured service and serve it until the listener fails
pub async fn run_server(config: &AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let runtime = build_runtime(config).await?;
    for route in runtime.routes() {
        log::info!(
            "  {:<7} {} [{}]",
            route.method.as_str(),
            route.path,
            route.middleware.iter().join(", ")
        );
    }
    let app = crate::api::routes::create_router(&runtime);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("'{}' listening on http://{}", runtime.name, bind_address);

    serve(listener, app).await?;

    Ok(())
}
