use apiforge::config::AppConfig;
use apiforge::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    // Load configuration
    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{} backend={:?} definition={}",
        config.server.host,
        config.server.port,
        config.database.backend,
        config.service.definition_path
    );

    if let Err(e) = run_server(&config).await {
        log::error!("apiforge stopped: {:#}", e);
        return Err(e);
    }

    Ok(())
}
