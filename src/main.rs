use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tenant_console_api::app::{app, AppState};
use tenant_console_api::config::config;
use tenant_console_api::database::schema::run_migrations;
use tenant_console_api::database::{DatabaseManager, MemoryStore, PgStore, Store};
use tenant_console_api::permissions::catalog::{seed_defaults, CatalogSeed};
use tenant_console_api::services::{HeuristicEngine, HttpEngine, RecommendationEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config().clone();
    info!("Starting tenant console API in {:?} mode", config.environment);

    let store: Arc<dyn Store> = if config.database.url.is_some() {
        let pool = DatabaseManager::connect(&config.database).await?;
        if config.database.run_migrations {
            run_migrations(&pool).await?;
        }
        Arc::new(PgStore::new(pool))
    } else {
        warn!("DATABASE_URL not set, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let seed = CatalogSeed::load(config.seed.catalog_path.as_deref())?;
    seed_defaults(store.as_ref(), &seed).await?;

    let engine: Arc<dyn RecommendationEngine> = match config.recommendations.endpoint.as_deref() {
        Some(endpoint) => Arc::new(HttpEngine::new(
            endpoint,
            Duration::from_secs(config.recommendations.timeout_secs),
        )?),
        None => Arc::new(HeuristicEngine),
    };
    info!(engine = engine.name(), "Recommendation engine ready");

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("Tenant console API listening on http://{}", bind_addr);

    let state = AppState::new(store, config, engine);
    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}
