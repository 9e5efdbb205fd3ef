mod cache;
mod clients;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod ws;

use config::Config;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{ContentCache, MokaCache};
use clients::{RedisBus, RedisCache};
use db::{ContentStore, MemoryClipStore, PgClipStore, StoreError};
use state::{AppState, Backends};
use ws::relay::{LocalBus, SyncBus};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "clipboard_sync=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let backends = match connect_backends(&config).await {
        Ok(backends) => backends,
        Err(e) => {
            error!("Failed to connect to storage: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState::start(backends, &config);
    let app = routes::create_router(state.clone(), &config);

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket rooms available at ws://{}/ws/<room>", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server failed: {}", e);
    }

    // Pending debounced writes would otherwise be lost on a clean stop
    match state.persistence.flush_now().await {
        Some(0) => info!("All pending writes flushed"),
        Some(left) => warn!("{} pending writes could not be flushed", left),
        None => warn!("Persistence coordinator already stopped"),
    }
    info!("Server stopped");
}

/// Durable store, cache and bus for this process
async fn connect_backends(config: &Config) -> Result<Backends, StoreError> {
    let store: Arc<dyn ContentStore> = match &config.db_url {
        Some(db_url) => {
            let store = PgClipStore::connect_with_retry(
                db_url,
                config.db_connect_attempts,
                config.db_connect_retry_delay(),
            )
            .await?;
            info!("Database initialized successfully");
            Arc::new(store)
        }
        None if config.is_production() => {
            return Err(StoreError::Unavailable(
                "DB_URL is required in production".to_string(),
            ));
        }
        None => {
            warn!("No database URL configured - room content is kept in memory only");
            Arc::new(MemoryClipStore::new())
        }
    };

    let (cache, bus): (Arc<dyn ContentCache>, Arc<dyn SyncBus>) = match &config.redis_url {
        Some(redis_url) => {
            let (client, conn) = clients::connect_redis(redis_url).await?;
            let cache = RedisCache::new(conn.clone(), config.cache_ttl());
            let bus = RedisBus::new(client, conn, config.sync_channel.clone());
            (Arc::new(cache), Arc::new(bus))
        }
        None => {
            warn!("No Redis URL configured - cache and sync stay inside this process");
            (
                Arc::new(MokaCache::new(config.cache_ttl())),
                Arc::new(LocalBus::new(1024)),
            )
        }
    };

    Ok(Backends { store, cache, bus })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
