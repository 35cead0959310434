use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod models;
mod render;
mod services;
mod storage;

use config::{Config, StorageBackend};
use render::{FontRegistry, Renderer};
use services::{
    packs::PackManager, quota::QuotaLedger, session::SessionMachine, stickers::StickersService,
};
use storage::{memory::MemoryStore, redis::RedisStore, telegram::TelegramPackStore, DynStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stickers: Arc<StickersService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "text_sticker_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load();
    tracing::info!("Starting server in {} mode", config.server.environment);

    // Initialize keyed store
    let store: DynStore = match config.storage.backend {
        StorageBackend::Redis => {
            let redis = RedisStore::new(&config.redis_url()).await?;
            tracing::info!("Connected to Redis");
            Arc::new(redis)
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Load fonts
    let fonts = Arc::new(FontRegistry::load(&config.render));
    let renderer = Renderer::new(fonts, &config.render);
    tracing::info!("Fonts available: {:?}", renderer.fonts().available());

    // Upstream pack store
    if config.telegram.bot_token.is_empty() {
        tracing::warn!("BOT_TOKEN is not set, pack uploads will fail");
    }
    let upstream = Arc::new(TelegramPackStore::new(
        &config.telegram,
        config.packs.attempt_timeout,
    )?);

    let stickers = StickersService::new(
        SessionMachine::new(
            config.input.clone(),
            config.telegram.bot_username.clone(),
            renderer.fonts().available(),
        ),
        QuotaLedger::new(store.clone(), config.quota.clone()),
        PackManager::new(store, upstream, config.packs.clone()),
        renderer,
        &config.telegram,
    );

    // Create app state
    let state = AppState {
        config: Arc::new(config.clone()),
        stickers: Arc::new(stickers),
    };

    // Photo uploads plus multipart overhead
    let body_limit = config.input.max_photo_bytes + 64 * 1024;

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::router::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
