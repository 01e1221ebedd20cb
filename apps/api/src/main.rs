use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use shared_config::{AppConfig, StorageBackend};
use shared_database::{
    InMemoryReadModelCache, InMemorySchedulingStore, PostgrestSchedulingStore, ReadModelCache,
    RedisReadModelCache, SchedulingStore,
};
use shared_utils::clock::SystemClock;
use shared_utils::notify::{LoggingNotifier, NotificationDispatcher, WebhookNotifier};
use shared_utils::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting slot engine API server");

    // Load configuration
    let config = AppConfig::from_env();
    let port = config.server_port;

    let state = Arc::new(build_state(config).await);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_state(config: AppConfig) -> AppState {
    let store: Arc<dyn SchedulingStore> = match config.storage_backend {
        StorageBackend::Supabase => {
            info!("Using Supabase storage at {}", config.supabase_url);
            Arc::new(PostgrestSchedulingStore::new(&config))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Arc::new(InMemorySchedulingStore::new())
        }
    };

    let cache: Arc<dyn ReadModelCache> = match config.redis_url.as_deref() {
        Some(url) => match RedisReadModelCache::new(url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!("Redis unavailable ({}), falling back to in-memory read model cache", e);
                Arc::new(InMemoryReadModelCache::new())
            }
        },
        None => Arc::new(InMemoryReadModelCache::new()),
    };

    let notifier: Arc<dyn NotificationDispatcher> = match config.notification_webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => {
            info!("No notification webhook configured, notifications are logged only");
            Arc::new(LoggingNotifier)
        }
    };

    AppState::new(Arc::new(config), store, cache, notifier, Arc::new(SystemClock))
}
