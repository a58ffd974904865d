mod auth;
mod autosave;
mod cache;
mod config;
mod connection;
mod db;
mod frame;
mod hub;
mod metrics;
mod models;
mod repository;
mod routes;
mod state;

use std::sync::Arc;

use config::Config;
use repository::{PgBoardRepository, PgVersionRepository};
use state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("configuration error");
    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "3000".into()).parse().expect("invalid PORT");

    let pool = db::init_pool(&config.database_url).await.expect("database init failed");

    let redis_client = redis::Client::open(config.redis_url.clone()).expect("invalid REDIS_URL");
    let redis_conn = redis_client.get_connection_manager().await.expect("redis connection failed");
    let backend: Arc<dyn cache::KvBackend> = Arc::new(cache::RedisBackend::new(redis_conn));
    let metrics = Arc::new(metrics::Metrics::new());

    let repository: Arc<dyn repository::BoardRepository> = Arc::new(PgBoardRepository::new(pool.clone(), metrics.clone()));
    let versions: Arc<dyn repository::VersionRepository> = Arc::new(PgVersionRepository::new(pool, metrics.clone()));

    let identity: Arc<dyn auth::IdentityProvider> = if config.e2e_test_auth {
        tracing::warn!("E2E_TEST_AUTH enabled — bearer tokens map directly to synthetic identities");
        Arc::new(auth::TestIdentityProvider)
    } else {
        Arc::new(auth::UnconfiguredIdentityProvider)
    };

    let state = AppState::new(config, backend, repository, versions, identity, metrics);

    let auto_save = autosave::AutoSaveWorker::new(&state);
    let _auto_save_handle = auto_save.spawn().expect("auto-save worker spawned exactly once at startup");

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await.expect("failed to bind");

    tracing::info!(%port, "whiteboard-core listening");

    let shutdown = async move {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
        tracing::info!("shutdown signal received, flushing active boards");
        auto_save.flush_all().await;
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await.expect("server failed");
}
