use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use flashbid::{
    api::{self, state::AppState},
    auth::{context::AuthContext, jwt::JwtCodec},
    bid::{
        leaderboard::LeaderboardService, pipeline::BidPipeline, repository::BidRepository,
        repository_sqlx::SqlxBidRepository,
    },
    cache::{memory::MemoryCacheStore, redis::RedisCacheStore, store::CacheStore},
    config::AppConfig,
    db::Db,
    logger::init_tracing,
    session::{
        cache::SessionCache, repository::SessionRepository, repository_sqlx::SqlxSessionRepository,
    },
    tasks::{batch_persist::BatchPersister, session_monitor::SessionMonitor},
    user::{repository::UserRepository, repository_sqlx::SqlxUserRepository},
};

/// Selects the shared-cache backend. `memory://` keeps everything
/// in-process; correct only for a single instance.
async fn connect_cache(cfg: &AppConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    if cfg.cache_url.starts_with("memory://") {
        tracing::warn!("using in-process cache store; single-instance development mode");
        return Ok(Arc::new(MemoryCacheStore::new()));
    }

    Ok(Arc::new(RedisCacheStore::connect(&cfg.cache_url).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting flashbid backend...");

    let cfg = AppConfig::from_env();

    let db = Db::connect(&cfg).await?;
    db.migrate().await?;

    let store = connect_cache(&cfg).await?;

    let sessions: Arc<dyn SessionRepository> =
        Arc::new(SqlxSessionRepository::new(db.pool.clone()));
    let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(db.pool.clone()));
    let bids: Arc<dyn BidRepository> = Arc::new(SqlxBidRepository::new(db.pool.clone()));

    let session_cache = Arc::new(SessionCache::new(
        store.clone(),
        sessions.clone(),
        users.clone(),
        cfg.cache_ttl_secs,
        cfg.upset_price_ttl_secs,
    ));

    let pipeline = Arc::new(BidPipeline::new(
        store.clone(),
        session_cache.clone(),
        cfg.cache_ttl_secs,
    ));
    let leaderboard = Arc::new(LeaderboardService::new(
        store.clone(),
        sessions.clone(),
        users.clone(),
        bids.clone(),
    ));

    let persister = Arc::new(BatchPersister::new(
        store.clone(),
        bids.clone(),
        cfg.batch_persist_interval,
    ));
    let monitor = Arc::new(SessionMonitor::new(
        sessions.clone(),
        bids.clone(),
        persister.clone(),
        session_cache.clone(),
        cfg.session_monitor_interval,
    ));

    let auth = Arc::new(AuthContext::new(
        JwtCodec::new(&cfg.jwt_secret, cfg.jwt_expire_minutes),
        store.clone(),
        Duration::from_secs(cfg.auth_cache_ttl_secs),
        cfg.auth_cache_max_entries,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let persister_task = tokio::spawn(persister.clone().run(shutdown_rx.clone()));
    let monitor_task = tokio::spawn(monitor.clone().run(shutdown_rx));

    let state = AppState {
        pipeline,
        leaderboard,
        sessions,
        session_cache,
        users,
        auth,
        monitor,
    };

    let app = api::router(state, &cfg.cors_origins);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "backend started; waiting for shutdown signal");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Stop background tasks; the persister flushes dirty sessions on the
    // way out so accepted bids reach the durable store.
    let _ = shutdown_tx.send(true);
    let _ = persister_task.await;
    let _ = monitor_task.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
