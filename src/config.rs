use std::time::Duration;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Durable-store connection string. `DATABASE_URL` overrides the
    /// assembled `POSTGRES_*` parts.
    pub database_url: String,

    /// Shared-cache connection string. `REDIS_URL` overrides the assembled
    /// `REDIS_*` parts; `memory://` selects the in-process store for
    /// dependency-free development runs.
    pub cache_url: String,

    /// HTTP bind address.
    pub bind_addr: String,

    // =========================
    // Cache TTLs
    // =========================
    /// Default expiry for ranking sorted sets, bid hashes, session params
    /// and user weights. Abandoned sessions self-clean after this.
    pub cache_ttl_secs: i64,

    /// Expiry for the per-session upset-price cache. Upset prices never
    /// change after activation, so this is deliberately long.
    pub upset_price_ttl_secs: i64,

    /// In-process auth token cache: per-entry TTL.
    pub auth_cache_ttl_secs: u64,

    /// In-process auth token cache: entry cap. Oldest-expiring entries are
    /// dropped at capacity to keep memory bounded.
    pub auth_cache_max_entries: usize,

    // =========================
    // Auth
    // =========================
    pub jwt_secret: String,
    pub jwt_expire_minutes: i64,

    /// CORS allow-list. `*` allows any origin.
    pub cors_origins: Vec<String>,

    // =========================
    // Background tasks
    // =========================
    /// Sleep between batch-persist drains. Bounds how long an accepted bid
    /// can exist only in the shared cache.
    pub batch_persist_interval: Duration,

    /// Sleep between session-monitor scans for expired sessions.
    pub session_monitor_interval: Duration,

    // =========================
    // Durable-store pool
    // =========================
    /// Pool must cover concurrent handlers plus both background tasks;
    /// exhaustion surfaces as ServiceUnavailable / task back-off.
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    /// Connections are recycled after this lifetime to shed leaked state.
    pub db_max_lifetime: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "postgres://{}:{}@{}:{}/{}",
                env_or("POSTGRES_USER", "flashbid"),
                env_or("POSTGRES_PASSWORD", "flashbid"),
                env_or("POSTGRES_HOST", "localhost"),
                env_or("POSTGRES_PORT", "5432"),
                env_or("POSTGRES_DB", "flashbid"),
            )
        });

        let cache_url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            let password = env_or("REDIS_PASSWORD", "");
            let auth = if password.is_empty() {
                String::new()
            } else {
                format!(":{}@", password)
            };
            format!(
                "redis://{}{}:{}/{}",
                auth,
                env_or("REDIS_HOST", "localhost"),
                env_or("REDIS_PORT", "6379"),
                env_or("REDIS_DB", "0"),
            )
        });

        let cors_origins = env_or("CORS_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            database_url,
            cache_url,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),

            cache_ttl_secs: env_parse("REDIS_CACHE_EXPIRE", 3600),
            upset_price_ttl_secs: env_parse("UPSET_PRICE_CACHE_EXPIRE", 7200),
            auth_cache_ttl_secs: env_parse("AUTH_CACHE_TTL_SECONDS", 5),
            auth_cache_max_entries: env_parse("AUTH_CACHE_MAX_ENTRIES", 5000),

            jwt_secret: env_or("JWT_SECRET", "change-this-in-production"),
            jwt_expire_minutes: env_parse("JWT_EXPIRE_MINUTES", 60 * 24),

            cors_origins,

            batch_persist_interval: Duration::from_secs(env_parse(
                "BATCH_PERSIST_INTERVAL_SECS",
                5,
            )),
            session_monitor_interval: Duration::from_secs(env_parse(
                "SESSION_MONITOR_INTERVAL_SECS",
                10,
            )),

            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 20),
            db_acquire_timeout: Duration::from_secs(env_parse("DB_ACQUIRE_TIMEOUT_SECS", 10)),
            db_max_lifetime: Duration::from_secs(env_parse("DB_CONN_MAX_LIFETIME_SECS", 300)),
        }
    }
}
