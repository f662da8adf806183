use sqlx::AnyPool;

/// Idempotent schema creation. Timestamps are UTC epoch milliseconds
/// (BIGINT); uuids are stored as TEXT.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Users
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  email TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  is_admin BOOLEAN NOT NULL,
  weight DOUBLE PRECISION NOT NULL,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Products
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS products (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT,
  admin_id TEXT NOT NULL,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Sessions
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS sessions (
  id TEXT PRIMARY KEY,
  admin_id TEXT NOT NULL,
  product_id TEXT NOT NULL,

  upset_price DOUBLE PRECISION NOT NULL,
  final_price DOUBLE PRECISION,
  inventory BIGINT NOT NULL,

  alpha DOUBLE PRECISION NOT NULL,
  beta DOUBLE PRECISION NOT NULL,
  gamma DOUBLE PRECISION NOT NULL,

  start_ms BIGINT NOT NULL,
  end_ms BIGINT NOT NULL,
  duration_secs BIGINT NOT NULL,

  is_active BOOLEAN NOT NULL,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Bids: one logical bid per (session, user), upserted in place.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bids (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  user_id TEXT NOT NULL,

  price DOUBLE PRECISION NOT NULL,
  score DOUBLE PRECISION NOT NULL,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL,

  UNIQUE (session_id, user_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Rankings: written exclusively by the finalizer, in one transaction.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rankings (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  user_id TEXT NOT NULL,

  ranking BIGINT NOT NULL,
  bid_price DOUBLE PRECISION NOT NULL,
  bid_score DOUBLE PRECISION NOT NULL,
  is_winner BOOLEAN NOT NULL,

  created_ms BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_sessions_active_time ON sessions(is_active, start_ms, end_ms);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bids_session_user ON bids(session_id, user_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_bids_session_score ON bids(session_id, score DESC);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_rankings_session ON rankings(session_id, ranking);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
