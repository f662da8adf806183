use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::session::model::{Product, RankingRow, Session};
use crate::session::repository::SessionRepository;

const SESSION_COLUMNS: &str = r#"
  s.id, s.admin_id, s.product_id,
  s.upset_price, s.final_price, s.inventory,
  s.alpha, s.beta, s.gamma,
  s.start_ms, s.end_ms, s.duration_secs,
  CAST(s.is_active AS INTEGER) AS is_active_i64,
  s.created_ms, s.updated_ms
"#;

/// SQLx-backed implementation of SessionRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxSessionRepository {
    pool: AnyPool,
}

impl SqlxSessionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn fetch_by_id(&self, session_id: &Uuid) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?;"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn list(&self, active_only: bool) -> anyhow::Result<Vec<(Session, Product)>> {
        let filter = if active_only {
            "WHERE s.is_active = TRUE"
        } else {
            ""
        };

        let rows = sqlx::query(&format!(
            r#"
SELECT
  {SESSION_COLUMNS},
  p.name AS product_name,
  p.description AS product_description,
  p.admin_id AS product_admin_id,
  p.created_ms AS product_created_ms,
  p.updated_ms AS product_updated_ms
FROM sessions s
JOIN products p ON p.id = s.product_id
{filter}
ORDER BY s.created_ms DESC;
"#
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_session(&r).and_then(|s| Ok((s, row_to_joined_product(&r)?))) {
                Ok(pair) => out.push(pair),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the listing
                    tracing::warn!(error = %e, "skipping malformed session row");
                }
            }
        }

        Ok(out)
    }

    async fn fetch_expired(&self, now_ms: i64) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.is_active = TRUE AND s.end_ms <= ?;"
        ))
        .bind(now_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_session(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed session row");
                }
            }
        }

        Ok(out)
    }

    async fn finalize(
        &self,
        session_id: &Uuid,
        final_price: Option<f64>,
        rows: &[RankingRow],
        now_ms: i64,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        // CAS on is_active: whoever flips it owns the finalization.
        let res = sqlx::query(
            r#"
UPDATE sessions
SET is_active = FALSE, final_price = ?, updated_ms = ?
WHERE id = ? AND is_active = TRUE;
"#,
        )
        .bind(final_price)
        .bind(now_ms)
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM rankings WHERE session_id = ?;")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"
INSERT INTO rankings (id, session_id, user_id, ranking, bid_price, bid_score, is_winner, created_ms, updated_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(row.session_id.to_string())
            .bind(row.user_id.to_string())
            .bind(row.ranking)
            .bind(row.bid_price)
            .bind(row.bid_score)
            .bind(row.is_winner)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fetch_rankings(&self, session_id: &Uuid) -> anyhow::Result<Vec<RankingRow>> {
        let rows = sqlx::query(
            r#"
SELECT
  session_id, user_id, ranking, bid_price, bid_score,
  CAST(is_winner AS INTEGER) AS is_winner_i64
FROM rankings
WHERE session_id = ?
ORDER BY ranking ASC;
"#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_ranking(&r)?);
        }

        Ok(out)
    }

    async fn insert_product(&self, product: &Product) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO products (id, name, description, admin_id, created_ms, updated_ms)
VALUES (?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(product.product_id.to_string())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.admin_id.to_string())
        .bind(product.created_ms)
        .bind(product.updated_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_product(&self, product_id: &Uuid) -> anyhow::Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, description, admin_id, created_ms, updated_ms FROM products WHERE id = ?;",
        )
        .bind(product_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_product(&r)).transpose()
    }

    async fn insert_session(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO sessions (
  id, admin_id, product_id,
  upset_price, final_price, inventory,
  alpha, beta, gamma,
  start_ms, end_ms, duration_secs,
  is_active, created_ms, updated_ms
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(session.session_id.to_string())
        .bind(session.admin_id.to_string())
        .bind(session.product_id.to_string())
        .bind(session.upset_price)
        .bind(session.final_price)
        .bind(session.inventory)
        .bind(session.alpha)
        .bind(session.beta)
        .bind(session.gamma)
        .bind(session.start_ms)
        .bind(session.end_ms)
        .bind(session.duration_secs)
        .bind(session.is_active)
        .bind(session.created_ms)
        .bind(session.updated_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_active(
        &self,
        session_id: &Uuid,
        active: bool,
        now_ms: i64,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE sessions SET is_active = ?, updated_ms = ? WHERE id = ?;")
            .bind(active)
            .bind(now_ms)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }
}

/* =========================
Row mapping
========================= */

fn row_to_session(r: &sqlx::any::AnyRow) -> anyhow::Result<Session> {
    let id_str: String = r.get("id");
    let session_id = Uuid::parse_str(&id_str).context("invalid session id")?;

    let admin_str: String = r.get("admin_id");
    let product_str: String = r.get("product_id");

    Ok(Session {
        session_id,
        admin_id: Uuid::parse_str(&admin_str).context("invalid admin id")?,
        product_id: Uuid::parse_str(&product_str).context("invalid product id")?,
        upset_price: r.get("upset_price"),
        final_price: r.get::<Option<f64>, _>("final_price"),
        inventory: r.get("inventory"),
        alpha: r.get("alpha"),
        beta: r.get("beta"),
        gamma: r.get("gamma"),
        start_ms: r.get("start_ms"),
        end_ms: r.get("end_ms"),
        duration_secs: r.get("duration_secs"),
        is_active: r.get::<i64, _>("is_active_i64") != 0,
        created_ms: r.get("created_ms"),
        updated_ms: r.get("updated_ms"),
    })
}

fn row_to_product(r: &sqlx::any::AnyRow) -> anyhow::Result<Product> {
    let id_str: String = r.get("id");
    let admin_str: String = r.get("admin_id");

    Ok(Product {
        product_id: Uuid::parse_str(&id_str).context("invalid product id")?,
        name: r.get("name"),
        description: r.get::<Option<String>, _>("description"),
        admin_id: Uuid::parse_str(&admin_str).context("invalid admin id")?,
        created_ms: r.get("created_ms"),
        updated_ms: r.get("updated_ms"),
    })
}

fn row_to_joined_product(r: &sqlx::any::AnyRow) -> anyhow::Result<Product> {
    let id_str: String = r.get("product_id");
    let admin_str: String = r.get("product_admin_id");

    Ok(Product {
        product_id: Uuid::parse_str(&id_str).context("invalid product id")?,
        name: r.get("product_name"),
        description: r.get::<Option<String>, _>("product_description"),
        admin_id: Uuid::parse_str(&admin_str).context("invalid admin id")?,
        created_ms: r.get("product_created_ms"),
        updated_ms: r.get("product_updated_ms"),
    })
}

fn row_to_ranking(r: &sqlx::any::AnyRow) -> anyhow::Result<RankingRow> {
    let session_str: String = r.get("session_id");
    let user_str: String = r.get("user_id");

    Ok(RankingRow {
        session_id: Uuid::parse_str(&session_str).context("invalid session id")?,
        user_id: Uuid::parse_str(&user_str).context("invalid user id")?,
        ranking: r.get("ranking"),
        bid_price: r.get("bid_price"),
        bid_score: r.get("bid_score"),
        is_winner: r.get::<i64, _>("is_winner_i64") != 0,
    })
}
