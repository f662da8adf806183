use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::bid::repository::{BidRepository, BidRow};

/// SQLx-backed implementation of BidRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxBidRepository {
    pool: AnyPool,
}

impl SqlxBidRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BidRepository for SqlxBidRepository {
    async fn upsert_batch(&self, rows: &[BidRow]) -> anyhow::Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // One multi-row statement: atomic without an explicit transaction,
        // and the unique (session_id, user_id) constraint makes it safe
        // under concurrent drains.
        let values = vec!["(?, ?, ?, ?, ?, ?, ?)"; rows.len()].join(", ");
        let sql = format!(
            r#"
INSERT INTO bids (id, session_id, user_id, price, score, created_ms, updated_ms)
VALUES {values}
ON CONFLICT (session_id, user_id) DO UPDATE SET
  price = excluded.price,
  score = excluded.score,
  updated_ms = excluded.updated_ms;
"#
        );

        let mut query = sqlx::query(&sql);
        for row in rows {
            query = query
                .bind(Uuid::new_v4().to_string())
                .bind(row.session_id.to_string())
                .bind(row.user_id.to_string())
                .bind(row.price)
                .bind(row.score)
                .bind(row.updated_ms)
                .bind(row.updated_ms);
        }

        let res = query.execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    async fn fetch_sorted(&self, session_id: &Uuid) -> anyhow::Result<Vec<BidRow>> {
        let rows = sqlx::query(
            r#"
SELECT session_id, user_id, price, score, updated_ms
FROM bids
WHERE session_id = ?
ORDER BY score DESC, user_id ASC;
"#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_bid(&r)?);
        }

        Ok(out)
    }

    async fn count(&self, session_id: &Uuid) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bids WHERE session_id = ?;")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn row_to_bid(r: &sqlx::any::AnyRow) -> anyhow::Result<BidRow> {
    let session_str: String = r.get("session_id");
    let user_str: String = r.get("user_id");

    Ok(BidRow {
        session_id: Uuid::parse_str(&session_str).context("invalid session id")?,
        user_id: Uuid::parse_str(&user_str).context("invalid user id")?,
        price: r.get("price"),
        score: r.get("score"),
        updated_ms: r.get("updated_ms"),
    })
}
