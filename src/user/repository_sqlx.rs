use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::user::model::User;
use crate::user::repository::UserRepository;

const USER_COLUMNS: &str = r#"
  id, username, email, password_hash,
  CAST(is_admin AS INTEGER) AS is_admin_i64,
  weight, created_ms, updated_ms
"#;

/// SQLx-backed implementation of UserRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxUserRepository {
    pool: AnyPool,
}

impl SqlxUserRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn fetch_by_id(&self, user_id: &Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?;"
        ))
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn fetch_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?;"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn fetch_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?;"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn fetch_weight(&self, user_id: &Uuid) -> anyhow::Result<Option<f64>> {
        let row = sqlx::query("SELECT weight FROM users WHERE id = ?;")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<f64, _>("weight")))
    }

    async fn fetch_usernames(&self, user_ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let sql = format!("SELECT id, username FROM users WHERE id IN ({placeholders});");

        let mut query = sqlx::query(&sql);
        for id in user_ids {
            query = query.bind(id.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::with_capacity(rows.len());
        for r in rows {
            let id_str: String = r.get("id");
            let id = Uuid::parse_str(&id_str).context("invalid user id")?;
            out.insert(id, r.get::<String, _>("username"));
        }

        Ok(out)
    }

    async fn insert(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
INSERT INTO users (id, username, email, password_hash, is_admin, weight, created_ms, updated_ms)
VALUES (?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(user.user_id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.weight)
        .bind(user.created_ms)
        .bind(user.updated_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_user(r: &sqlx::any::AnyRow) -> anyhow::Result<User> {
    let id_str: String = r.get("id");
    let user_id = Uuid::parse_str(&id_str).context("invalid user id")?;

    Ok(User {
        user_id,
        username: r.get("username"),
        email: r.get("email"),
        password_hash: r.get("password_hash"),
        is_admin: r.get::<i64, _>("is_admin_i64") != 0,
        weight: r.get("weight"),
        created_ms: r.get("created_ms"),
        updated_ms: r.get("updated_ms"),
    })
}
