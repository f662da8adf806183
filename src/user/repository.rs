use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::user::model::User;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn fetch_by_id(&self, user_id: &Uuid) -> Result<Option<User>>;

    async fn fetch_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn fetch_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn fetch_weight(&self, user_id: &Uuid) -> Result<Option<f64>>;

    /// One batched lookup for leaderboard rendering.
    async fn fetch_usernames(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;

    async fn insert(&self, user: &User) -> Result<()>;
}
