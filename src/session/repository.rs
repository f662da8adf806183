use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::session::model::{Product, RankingRow, Session};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn fetch_by_id(&self, session_id: &Uuid) -> Result<Option<Session>>;

    /// Sessions joined with their product, newest first. `active_only`
    /// restricts to `is_active = true`.
    async fn list(&self, active_only: bool) -> Result<Vec<(Session, Product)>>;

    /// Active sessions whose window has closed: candidates for
    /// finalization.
    async fn fetch_expired(&self, now_ms: i64) -> Result<Vec<Session>>;

    /// One-shot finalization transaction: replaces ranking rows, writes
    /// `final_price`, deactivates. Returns false when the session was
    /// already inactive (someone else finalized first); nothing is written
    /// in that case.
    async fn finalize(
        &self,
        session_id: &Uuid,
        final_price: Option<f64>,
        rows: &[RankingRow],
        now_ms: i64,
    ) -> Result<bool>;

    async fn fetch_rankings(&self, session_id: &Uuid) -> Result<Vec<RankingRow>>;

    async fn insert_product(&self, product: &Product) -> Result<()>;

    async fn fetch_product(&self, product_id: &Uuid) -> Result<Option<Product>>;

    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn set_active(&self, session_id: &Uuid, active: bool, now_ms: i64) -> Result<bool>;
}
