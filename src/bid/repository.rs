use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct BidRow {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub score: f64,
    pub updated_ms: i64,
}

#[async_trait]
pub trait BidRepository: Send + Sync {
    /// Idempotent batch upsert keyed on `(session_id, user_id)`; replays
    /// and repeats converge on the latest price/score.
    async fn upsert_batch(&self, rows: &[BidRow]) -> Result<u64>;

    /// All bids of a session, score descending then user id ascending.
    async fn fetch_sorted(&self, session_id: &Uuid) -> Result<Vec<BidRow>>;

    async fn count(&self, session_id: &Uuid) -> Result<u64>;
}
