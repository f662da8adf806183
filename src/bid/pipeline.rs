//! Bid ingestion hot path.
//!
//! Responsibilities:
//! - Gate each bid: positive price, live session, at or above upset price.
//! - Resolve scoring inputs from the caches, in parallel.
//! - Commit the scored bid to the shared cache as one pipelined batch.
//! - Mark the session dirty for the batch persister.
//!
//! Non-responsibilities:
//! - Durable writes (batch persister owns those).
//! - Winner determination (finalizer owns that).
//!
//! Ordering: ZADD on an existing member overwrites, so the last commit to
//! reach the cache wins for a given (session, user). No per-user lock.
//! Replaying an identical bid is a no-op by the same argument.

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use crate::bid::score;
use crate::cache::keys;
use crate::cache::store::{CacheOp, CacheStore};
use crate::error::BidError;
use crate::session::cache::SessionCache;
use crate::time::now_ms;

/// Outcome returned to the bidder.
#[derive(Clone, Debug)]
pub struct BidAccepted {
    pub score: f64,
    /// 1-based leaderboard position. Read after the commit, outside the
    /// pipelined batch; eventually consistent and advisory.
    pub rank: Option<u64>,
    pub price: f64,
    pub timestamp_ms: i64,
}

pub struct BidPipeline {
    store: Arc<dyn CacheStore>,
    sessions: Arc<SessionCache>,
    ttl_secs: i64,
}

impl BidPipeline {
    pub fn new(store: Arc<dyn CacheStore>, sessions: Arc<SessionCache>, ttl_secs: i64) -> Self {
        Self {
            store,
            sessions,
            ttl_secs,
        }
    }

    #[instrument(
        skip(self),
        target = "bidding",
        fields(session_id = %session_id, user_id = %user_id, price)
    )]
    pub async fn submit(
        &self,
        user_id: &Uuid,
        session_id: &Uuid,
        price: f64,
    ) -> Result<BidAccepted, BidError> {
        // NaN fails this comparison and is rejected with the rest.
        if !(price > 0.0) {
            return Err(BidError::InvalidPrice);
        }

        self.sessions.check_active(session_id).await?;

        let upset_price = self.sessions.upset_price(session_id).await?;
        if price < upset_price {
            return Err(BidError::BelowMinimum(upset_price));
        }

        // Independent lookups; resolve both in one round of waiting.
        let (params, weight) = tokio::join!(
            self.sessions.params(session_id),
            self.sessions.user_weight(user_id),
        );
        let params = params?;
        let weight = weight?;

        let bid_ms = now_ms();
        let response_time = score::response_time_secs(bid_ms, params.start_ms);
        let bid_score = score::bid_score(
            price,
            response_time,
            weight,
            params.alpha,
            params.beta,
            params.gamma,
        );

        let ranking_key = keys::ranking(session_id);
        let bid_key = keys::bid(session_id, user_id);
        let metadata_key = keys::bid_metadata(session_id, user_id);
        let member = user_id.to_string();

        self.store
            .apply(&[
                CacheOp::ZAdd {
                    key: ranking_key.clone(),
                    member: member.clone(),
                    score: bid_score,
                },
                CacheOp::HSet {
                    key: bid_key.clone(),
                    fields: vec![
                        ("price".into(), price.to_string()),
                        ("score".into(), bid_score.to_string()),
                        ("response_time".into(), response_time.to_string()),
                        ("timestamp".into(), bid_ms.to_string()),
                    ],
                },
                CacheOp::HSet {
                    key: metadata_key.clone(),
                    fields: vec![
                        ("user_id".into(), member.clone()),
                        ("bid_price".into(), price.to_string()),
                        ("bid_score".into(), bid_score.to_string()),
                        ("updated_at".into(), bid_ms.to_string()),
                    ],
                },
                CacheOp::Expire {
                    key: ranking_key.clone(),
                    ttl_secs: self.ttl_secs,
                },
                CacheOp::Expire {
                    key: bid_key,
                    ttl_secs: self.ttl_secs,
                },
                CacheOp::Expire {
                    key: metadata_key,
                    ttl_secs: self.ttl_secs,
                },
                CacheOp::SAdd {
                    key: keys::DIRTY_SESSIONS.into(),
                    member: session_id.to_string(),
                },
            ])
            .await
            .map_err(BidError::unavailable)?;

        let rank = match self.store.zrevrank(&ranking_key, &member).await {
            Ok(position) => position.map(|p| p + 1),
            Err(e) => {
                warn!(error = %e, "rank read failed after commit");
                None
            }
        };

        Ok(BidAccepted {
            score: bid_score,
            rank,
            price,
            timestamp_ms: bid_ms,
        })
    }
}
