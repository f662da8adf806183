//! Rank queries.
//!
//! The live path reads the ranking sorted set plus bid hashes, with one
//! batched username lookup from the durable store. When the sorted set is
//! gone (TTL expiry after finalization), reads fall back to the durable
//! bids table in the same order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::bid::repository::BidRepository;
use crate::cache::keys;
use crate::cache::store::CacheStore;
use crate::error::BidError;
use crate::session::repository::SessionRepository;
use crate::user::repository::UserRepository;

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Clone, Debug)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub username: String,
    pub price: f64,
    pub score: f64,
    pub rank: u64,
    pub is_winner: bool,
}

#[derive(Clone, Debug)]
pub struct LeaderboardPage {
    pub session_id: Uuid,
    pub entries: Vec<LeaderboardEntry>,
    /// Price behind the top-ranked entry.
    pub highest_bid: Option<f64>,
    /// Score at rank K, or the lowest score when fewer than K bidders; a
    /// later bid must beat this to win.
    pub threshold_score: Option<f64>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

#[derive(Clone, Debug)]
pub struct ResultEntry {
    pub user_id: Uuid,
    pub username: String,
    pub ranking: i64,
    pub bid_price: f64,
    pub bid_score: f64,
    pub is_winner: bool,
}

/// Materialized outcome of a finalized session.
#[derive(Clone, Debug)]
pub struct SessionResults {
    pub session_id: Uuid,
    pub final_price: Option<f64>,
    pub is_active: bool,
    pub rankings: Vec<ResultEntry>,
}

pub struct LeaderboardService {
    store: Arc<dyn CacheStore>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    bids: Arc<dyn BidRepository>,
}

impl LeaderboardService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        bids: Arc<dyn BidRepository>,
    ) -> Self {
        Self {
            store,
            sessions,
            users,
            bids,
        }
    }

    #[instrument(skip(self), target = "leaderboard", fields(session_id = %session_id, page, page_size))]
    pub async fn page(
        &self,
        session_id: &Uuid,
        page: u64,
        page_size: u64,
    ) -> Result<LeaderboardPage, BidError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let session = self
            .sessions
            .fetch_by_id(session_id)
            .await
            .map_err(BidError::unavailable)?
            .ok_or(BidError::SessionNotFound)?;
        let inventory = session.inventory.max(0) as u64;

        let ranking_key = keys::ranking(session_id);
        let total = self
            .store
            .zcard(&ranking_key)
            .await
            .map_err(BidError::unavailable)?;

        if total == 0 {
            return self
                .durable_page(session_id, inventory, page, page_size, offset)
                .await;
        }

        let slice = self
            .store
            .zrevrange_withscores(&ranking_key, offset as i64, (offset + page_size) as i64 - 1)
            .await
            .map_err(BidError::unavailable)?;

        let full = self
            .store
            .zrevrange_withscores(&ranking_key, 0, -1)
            .await
            .map_err(BidError::unavailable)?;

        let threshold_score = threshold(&full.iter().map(|(_, s)| *s).collect::<Vec<_>>(), inventory);

        let highest_bid = match full.first() {
            Some((member, _)) => self.bid_price(session_id, member).await?,
            None => None,
        };

        let slice_ids: Vec<Uuid> = slice
            .iter()
            .filter_map(|(m, _)| Uuid::parse_str(m).ok())
            .collect();
        let usernames = self
            .users
            .fetch_usernames(&slice_ids)
            .await
            .map_err(BidError::unavailable)?;

        let mut entries = Vec::with_capacity(slice.len());
        for (i, (member, score)) in slice.iter().enumerate() {
            let Ok(user_id) = Uuid::parse_str(member) else {
                continue;
            };

            let rank = offset + i as u64 + 1;
            entries.push(LeaderboardEntry {
                user_id,
                username: display_name(&usernames, &user_id),
                price: self.bid_price(session_id, member).await?.unwrap_or(0.0),
                score: *score,
                rank,
                is_winner: rank <= inventory,
            });
        }

        Ok(LeaderboardPage {
            session_id: *session_id,
            entries,
            highest_bid,
            threshold_score,
            page,
            page_size,
            total_count: total,
            total_pages: total.div_ceil(page_size),
        })
    }

    /// Final rankings of a session, from the materialized table.
    #[instrument(skip(self), target = "leaderboard", fields(session_id = %session_id))]
    pub async fn results(&self, session_id: &Uuid) -> Result<SessionResults, BidError> {
        let session = self
            .sessions
            .fetch_by_id(session_id)
            .await
            .map_err(BidError::unavailable)?
            .ok_or(BidError::SessionNotFound)?;

        let rows = self
            .sessions
            .fetch_rankings(session_id)
            .await
            .map_err(BidError::unavailable)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
        let usernames = self
            .users
            .fetch_usernames(&ids)
            .await
            .map_err(BidError::unavailable)?;

        let rankings = rows
            .into_iter()
            .map(|r| ResultEntry {
                user_id: r.user_id,
                username: display_name(&usernames, &r.user_id),
                ranking: r.ranking,
                bid_price: r.bid_price,
                bid_score: r.bid_score,
                is_winner: r.is_winner,
            })
            .collect();

        Ok(SessionResults {
            session_id: *session_id,
            final_price: session.final_price,
            is_active: session.is_active,
            rankings,
        })
    }

    /// Durable-store path for sessions whose sorted set has expired.
    async fn durable_page(
        &self,
        session_id: &Uuid,
        inventory: u64,
        page: u64,
        page_size: u64,
        offset: u64,
    ) -> Result<LeaderboardPage, BidError> {
        let rows = self
            .bids
            .fetch_sorted(session_id)
            .await
            .map_err(BidError::unavailable)?;

        let total = rows.len() as u64;
        let threshold_score = threshold(&rows.iter().map(|r| r.score).collect::<Vec<_>>(), inventory);
        let highest_bid = rows.first().map(|r| r.price);

        let slice: Vec<_> = rows
            .into_iter()
            .skip(offset as usize)
            .take(page_size as usize)
            .collect();

        let ids: Vec<Uuid> = slice.iter().map(|r| r.user_id).collect();
        let usernames = self
            .users
            .fetch_usernames(&ids)
            .await
            .map_err(BidError::unavailable)?;

        let entries = slice
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let rank = offset + i as u64 + 1;
                LeaderboardEntry {
                    user_id: r.user_id,
                    username: display_name(&usernames, &r.user_id),
                    price: r.price,
                    score: r.score,
                    rank,
                    is_winner: rank <= inventory,
                }
            })
            .collect();

        Ok(LeaderboardPage {
            session_id: *session_id,
            entries,
            highest_bid,
            threshold_score,
            page,
            page_size,
            total_count: total,
            total_pages: total.div_ceil(page_size),
        })
    }

    async fn bid_price(&self, session_id: &Uuid, member: &str) -> Result<Option<f64>, BidError> {
        let Ok(user_id) = Uuid::parse_str(member) else {
            return Ok(None);
        };

        let hash = self
            .store
            .hgetall(&keys::bid(session_id, &user_id))
            .await
            .map_err(BidError::unavailable)?;

        Ok(hash.get("price").and_then(|p| p.parse().ok()))
    }
}

fn display_name(usernames: &HashMap<Uuid, String>, user_id: &Uuid) -> String {
    usernames
        .get(user_id)
        .cloned()
        .unwrap_or_else(|| format!("User {user_id}"))
}

/// Score at rank `min(K, N)`; None when there are no scores.
fn threshold(scores_desc: &[f64], inventory: u64) -> Option<f64> {
    if scores_desc.is_empty() {
        return None;
    }

    let idx = (inventory.max(1) as usize).min(scores_desc.len()) - 1;
    Some(scores_desc[idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid::repository::BidRow;
    use crate::cache::memory::MemoryCacheStore;
    use crate::cache::store::CacheOp;
    use crate::session::model::{Product, RankingRow, Session};
    use crate::user::model::User;
    use async_trait::async_trait;

    struct FixedSessionRepo {
        session: Option<Session>,
        rankings: Vec<RankingRow>,
    }

    #[async_trait]
    impl SessionRepository for FixedSessionRepo {
        async fn fetch_by_id(&self, _id: &Uuid) -> anyhow::Result<Option<Session>> {
            Ok(self.session.clone())
        }

        async fn list(&self, _active_only: bool) -> anyhow::Result<Vec<(Session, Product)>> {
            Ok(vec![])
        }

        async fn fetch_expired(&self, _now_ms: i64) -> anyhow::Result<Vec<Session>> {
            Ok(vec![])
        }

        async fn finalize(
            &self,
            _id: &Uuid,
            _final_price: Option<f64>,
            _rows: &[RankingRow],
            _now_ms: i64,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn fetch_rankings(&self, _id: &Uuid) -> anyhow::Result<Vec<RankingRow>> {
            Ok(self.rankings.clone())
        }

        async fn insert_product(&self, _product: &Product) -> anyhow::Result<()> {
            Ok(())
        }

        async fn fetch_product(&self, _id: &Uuid) -> anyhow::Result<Option<Product>> {
            Ok(None)
        }

        async fn insert_session(&self, _session: &Session) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_active(
            &self,
            _id: &Uuid,
            _active: bool,
            _now_ms: i64,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct NamedUserRepo {
        names: HashMap<Uuid, String>,
    }

    #[async_trait]
    impl UserRepository for NamedUserRepo {
        async fn fetch_by_id(&self, _id: &Uuid) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn fetch_by_username(&self, _username: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn fetch_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            Ok(None)
        }

        async fn fetch_weight(&self, _id: &Uuid) -> anyhow::Result<Option<f64>> {
            Ok(None)
        }

        async fn fetch_usernames(
            &self,
            ids: &[Uuid],
        ) -> anyhow::Result<HashMap<Uuid, String>> {
            Ok(ids
                .iter()
                .filter_map(|id| self.names.get(id).map(|n| (*id, n.clone())))
                .collect())
        }

        async fn insert(&self, _user: &User) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedBidRepo {
        rows: Vec<BidRow>,
    }

    #[async_trait]
    impl BidRepository for FixedBidRepo {
        async fn upsert_batch(&self, _rows: &[BidRow]) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn fetch_sorted(&self, _id: &Uuid) -> anyhow::Result<Vec<BidRow>> {
            Ok(self.rows.clone())
        }

        async fn count(&self, _id: &Uuid) -> anyhow::Result<u64> {
            Ok(self.rows.len() as u64)
        }
    }

    fn mk_session(inventory: i64) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            admin_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            upset_price: 10.0,
            final_price: None,
            inventory,
            alpha: 1.0,
            beta: 100.0,
            gamma: 1.0,
            start_ms: 0,
            end_ms: 600_000,
            duration_secs: 600,
            is_active: true,
            created_ms: 0,
            updated_ms: 0,
        }
    }

    /// Seeds `n` bidders with ascending user index and descending score.
    async fn seed(
        store: &MemoryCacheStore,
        session_id: &Uuid,
        n: u32,
    ) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..n {
            let user = Uuid::new_v4();
            let score = 1_000.0 - i as f64;
            let price = 500.0 - i as f64;
            store
                .apply(&[
                    CacheOp::ZAdd {
                        key: keys::ranking(session_id),
                        member: user.to_string(),
                        score,
                    },
                    CacheOp::HSet {
                        key: keys::bid(session_id, &user),
                        fields: vec![
                            ("price".into(), price.to_string()),
                            ("score".into(), score.to_string()),
                        ],
                    },
                ])
                .await
                .expect("seed");
            ids.push(user);
        }
        ids
    }

    fn mk_service(
        store: Arc<MemoryCacheStore>,
        session: Session,
        names: HashMap<Uuid, String>,
        rows: Vec<BidRow>,
    ) -> LeaderboardService {
        LeaderboardService::new(
            store,
            Arc::new(FixedSessionRepo {
                session: Some(session),
                rankings: vec![],
            }),
            Arc::new(NamedUserRepo { names }),
            Arc::new(FixedBidRepo { rows }),
        )
    }

    #[tokio::test]
    async fn second_page_carries_ranks_and_totals() {
        let store = Arc::new(MemoryCacheStore::new());
        let session = mk_session(3);
        let session_id = session.session_id;
        seed(&store, &session_id, 12).await;

        let service = mk_service(store, session, HashMap::new(), vec![]);
        let page = service.page(&session_id, 2, 5).await.expect("page");

        assert_eq!(page.total_count, 12);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.entries.len(), 5);
        assert_eq!(page.entries[0].rank, 6);
        assert_eq!(page.entries[4].rank, 10);
        assert!(page.entries.iter().all(|e| !e.is_winner));

        // Threshold sits at rank K = 3 across the full set.
        assert_eq!(page.threshold_score, Some(998.0));
        assert_eq!(page.highest_bid, Some(500.0));
    }

    #[tokio::test]
    async fn first_page_marks_top_k_winners() {
        let store = Arc::new(MemoryCacheStore::new());
        let session = mk_session(3);
        let session_id = session.session_id;
        seed(&store, &session_id, 5).await;

        let service = mk_service(store, session, HashMap::new(), vec![]);
        let page = service.page(&session_id, 1, 50).await.expect("page");

        let winners: Vec<bool> = page.entries.iter().map(|e| e.is_winner).collect();
        assert_eq!(winners, vec![true, true, true, false, false]);
    }

    #[tokio::test]
    async fn page_inputs_are_clamped() {
        let store = Arc::new(MemoryCacheStore::new());
        let session = mk_session(3);
        let session_id = session.session_id;
        seed(&store, &session_id, 2).await;

        let service = mk_service(store, session, HashMap::new(), vec![]);
        let page = service.page(&session_id, 0, 10_000).await.expect("page");

        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn fewer_bidders_than_inventory_uses_lowest_threshold() {
        let store = Arc::new(MemoryCacheStore::new());
        let session = mk_session(5);
        let session_id = session.session_id;
        seed(&store, &session_id, 2).await;

        let service = mk_service(store, session, HashMap::new(), vec![]);
        let page = service.page(&session_id, 1, 50).await.expect("page");

        assert_eq!(page.threshold_score, Some(999.0));
        assert!(page.entries.iter().all(|e| e.is_winner));
    }

    #[tokio::test]
    async fn empty_sorted_set_falls_back_to_durable_store() {
        let store = Arc::new(MemoryCacheStore::new());
        let session = mk_session(1);
        let session_id = session.session_id;

        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
        let rows = vec![
            BidRow {
                session_id,
                user_id: user_a,
                price: 400.0,
                score: 434.0,
                updated_ms: 0,
            },
            BidRow {
                session_id,
                user_id: user_b,
                price: 300.0,
                score: 351.0,
                updated_ms: 0,
            },
        ];

        let names = HashMap::from([(user_a, "alice".to_string())]);
        let service = mk_service(store, session, names, rows);
        let page = service.page(&session_id, 1, 50).await.expect("page");

        assert_eq!(page.total_count, 2);
        assert_eq!(page.highest_bid, Some(400.0));
        assert_eq!(page.threshold_score, Some(434.0));
        assert_eq!(page.entries[0].username, "alice");
        assert!(page.entries[0].is_winner);
        assert!(!page.entries[1].is_winner);
        // Unknown usernames render a stable placeholder.
        assert!(page.entries[1].username.starts_with("User "));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = Arc::new(MemoryCacheStore::new());
        let service = LeaderboardService::new(
            store,
            Arc::new(FixedSessionRepo {
                session: None,
                rankings: vec![],
            }),
            Arc::new(NamedUserRepo {
                names: HashMap::new(),
            }),
            Arc::new(FixedBidRepo { rows: vec![] }),
        );

        let err = service
            .page(&Uuid::new_v4(), 1, 50)
            .await
            .expect_err("unknown");
        assert!(matches!(err, BidError::SessionNotFound));
    }
}
