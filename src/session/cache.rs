use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::keys;
use crate::cache::store::{CacheOp, CacheStore};
use crate::error::BidError;
use crate::session::model::{Liveness, SessionParams};
use crate::session::repository::SessionRepository;
use crate::time::now_ms;
use crate::user::repository::UserRepository;

/// Bounded in-memory map with per-entry deadlines.
///
/// Guarantees:
/// - Memory usage is bounded by `max_entries`.
/// - Expired entries read as absent and are dropped on access.
/// - On overflow, evicts the entry closest to expiry.
struct BoundedTtl<K, V> {
    max_entries: usize,
    ttl: Duration,
    map: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedTtl<K, V> {
    fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            map: HashMap::new(),
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        match self.map.get(key) {
            Some((deadline, _)) if *deadline <= Instant::now() => {
                self.map.remove(key);
                None
            }
            Some((_, value)) => Some(value.clone()),
            None => None,
        }
    }

    fn put(&mut self, key: K, value: V) {
        if self.max_entries > 0
            && self.map.len() >= self.max_entries
            && !self.map.contains_key(&key)
        {
            // Drop the entry that expires soonest to keep memory bounded.
            let victim = self
                .map
                .iter()
                .min_by_key(|(_, (deadline, _))| *deadline)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                self.map.remove(&victim);
            }
        }

        self.map.insert(key, (Instant::now() + self.ttl, value));
    }
}

/// Read-through cache for session parameters, liveness, upset prices and
/// user weights.
///
/// Layering: in-process L1 (bounded, TTL'd) for the hot scoring inputs,
/// the shared cache as L2, the durable store last. Misses populate both
/// layers on the way back.
pub struct SessionCache {
    store: Arc<dyn CacheStore>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,

    params_l1: Mutex<BoundedTtl<Uuid, SessionParams>>,
    weight_l1: Mutex<BoundedTtl<Uuid, f64>>,

    cache_ttl_secs: i64,
    upset_ttl_secs: i64,
}

const L1_MAX_ENTRIES: usize = 4096;
const L1_TTL: Duration = Duration::from_secs(30);

impl SessionCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        cache_ttl_secs: i64,
        upset_ttl_secs: i64,
    ) -> Self {
        Self {
            store,
            sessions,
            users,
            params_l1: Mutex::new(BoundedTtl::new(L1_MAX_ENTRIES, L1_TTL)),
            weight_l1: Mutex::new(BoundedTtl::new(L1_MAX_ENTRIES, L1_TTL)),
            cache_ttl_secs,
            upset_ttl_secs,
        }
    }

    /// Scoring parameters for a session.
    #[instrument(skip(self), target = "session_cache", fields(session_id = %session_id))]
    pub async fn params(&self, session_id: &Uuid) -> Result<SessionParams, BidError> {
        if let Some(params) = self.params_l1.lock().get(session_id) {
            return Ok(params);
        }

        let key = keys::session_params(session_id);
        let cached = self
            .store
            .hgetall(&key)
            .await
            .map_err(BidError::unavailable)?;

        if let Some(params) = parse_params(&cached) {
            self.params_l1.lock().put(*session_id, params);
            return Ok(params);
        }

        debug!("session params cache miss; loading from durable store");

        let session = self
            .sessions
            .fetch_by_id(session_id)
            .await
            .map_err(BidError::unavailable)?
            .ok_or(BidError::SessionNotFound)?;

        let params = session.params();

        self.store
            .apply(&[
                CacheOp::HSet {
                    key: key.clone(),
                    fields: vec![
                        ("alpha".into(), params.alpha.to_string()),
                        ("beta".into(), params.beta.to_string()),
                        ("gamma".into(), params.gamma.to_string()),
                        ("start_ms".into(), params.start_ms.to_string()),
                        ("end_ms".into(), params.end_ms.to_string()),
                    ],
                },
                CacheOp::Expire {
                    key,
                    ttl_secs: self.cache_ttl_secs,
                },
            ])
            .await
            .map_err(BidError::unavailable)?;

        self.params_l1.lock().put(*session_id, params);
        Ok(params)
    }

    /// The user's scoring weight.
    #[instrument(skip(self), target = "session_cache", fields(user_id = %user_id))]
    pub async fn user_weight(&self, user_id: &Uuid) -> Result<f64, BidError> {
        if let Some(weight) = self.weight_l1.lock().get(user_id) {
            return Ok(weight);
        }

        let key = keys::user_weight(user_id);
        let cached = self.store.get(&key).await.map_err(BidError::unavailable)?;

        if let Some(weight) = cached.and_then(|v| v.parse::<f64>().ok()) {
            self.weight_l1.lock().put(*user_id, weight);
            return Ok(weight);
        }

        let weight = self
            .users
            .fetch_weight(user_id)
            .await
            .map_err(BidError::unavailable)?
            .ok_or(BidError::UserNotFound)?;

        self.store
            .set_ex(&key, &weight.to_string(), self.cache_ttl_secs)
            .await
            .map_err(BidError::unavailable)?;

        self.weight_l1.lock().put(*user_id, weight);
        Ok(weight)
    }

    /// The session's minimum acceptable bid.
    #[instrument(skip(self), target = "session_cache", fields(session_id = %session_id))]
    pub async fn upset_price(&self, session_id: &Uuid) -> Result<f64, BidError> {
        let key = keys::session_upset_price(session_id);
        let cached = self.store.get(&key).await.map_err(BidError::unavailable)?;

        if let Some(price) = cached.and_then(|v| v.parse::<f64>().ok()) {
            return Ok(price);
        }

        let session = self
            .sessions
            .fetch_by_id(session_id)
            .await
            .map_err(BidError::unavailable)?
            .ok_or(BidError::SessionNotFound)?;

        self.store
            .set_ex(&key, &session.upset_price.to_string(), self.upset_ttl_secs)
            .await
            .map_err(BidError::unavailable)?;

        Ok(session.upset_price)
    }

    /// Liveness gate for bid acceptance.
    ///
    /// Rejection states cache with long TTLs because they are stable; the
    /// active state caches for 10s only, so deactivation is observed
    /// within one monitor cycle. Late bids inside that window are absorbed
    /// by the finalizer's force-drain.
    #[instrument(skip(self), target = "session_cache", fields(session_id = %session_id))]
    pub async fn check_active(&self, session_id: &Uuid) -> Result<(), BidError> {
        let key = keys::session_active(session_id);
        let cached = self.store.get(&key).await.map_err(BidError::unavailable)?;

        if let Some(state) = cached {
            return match state.as_str() {
                "active" => Ok(()),
                "not found" => Err(BidError::SessionNotFound),
                reason => Err(BidError::SessionNotActive(reason.to_string())),
            };
        }

        let session = self
            .sessions
            .fetch_by_id(session_id)
            .await
            .map_err(BidError::unavailable)?;

        let Some(session) = session else {
            self.store
                .set_ex(&key, "not found", 60)
                .await
                .map_err(BidError::unavailable)?;
            return Err(BidError::SessionNotFound);
        };

        let liveness = session.liveness(now_ms());

        self.store
            .set_ex(&key, liveness.reason(), liveness.cache_ttl_secs())
            .await
            .map_err(BidError::unavailable)?;

        match liveness {
            Liveness::Active => Ok(()),
            other => Err(BidError::SessionNotActive(other.reason().to_string())),
        }
    }

    /// Drops the cached liveness state so the next check sees the durable
    /// store. Best effort; the 10s TTL bounds staleness anyway.
    pub async fn invalidate_active(&self, session_id: &Uuid) {
        let key = keys::session_active(session_id);
        if let Err(e) = self.store.del(&key).await {
            warn!(error = %e, %session_id, "failed to invalidate liveness cache");
        }
    }
}

fn parse_params(fields: &HashMap<String, String>) -> Option<SessionParams> {
    Some(SessionParams {
        alpha: fields.get("alpha")?.parse().ok()?,
        beta: fields.get("beta")?.parse().ok()?,
        gamma: fields.get("gamma")?.parse().ok()?,
        start_ms: fields.get("start_ms")?.parse().ok()?,
        end_ms: fields.get("end_ms")?.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use crate::session::model::{Product, RankingRow, Session};
    use crate::user::model::User;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mk_session(start_ms: i64, end_ms: i64, is_active: bool) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            admin_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            upset_price: 200.0,
            final_price: None,
            inventory: 5,
            alpha: 1.0,
            beta: 100.0,
            gamma: 1.0,
            start_ms,
            end_ms,
            duration_secs: (end_ms - start_ms) / 1000,
            is_active,
            created_ms: start_ms,
            updated_ms: start_ms,
        }
    }

    struct StubSessionRepo {
        session: Option<Session>,
        fetch_calls: AtomicUsize,
    }

    impl StubSessionRepo {
        fn new(session: Option<Session>) -> Self {
            Self {
                session,
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionRepository for StubSessionRepo {
        async fn fetch_by_id(&self, _id: &Uuid) -> anyhow::Result<Option<Session>> {
            self.fetch_calls.fetch_add(1, Ordering::Relaxed);
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
            Ok(vec![])
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

    struct StubUserRepo {
        weight: Option<f64>,
    }

    #[async_trait]
    impl UserRepository for StubUserRepo {
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
            Ok(self.weight)
        }

        async fn fetch_usernames(
            &self,
            _ids: &[Uuid],
        ) -> anyhow::Result<HashMap<Uuid, String>> {
            Ok(HashMap::new())
        }

        async fn insert(&self, _user: &User) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn mk_cache(
        session: Option<Session>,
        weight: Option<f64>,
    ) -> (SessionCache, Arc<StubSessionRepo>, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        let sessions = Arc::new(StubSessionRepo::new(session));
        let users = Arc::new(StubUserRepo { weight });

        let cache = SessionCache::new(
            store.clone(),
            sessions.clone(),
            users,
            3600,
            7200,
        );

        (cache, sessions, store)
    }

    #[tokio::test]
    async fn params_read_through_hits_store_once() {
        let now = now_ms();
        let session = mk_session(now - 1_000, now + 60_000, true);
        let id = session.session_id;
        let (cache, repo, _) = mk_cache(Some(session), None);

        let first = cache.params(&id).await.expect("params");
        let second = cache.params(&id).await.expect("params");

        assert_eq!(first, second);
        assert_eq!(repo.fetch_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn params_missing_session_is_not_found() {
        let (cache, _, _) = mk_cache(None, None);
        let err = cache.params(&Uuid::new_v4()).await.expect_err("must fail");
        assert!(matches!(err, BidError::SessionNotFound));
    }

    #[tokio::test]
    async fn check_active_caches_the_reason() {
        let now = now_ms();
        let session = mk_session(now - 120_000, now - 60_000, true);
        let id = session.session_id;
        let (cache, repo, store) = mk_cache(Some(session), None);

        let err = cache.check_active(&id).await.expect_err("ended");
        assert!(matches!(err, BidError::SessionNotActive(ref r) if r == "ended"));

        let cached = store.get(&keys::session_active(&id)).await.unwrap();
        assert_eq!(cached.as_deref(), Some("ended"));

        // Second check is served from the cache.
        let _ = cache.check_active(&id).await.expect_err("still ended");
        assert_eq!(repo.fetch_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn check_active_unknown_session() {
        let (cache, _, store) = mk_cache(None, None);
        let id = Uuid::new_v4();

        let err = cache.check_active(&id).await.expect_err("unknown");
        assert!(matches!(err, BidError::SessionNotFound));

        let cached = store.get(&keys::session_active(&id)).await.unwrap();
        assert_eq!(cached.as_deref(), Some("not found"));
    }

    #[tokio::test]
    async fn weight_unknown_user() {
        let (cache, _, _) = mk_cache(None, None);
        let err = cache
            .user_weight(&Uuid::new_v4())
            .await
            .expect_err("unknown user");
        assert!(matches!(err, BidError::UserNotFound));
    }

    #[tokio::test]
    async fn upset_price_populates_cache() {
        let now = now_ms();
        let session = mk_session(now, now + 60_000, true);
        let id = session.session_id;
        let (cache, repo, _) = mk_cache(Some(session), None);

        assert_eq!(cache.upset_price(&id).await.expect("price"), 200.0);
        assert_eq!(cache.upset_price(&id).await.expect("price"), 200.0);
        assert_eq!(repo.fetch_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn bounded_ttl_evicts_soonest_expiring_at_capacity() {
        let mut map: BoundedTtl<u32, u32> = BoundedTtl::new(2, Duration::from_secs(60));
        map.put(1, 10);
        map.put(2, 20);
        map.put(3, 30);

        // Entry 1 was inserted first, so it expires soonest and goes.
        assert_eq!(map.get(&1), None);
        assert_eq!(map.get(&2), Some(20));
        assert_eq!(map.get(&3), Some(30));
    }
}
