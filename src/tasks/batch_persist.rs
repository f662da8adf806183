//! Batch persister.
//!
//! Responsibilities:
//! - Periodically drain dirty sessions: scan their bid-metadata hashes and
//!   upsert the rows into the durable bids table in one batch.
//! - Clean up drained metadata and dirty markers only after the upsert
//!   succeeds, so a crash or store failure never loses accepted bids.
//! - Classify failures and back off instead of exiting.
//!
//! Safety/liveness properties:
//! - The upsert is idempotent on (session_id, user_id); repeated drains
//!   converge on the latest accepted score.
//! - A failed session keeps its dirty marker and metadata; the next cycle
//!   retries. One bad session does not block the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bid::repository::{BidRepository, BidRow};
use crate::cache::keys;
use crate::cache::store::{CacheOp, CacheStore};
use crate::logger::warn_if_slow;

/// Back-off after pool exhaustion or connection timeouts; gives the
/// durable store room to recover.
const SLOW_BACKOFF: Duration = Duration::from_secs(10);
/// Back-off for any other drain failure; avoids a tight error loop.
const FAST_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub sessions: usize,
    pub bids: usize,
}

pub struct BatchPersister {
    store: Arc<dyn CacheStore>,
    bids: Arc<dyn BidRepository>,
    interval: Duration,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn CacheStore>, bids: Arc<dyn BidRepository>, interval: Duration) -> Self {
        Self {
            store,
            bids,
            interval,
        }
    }

    /// Drain loop. Exits only on shutdown, after one final flush of any
    /// in-flight dirty sessions.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "batch persist task started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if let Err(e) = self.drain_once().await {
                        warn!(error = %e, "final drain on shutdown failed");
                    }
                    info!("batch persist task stopped");
                    return;
                }
            }

            if let Err(e) = self.drain_once().await {
                let backoff = classify_backoff(&e);
                warn!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "drain cycle failed; backing off"
                );

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => {
                        info!("batch persist task stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One drain cycle over every dirty session. Per-session failures are
    /// isolated; if any occurred, the last one is returned after the rest
    /// have been processed so the caller can back off.
    #[instrument(skip(self), target = "persister")]
    pub async fn drain_once(&self) -> anyhow::Result<DrainStats> {
        let dirty = self.store.smembers(keys::DIRTY_SESSIONS).await?;
        if dirty.is_empty() {
            return Ok(DrainStats::default());
        }

        let mut stats = DrainStats::default();
        let mut last_err: Option<anyhow::Error> = None;

        for member in dirty {
            let Ok(session_id) = Uuid::parse_str(&member) else {
                warn!(member = %member, "dropping malformed dirty-session member");
                self.store.srem(keys::DIRTY_SESSIONS, &member).await?;
                continue;
            };

            match self.drain_session(&session_id).await {
                Ok(count) => {
                    stats.sessions += 1;
                    stats.bids += count;
                }
                Err(e) => {
                    // Marker and metadata stay put; retried next cycle.
                    warn!(error = %e, %session_id, "session drain failed");
                    last_err = Some(e);
                }
            }
        }

        if let Some(e) = last_err {
            return Err(e);
        }

        if stats.bids > 0 {
            info!(
                sessions = stats.sessions,
                bids = stats.bids,
                "batch persisted"
            );
        }

        Ok(stats)
    }

    /// Immediate drain of one session, bypassing the cycle. The finalizer
    /// calls this before reading bids back so late arrivals are durable.
    #[instrument(skip(self), target = "persister", fields(session_id = %session_id))]
    pub async fn force_drain(&self, session_id: &Uuid) -> anyhow::Result<usize> {
        self.drain_session(session_id).await
    }

    async fn drain_session(&self, session_id: &Uuid) -> anyhow::Result<usize> {
        let pattern = keys::bid_metadata_pattern(session_id);
        let metadata_keys = self.store.scan_match(&pattern).await?;

        if metadata_keys.is_empty() {
            // Nothing buffered; clear the marker.
            self.store
                .srem(keys::DIRTY_SESSIONS, &session_id.to_string())
                .await?;
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(metadata_keys.len());
        for key in &metadata_keys {
            let hash = self.store.hgetall(key).await?;
            if hash.is_empty() {
                continue;
            }

            match parse_metadata(session_id, &hash) {
                Some(row) => rows.push(row),
                None => {
                    warn!(key = %key, "skipping invalid bid metadata");
                }
            }
        }

        if !rows.is_empty() {
            warn_if_slow("bids_upsert_batch", Duration::from_millis(250), async {
                self.bids.upsert_batch(&rows).await
            })
            .await?;
        }

        // Cleanup strictly after the successful upsert.
        let mut ops: Vec<CacheOp> = metadata_keys
            .into_iter()
            .map(|key| CacheOp::Del { key })
            .collect();
        ops.push(CacheOp::SRem {
            key: keys::DIRTY_SESSIONS.into(),
            member: session_id.to_string(),
        });
        self.store.apply(&ops).await?;

        Ok(rows.len())
    }
}

fn parse_metadata(session_id: &Uuid, hash: &HashMap<String, String>) -> Option<BidRow> {
    Some(BidRow {
        session_id: *session_id,
        user_id: hash.get("user_id").and_then(|v| Uuid::parse_str(v).ok())?,
        price: hash.get("bid_price")?.parse().ok()?,
        score: hash.get("bid_score")?.parse().ok()?,
        updated_ms: hash.get("updated_at")?.parse().ok()?,
    })
}

fn classify_backoff(err: &anyhow::Error) -> Duration {
    let msg = format!("{err:#}");
    if msg.contains("pool timed out")
        || msg.contains("timed out")
        || msg.contains("too many")
        || msg.contains("connection")
    {
        SLOW_BACKOFF
    } else {
        FAST_BACKOFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCacheStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    /// Bid repository double that doubles as an in-memory bids table.
    pub struct RecordingBidRepo {
        pub rows: Mutex<HashMap<(Uuid, Uuid), BidRow>>,
        pub fail: Mutex<Option<String>>,
    }

    impl RecordingBidRepo {
        pub fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                fail: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl BidRepository for RecordingBidRepo {
        async fn upsert_batch(&self, rows: &[BidRow]) -> anyhow::Result<u64> {
            if let Some(msg) = self.fail.lock().clone() {
                return Err(anyhow!(msg));
            }

            let mut table = self.rows.lock();
            for row in rows {
                table.insert((row.session_id, row.user_id), row.clone());
            }
            Ok(rows.len() as u64)
        }

        async fn fetch_sorted(&self, session_id: &Uuid) -> anyhow::Result<Vec<BidRow>> {
            let mut rows: Vec<BidRow> = self
                .rows
                .lock()
                .values()
                .filter(|r| r.session_id == *session_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.user_id.to_string().cmp(&b.user_id.to_string()))
            });
            Ok(rows)
        }

        async fn count(&self, session_id: &Uuid) -> anyhow::Result<u64> {
            Ok(self
                .rows
                .lock()
                .values()
                .filter(|r| r.session_id == *session_id)
                .count() as u64)
        }
    }

    async fn seed_bid(
        store: &MemoryCacheStore,
        session_id: &Uuid,
        user_id: &Uuid,
        price: f64,
        score: f64,
    ) {
        store
            .apply(&[
                CacheOp::HSet {
                    key: keys::bid_metadata(session_id, user_id),
                    fields: vec![
                        ("user_id".into(), user_id.to_string()),
                        ("bid_price".into(), price.to_string()),
                        ("bid_score".into(), score.to_string()),
                        ("updated_at".into(), "1000".into()),
                    ],
                },
                CacheOp::SAdd {
                    key: keys::DIRTY_SESSIONS.into(),
                    member: session_id.to_string(),
                },
            ])
            .await
            .expect("seed");
    }

    fn mk_persister(
        store: Arc<MemoryCacheStore>,
        repo: Arc<RecordingBidRepo>,
    ) -> BatchPersister {
        BatchPersister::new(store, repo, Duration::from_secs(5))
    }

    #[tokio::test]
    #[traced_test]
    async fn drains_dirty_sessions_and_cleans_up() {
        let store = Arc::new(MemoryCacheStore::new());
        let repo = Arc::new(RecordingBidRepo::new());
        let session_id = Uuid::new_v4();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());

        seed_bid(&store, &session_id, &user_a, 300.0, 351.0).await;
        seed_bid(&store, &session_id, &user_b, 400.0, 434.0).await;

        let persister = mk_persister(store.clone(), repo.clone());
        let stats = persister.drain_once().await.expect("drain");

        assert_eq!(stats, DrainStats { sessions: 1, bids: 2 });
        assert_eq!(repo.rows.lock().len(), 2);
        assert_eq!(
            repo.rows.lock().get(&(session_id, user_b)).map(|r| r.price),
            Some(400.0)
        );

        // Metadata and marker are gone.
        assert!(store
            .scan_match(&keys::bid_metadata_pattern(&session_id))
            .await
            .unwrap()
            .is_empty());
        assert!(store.smembers(keys::DIRTY_SESSIONS).await.unwrap().is_empty());

        assert!(logs_contain("batch persisted"));
    }

    #[tokio::test]
    async fn redrain_overwrites_with_latest_scores() {
        let store = Arc::new(MemoryCacheStore::new());
        let repo = Arc::new(RecordingBidRepo::new());
        let session_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        seed_bid(&store, &session_id, &user, 300.0, 351.0).await;
        mk_persister(store.clone(), repo.clone())
            .drain_once()
            .await
            .expect("drain");

        seed_bid(&store, &session_id, &user, 500.0, 526.0).await;
        mk_persister(store.clone(), repo.clone())
            .drain_once()
            .await
            .expect("drain");

        let table = repo.rows.lock();
        assert_eq!(table.len(), 1);
        let row = table.get(&(session_id, user)).expect("row");
        assert_eq!(row.price, 500.0);
        assert_eq!(row.score, 526.0);
    }

    #[tokio::test]
    async fn failed_upsert_retains_marker_and_metadata() {
        let store = Arc::new(MemoryCacheStore::new());
        let repo = Arc::new(RecordingBidRepo::new());
        *repo.fail.lock() = Some("pool timed out while waiting for an open connection".into());

        let session_id = Uuid::new_v4();
        seed_bid(&store, &session_id, &Uuid::new_v4(), 300.0, 351.0).await;

        let persister = mk_persister(store.clone(), repo.clone());
        let err = persister.drain_once().await.expect_err("must fail");
        assert_eq!(classify_backoff(&err), SLOW_BACKOFF);

        assert!(repo.rows.lock().is_empty());
        assert_eq!(
            store.smembers(keys::DIRTY_SESSIONS).await.unwrap(),
            vec![session_id.to_string()]
        );
        assert_eq!(
            store
                .scan_match(&keys::bid_metadata_pattern(&session_id))
                .await
                .unwrap()
                .len(),
            1
        );

        // Recovery: clear the fault and the next cycle converges.
        *repo.fail.lock() = None;
        persister.drain_once().await.expect("drain");
        assert_eq!(repo.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn invalid_metadata_is_skipped_not_fatal() {
        let store = Arc::new(MemoryCacheStore::new());
        let repo = Arc::new(RecordingBidRepo::new());
        let session_id = Uuid::new_v4();
        let user = Uuid::new_v4();

        seed_bid(&store, &session_id, &user, 300.0, 351.0).await;
        store
            .apply(&[CacheOp::HSet {
                key: keys::bid_metadata(&session_id, &Uuid::new_v4()),
                fields: vec![("user_id".into(), "not-a-uuid".into())],
            }])
            .await
            .expect("seed");

        let stats = mk_persister(store.clone(), repo.clone())
            .drain_once()
            .await
            .expect("drain");

        assert_eq!(stats.bids, 1);
        assert_eq!(repo.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn empty_session_clears_marker() {
        let store = Arc::new(MemoryCacheStore::new());
        let repo = Arc::new(RecordingBidRepo::new());
        let session_id = Uuid::new_v4();

        store
            .apply(&[CacheOp::SAdd {
                key: keys::DIRTY_SESSIONS.into(),
                member: session_id.to_string(),
            }])
            .await
            .expect("seed");

        let stats = mk_persister(store.clone(), repo)
            .drain_once()
            .await
            .expect("drain");

        assert_eq!(stats.bids, 0);
        assert!(store.smembers(keys::DIRTY_SESSIONS).await.unwrap().is_empty());
    }

    #[test]
    fn backoff_classification() {
        let slow = anyhow!("pool timed out while waiting for an open connection");
        assert_eq!(classify_backoff(&slow), SLOW_BACKOFF);

        let generic = anyhow!("constraint violation");
        assert_eq!(classify_backoff(&generic), FAST_BACKOFF);
    }
}
