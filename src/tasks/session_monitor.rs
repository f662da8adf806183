//! Session monitor / finalizer.
//!
//! Responsibilities:
//! - Scan for active sessions whose window has closed.
//! - Finalize each exactly once: force-drain buffered bids, rank all
//!   bidders, mark the top K winners, compute the final price, deactivate.
//!
//! Safety/liveness properties:
//! - Finalization is a single durable transaction guarded by a CAS on
//!   `is_active`; a concurrent admin deactivate either wins it or becomes
//!   a no-op.
//! - A bid accepted during the liveness cache's last 10s window is already
//!   committed to the cache before the drain starts, so the force-drain
//!   absorbs it.
//! - Per-session failures are isolated; one bad session never blocks the
//!   rest of the scan.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::bid::repository::BidRepository;
use crate::session::cache::SessionCache;
use crate::session::model::{RankingRow, Session};
use crate::session::repository::SessionRepository;
use crate::tasks::batch_persist::BatchPersister;
use crate::time::now_ms;

pub struct SessionMonitor {
    sessions: Arc<dyn SessionRepository>,
    bids: Arc<dyn BidRepository>,
    persister: Arc<BatchPersister>,
    cache: Arc<SessionCache>,
    interval: Duration,
}

impl SessionMonitor {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        bids: Arc<dyn BidRepository>,
        persister: Arc<BatchPersister>,
        cache: Arc<SessionCache>,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            bids,
            persister,
            cache,
            interval,
        }
    }

    /// Scan loop. Exits only on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "session monitor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("session monitor stopped");
                    return;
                }
            }

            if let Err(e) = self.tick(now_ms()).await {
                warn!(error = %e, "session monitor tick failed");
            }
        }
    }

    /// One scan over expired sessions; returns how many were finalized.
    #[instrument(skip(self), target = "monitor")]
    pub async fn tick(&self, now_ms: i64) -> anyhow::Result<usize> {
        let expired = self.sessions.fetch_expired(now_ms).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut finalized = 0;
        for session in expired {
            match self.finalize_session(&session, now_ms).await {
                Ok(true) => finalized += 1,
                Ok(false) => {
                    debug!(session_id = %session.session_id, "session already finalized");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        session_id = %session.session_id,
                        "session finalization failed"
                    );
                }
            }
        }

        Ok(finalized)
    }

    /// Finalizes one session. Returns false when another finalizer won the
    /// CAS first; nothing is written in that case.
    #[instrument(
        skip(self, session),
        target = "monitor",
        fields(session_id = %session.session_id, inventory = session.inventory)
    )]
    pub async fn finalize_session(&self, session: &Session, now_ms: i64) -> anyhow::Result<bool> {
        let session_id = session.session_id;

        // Late arrivals committed before this point become durable here.
        let drained = self.persister.force_drain(&session_id).await?;
        if drained > 0 {
            debug!(drained, "force-drained buffered bids before finalizing");
        }

        let bids = self.bids.fetch_sorted(&session_id).await?;
        let inventory = session.inventory.max(0);

        let rows: Vec<RankingRow> = bids
            .iter()
            .enumerate()
            .map(|(i, bid)| RankingRow {
                session_id,
                user_id: bid.user_id,
                ranking: i as i64 + 1,
                bid_price: bid.price,
                bid_score: bid.score,
                is_winner: (i as i64) < inventory,
            })
            .collect();

        // Price at rank K, or the lowest-ranked price with fewer bidders.
        let final_price = if bids.is_empty() {
            None
        } else {
            let idx = (inventory.max(1) as usize).min(bids.len()) - 1;
            Some(bids[idx].price)
        };

        let applied = self
            .sessions
            .finalize(&session_id, final_price, &rows, now_ms)
            .await?;

        if applied {
            self.cache.invalidate_active(&session_id).await;

            info!(
                bidders = rows.len(),
                winners = rows.iter().filter(|r| r.is_winner).count(),
                final_price = ?final_price,
                "session finalized"
            );
        }

        Ok(applied)
    }
}
