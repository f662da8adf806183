use uuid::Uuid;

/// One bounded-time auction for a product with `inventory` units.
///
/// Parameters are immutable once the session is activated; `is_active`
/// flips true -> false exactly once, and `final_price` is written at that
/// transition.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub admin_id: Uuid,
    pub product_id: Uuid,

    /// Minimum acceptable bid.
    pub upset_price: f64,
    /// Set once at finalization; the price at rank `min(K, N)`.
    pub final_price: Option<f64>,
    /// K: units for sale; winners are the top K by score.
    pub inventory: i64,

    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,

    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_secs: i64,

    pub is_active: bool,

    pub created_ms: i64,
    pub updated_ms: i64,
}

/// Scoring inputs resolved on the bid hot path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Why a session does or does not accept bids right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Active,
    NotStarted,
    Ended,
    Inactive,
}

impl Liveness {
    /// Stable reason string, used both in error payloads and as the cached
    /// liveness value.
    pub fn reason(&self) -> &'static str {
        match self {
            Liveness::Active => "active",
            Liveness::NotStarted => "not started",
            Liveness::Ended => "ended",
            Liveness::Inactive => "inactive",
        }
    }

    /// Cache TTL in seconds. Stable states cache aggressively; the active
    /// state stays short so deactivation is observed promptly.
    pub fn cache_ttl_secs(&self) -> i64 {
        match self {
            Liveness::Active => 10,
            Liveness::NotStarted => 30,
            Liveness::Ended => 300,
            Liveness::Inactive => 60,
        }
    }
}

impl Session {
    pub fn liveness(&self, now_ms: i64) -> Liveness {
        if !self.is_active {
            Liveness::Inactive
        } else if now_ms < self.start_ms {
            Liveness::NotStarted
        } else if now_ms > self.end_ms {
            Liveness::Ended
        } else {
            Liveness::Active
        }
    }

    pub fn params(&self) -> SessionParams {
        SessionParams {
            alpha: self.alpha,
            beta: self.beta,
            gamma: self.gamma,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }

    /// Listing status for the API: a session past its window reads as
    /// ended even before the monitor has deactivated it.
    pub fn status(&self, now_ms: i64) -> &'static str {
        match self.liveness(now_ms) {
            Liveness::Active | Liveness::NotStarted => "active",
            Liveness::Ended | Liveness::Inactive => "ended",
        }
    }
}

/// The item sold in a session.
#[derive(Clone, Debug)]
pub struct Product {
    pub product_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub admin_id: Uuid,
    pub created_ms: i64,
    pub updated_ms: i64,
}

/// One materialized row of a finalized leaderboard.
#[derive(Clone, Debug, PartialEq)]
pub struct RankingRow {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub ranking: i64,
    pub bid_price: f64,
    pub bid_score: f64,
    pub is_winner: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn liveness_inside_window() {
        let s = mk_session(1_000, 10_000, true);
        assert_eq!(s.liveness(5_000), Liveness::Active);
    }

    #[test]
    fn liveness_boundaries_are_inclusive() {
        let s = mk_session(1_000, 10_000, true);
        assert_eq!(s.liveness(1_000), Liveness::Active);
        assert_eq!(s.liveness(10_000), Liveness::Active);
        assert_eq!(s.liveness(999), Liveness::NotStarted);
        assert_eq!(s.liveness(10_001), Liveness::Ended);
    }

    #[test]
    fn inactive_wins_over_window() {
        let s = mk_session(1_000, 10_000, false);
        assert_eq!(s.liveness(5_000), Liveness::Inactive);
    }

    #[test]
    fn ttl_is_shortest_for_active() {
        let stable_states = [Liveness::NotStarted, Liveness::Ended, Liveness::Inactive];
        for state in stable_states {
            assert!(Liveness::Active.cache_ttl_secs() < state.cache_ttl_secs());
        }
    }
}
