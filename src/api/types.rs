use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bid::leaderboard::{LeaderboardPage, SessionResults};
use crate::session::model::{Product, Session};
use crate::time::rfc3339;

/// Scores travel rounded to two decimals; the exact value lives in the
/// ranking sorted set and the durable store.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub session_id: Uuid,
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct BidResponse {
    pub status: String,
    pub score: f64,
    pub rank: Option<u64>,
    pub current_price: f64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardEntryBody {
    pub user_id: String,
    pub username: String,
    pub price: f64,
    pub score: f64,
    pub rank: u64,
    pub is_winner: bool,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub session_id: String,
    pub leaderboard: Vec<LeaderboardEntryBody>,
    pub highest_bid: Option<f64>,
    pub threshold_score: Option<f64>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

impl From<LeaderboardPage> for LeaderboardResponse {
    fn from(page: LeaderboardPage) -> Self {
        Self {
            session_id: page.session_id.to_string(),
            leaderboard: page
                .entries
                .into_iter()
                .map(|e| LeaderboardEntryBody {
                    user_id: e.user_id.to_string(),
                    username: e.username,
                    price: e.price,
                    score: round2(e.score),
                    rank: e.rank,
                    is_winner: e.is_winner,
                })
                .collect(),
            highest_bid: page.highest_bid,
            threshold_score: page.threshold_score.map(round2),
            page: page.page,
            page_size: page.page_size,
            total_count: page.total_count,
            total_pages: page.total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub base_price: f64,
    pub final_price: Option<f64>,
    pub inventory: i64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
}

impl SessionInfo {
    pub fn from_pair(session: &Session, product: &Product, now_ms: i64) -> Self {
        Self {
            session_id: session.session_id.to_string(),
            product_id: product.product_id.to_string(),
            name: product.name.clone(),
            description: product.description.clone(),
            base_price: session.upset_price,
            final_price: session.final_price,
            inventory: session.inventory,
            alpha: session.alpha,
            beta: session.beta,
            gamma: session.gamma,
            start_time: rfc3339(session.start_ms),
            end_time: rfc3339(session.end_ms),
            status: session.status(now_ms).to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultEntryBody {
    pub user_id: String,
    pub username: String,
    pub ranking: i64,
    pub price: f64,
    pub score: f64,
    pub is_winner: bool,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub session_id: String,
    pub final_price: Option<f64>,
    pub status: String,
    pub rankings: Vec<ResultEntryBody>,
}

impl From<SessionResults> for ResultsResponse {
    fn from(results: SessionResults) -> Self {
        Self {
            session_id: results.session_id.to_string(),
            final_price: results.final_price,
            status: if results.is_active { "active" } else { "ended" }.to_string(),
            rankings: results
                .rankings
                .into_iter()
                .map(|r| ResultEntryBody {
                    user_id: r.user_id.to_string(),
                    username: r.username,
                    ranking: r.ranking,
                    price: r.bid_price,
                    score: round2(r.bid_score),
                    is_winner: r.is_winner,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub token: String,
    pub weight: f64,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProductCreateRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductCreateResponse {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionCreateRequest {
    pub product_id: Uuid,
    pub upset_price: f64,
    pub inventory: i64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub duration_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct CombinedCreateRequest {
    pub name: String,
    pub description: Option<String>,
    pub upset_price: f64,
    pub inventory: i64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub duration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionCreateResponse {
    pub session_id: String,
    pub product_id: String,
    pub upset_price: f64,
    pub inventory: i64,
    pub start_time: String,
    pub end_time: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub session_id: String,
    pub finalized: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_truncates_long_fractions() {
        assert_eq!(round2(434.33333333), 434.33);
        assert_eq!(round2(351.0), 351.0);
    }
}
