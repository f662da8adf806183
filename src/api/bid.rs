use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::bearer_token;
use crate::api::state::AppState;
use crate::api::types::{
    BidRequest, BidResponse, LeaderboardResponse, PageQuery, ResultsResponse, SessionInfo, round2,
};
use crate::bid::leaderboard::DEFAULT_PAGE_SIZE;
use crate::error::BidError;
use crate::time::now_ms;

/// POST /api/bid — submit or raise a bid.
pub async fn submit_bid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BidRequest>,
) -> Result<Json<BidResponse>, BidError> {
    let caller = state.auth.identify(bearer_token(&headers)?).await?;

    let accepted = state
        .pipeline
        .submit(&caller.user_id, &body.session_id, body.price)
        .await?;

    Ok(Json(BidResponse {
        status: "accepted".into(),
        score: round2(accepted.score),
        rank: accepted.rank,
        current_price: accepted.price,
        message: "Bid submitted successfully".into(),
    }))
}

/// GET /api/leaderboard/{session_id}?page=&page_size=
pub async fn get_leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> Result<Json<LeaderboardResponse>, BidError> {
    state.auth.identify(bearer_token(&headers)?).await?;

    let page = state
        .leaderboard
        .page(
            &session_id,
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    Ok(Json(page.into()))
}

/// GET /api/sessions — every session with its product and status.
pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionInfo>>, BidError> {
    state.auth.identify(bearer_token(&headers)?).await?;
    sessions_with_status(&state, false).await
}

/// GET /api/sessions/active
pub async fn active_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionInfo>>, BidError> {
    state.auth.identify(bearer_token(&headers)?).await?;
    sessions_with_status(&state, true).await
}

/// GET /api/results/{session_id} — final rankings and winners.
pub async fn get_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ResultsResponse>, BidError> {
    state.auth.identify(bearer_token(&headers)?).await?;

    let results = state.leaderboard.results(&session_id).await?;
    Ok(Json(results.into()))
}

async fn sessions_with_status(
    state: &AppState,
    active_only: bool,
) -> Result<Json<Vec<SessionInfo>>, BidError> {
    let now = now_ms();
    let pairs = state
        .sessions
        .list(active_only)
        .await
        .map_err(BidError::unavailable)?;

    Ok(Json(
        pairs
            .iter()
            .map(|(session, product)| SessionInfo::from_pair(session, product, now))
            .collect(),
    ))
}
