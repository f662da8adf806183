use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::warn;
use uuid::Uuid;

use crate::api::bearer_token;
use crate::api::state::AppState;
use crate::api::types::{AuthResponse, LoginRequest, RegisterRequest};
use crate::error::BidError;
use crate::time::now_ms;
use crate::user::model::User;

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, BidError> {
    if body.username.trim().is_empty() || body.email.trim().is_empty() {
        return Err(BidError::Validation(
            "username and email are required".into(),
        ));
    }
    if body.password.len() < 6 {
        return Err(BidError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }

    if state
        .users
        .fetch_by_username(&body.username)
        .await
        .map_err(BidError::unavailable)?
        .is_some()
    {
        return Err(BidError::Validation("username already exists".into()));
    }
    if state
        .users
        .fetch_by_email(&body.email)
        .await
        .map_err(BidError::unavailable)?
        .is_some()
    {
        return Err(BidError::Validation("email already exists".into()));
    }

    let password_hash =
        bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(BidError::internal)?;

    let now = now_ms();
    let user = User {
        user_id: Uuid::new_v4(),
        username: body.username.clone(),
        email: body.email.clone(),
        password_hash,
        is_admin: body.is_admin,
        weight: registration_weight(&body.username),
        created_ms: now,
        updated_ms: now,
    };

    state
        .users
        .insert(&user)
        .await
        .map_err(BidError::unavailable)?;

    let token = state.auth.codec().issue(&user.user_id, &user.username, now)?;

    Ok(Json(auth_response(&user, token)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, BidError> {
    let user = state
        .users
        .fetch_by_username(&body.username)
        .await
        .map_err(BidError::unavailable)?
        .ok_or(BidError::Unauthenticated)?;

    let valid =
        bcrypt::verify(&body.password, &user.password_hash).map_err(BidError::internal)?;
    if !valid {
        return Err(BidError::Unauthenticated);
    }

    let token = state
        .auth
        .codec()
        .issue(&user.user_id, &user.username, now_ms())?;

    // Publish the identity hash so later requests never touch the
    // durable store. Failure only slows authentication down.
    if let Err(e) = state.auth.cache_user(&user).await {
        warn!(error = %e, user_id = %user.user_id, "failed to cache user identity");
    }

    Ok(Json(auth_response(&user, token)))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BidError> {
    let caller = state.auth.identify(bearer_token(&headers)?).await?;

    Ok(Json(serde_json::json!({
        "user_id": caller.user_id.to_string(),
        "username": caller.username,
        "is_admin": caller.is_admin,
        "weight": caller.weight,
    })))
}

fn auth_response(user: &User, token: String) -> AuthResponse {
    AuthResponse {
        user_id: user.user_id.to_string(),
        username: user.username.clone(),
        email: user.email.clone(),
        token,
        weight: user.weight,
        is_admin: user.is_admin,
    }
}

/// Deterministic weight in [1.0, 2.0) derived from the username.
fn registration_weight(username: &str) -> f64 {
    let hash = username
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    1.0 + (hash % 100) as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_weight_is_deterministic_and_bounded() {
        for name in ["alice", "bob", "小明", ""] {
            let w = registration_weight(name);
            assert!((1.0..2.0).contains(&w), "weight {w} out of range");
            assert_eq!(w, registration_weight(name));
        }
    }
}
