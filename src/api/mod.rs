pub mod admin;
pub mod auth;
pub mod bid;
pub mod state;
pub mod types;

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::BidError;
use self::state::AppState;
use self::types::ErrorBody;

impl IntoResponse for BidError {
    fn into_response(self) -> Response {
        let status = match &self {
            BidError::InvalidPrice
            | BidError::BelowMinimum(_)
            | BidError::SessionNotActive(_)
            | BidError::Validation(_) => StatusCode::BAD_REQUEST,
            BidError::SessionNotFound | BidError::UserNotFound => StatusCode::NOT_FOUND,
            BidError::Unauthenticated => StatusCode::UNAUTHORIZED,
            BidError::Forbidden => StatusCode::FORBIDDEN,
            BidError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BidError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Extracts the bearer token from the Authorization header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, BidError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(BidError::Unauthenticated)
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bid", post(bid::submit_bid))
        .route("/api/leaderboard/{session_id}", get(bid::get_leaderboard))
        .route("/api/sessions", get(bid::list_sessions))
        .route("/api/sessions/active", get(bid::active_sessions))
        .route("/api/results/{session_id}", get(bid::get_results))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/admin/products", post(admin::create_product))
        .route("/api/admin/sessions", post(admin::create_session))
        .route("/api/admin/sessions/combined", post(admin::create_combined))
        .route(
            "/api/admin/sessions/{session_id}/activate",
            put(admin::activate_session),
        )
        .route(
            "/api/admin/sessions/{session_id}/deactivate",
            put(admin::deactivate_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_the_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer token123".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "token123");
    }
}
