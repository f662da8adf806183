use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::bearer_token;
use crate::api::state::AppState;
use crate::api::types::{
    CombinedCreateRequest, DeactivateResponse, ProductCreateRequest, ProductCreateResponse,
    SessionCreateRequest, SessionCreateResponse,
};
use crate::auth::context::AuthedUser;
use crate::error::BidError;
use crate::session::model::{Product, Session};
use crate::time::{now_ms, rfc3339};

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser, BidError> {
    let caller = state.auth.identify(bearer_token(headers)?).await?;
    if !caller.is_admin {
        return Err(BidError::Forbidden);
    }
    Ok(caller)
}

/// POST /api/admin/products
pub async fn create_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProductCreateRequest>,
) -> Result<Json<ProductCreateResponse>, BidError> {
    let caller = require_admin(&state, &headers).await?;

    if body.name.trim().is_empty() {
        return Err(BidError::Validation("product name is required".into()));
    }

    let now = now_ms();
    let product = Product {
        product_id: Uuid::new_v4(),
        name: body.name,
        description: body.description,
        admin_id: caller.user_id,
        created_ms: now,
        updated_ms: now,
    };

    state
        .sessions
        .insert_product(&product)
        .await
        .map_err(BidError::unavailable)?;

    Ok(Json(ProductCreateResponse {
        product_id: product.product_id.to_string(),
        name: product.name,
        description: product.description,
        message: "Product created successfully".into(),
    }))
}

/// POST /api/admin/sessions
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SessionCreateRequest>,
) -> Result<Json<SessionCreateResponse>, BidError> {
    let caller = require_admin(&state, &headers).await?;

    if state
        .sessions
        .fetch_product(&body.product_id)
        .await
        .map_err(BidError::unavailable)?
        .is_none()
    {
        return Err(BidError::Validation("product not found".into()));
    }

    let session = build_session(
        caller.user_id,
        body.product_id,
        body.upset_price,
        body.inventory,
        body.alpha,
        body.beta,
        body.gamma,
        body.duration_minutes,
    )?;

    state
        .sessions
        .insert_session(&session)
        .await
        .map_err(BidError::unavailable)?;

    Ok(Json(session_response(&session)))
}

/// POST /api/admin/sessions/combined — product and session in one call.
pub async fn create_combined(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CombinedCreateRequest>,
) -> Result<Json<SessionCreateResponse>, BidError> {
    let caller = require_admin(&state, &headers).await?;

    if body.name.trim().is_empty() {
        return Err(BidError::Validation("product name is required".into()));
    }

    let now = now_ms();
    let product = Product {
        product_id: Uuid::new_v4(),
        name: body.name,
        description: body.description,
        admin_id: caller.user_id,
        created_ms: now,
        updated_ms: now,
    };

    let session = build_session(
        caller.user_id,
        product.product_id,
        body.upset_price,
        body.inventory,
        body.alpha,
        body.beta,
        body.gamma,
        body.duration_minutes,
    )?;

    state
        .sessions
        .insert_product(&product)
        .await
        .map_err(BidError::unavailable)?;
    state
        .sessions
        .insert_session(&session)
        .await
        .map_err(BidError::unavailable)?;

    Ok(Json(session_response(&session)))
}

/// PUT /api/admin/sessions/{session_id}/activate
pub async fn activate_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, BidError> {
    require_admin(&state, &headers).await?;

    let updated = state
        .sessions
        .set_active(&session_id, true, now_ms())
        .await
        .map_err(BidError::unavailable)?;
    if !updated {
        return Err(BidError::SessionNotFound);
    }

    state.session_cache.invalidate_active(&session_id).await;

    Ok(Json(serde_json::json!({
        "session_id": session_id.to_string(),
        "message": "Session activated",
    })))
}

/// PUT /api/admin/sessions/{session_id}/deactivate
///
/// Runs the same finalization as the monitor; whichever gets there first
/// wins and the other is a no-op.
pub async fn deactivate_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<Json<DeactivateResponse>, BidError> {
    require_admin(&state, &headers).await?;

    let session = state
        .sessions
        .fetch_by_id(&session_id)
        .await
        .map_err(BidError::unavailable)?
        .ok_or(BidError::SessionNotFound)?;

    let finalized = state
        .monitor
        .finalize_session(&session, now_ms())
        .await
        .map_err(BidError::unavailable)?;

    Ok(Json(DeactivateResponse {
        session_id: session_id.to_string(),
        finalized,
        message: if finalized {
            "Session finalized".into()
        } else {
            "Session was already finalized".into()
        },
    }))
}

#[allow(clippy::too_many_arguments)]
fn build_session(
    admin_id: Uuid,
    product_id: Uuid,
    upset_price: f64,
    inventory: i64,
    alpha: f64,
    beta: f64,
    gamma: f64,
    duration_minutes: i64,
) -> Result<Session, BidError> {
    if !(upset_price > 0.0) {
        return Err(BidError::Validation("upset price must be positive".into()));
    }
    if inventory <= 0 {
        return Err(BidError::Validation("inventory must be positive".into()));
    }
    if duration_minutes <= 0 {
        return Err(BidError::Validation("duration must be positive".into()));
    }
    if alpha < 0.0 || beta < 0.0 || gamma < 0.0 {
        return Err(BidError::Validation(
            "score parameters must be non-negative".into(),
        ));
    }

    let now = now_ms();
    Ok(Session {
        session_id: Uuid::new_v4(),
        admin_id,
        product_id,
        upset_price,
        final_price: None,
        inventory,
        alpha,
        beta,
        gamma,
        start_ms: now,
        end_ms: now + duration_minutes * 60_000,
        duration_secs: duration_minutes * 60,
        is_active: true,
        created_ms: now,
        updated_ms: now,
    })
}

fn session_response(session: &Session) -> SessionCreateResponse {
    SessionCreateResponse {
        session_id: session.session_id.to_string(),
        product_id: session.product_id.to_string(),
        upset_price: session.upset_price,
        inventory: session.inventory,
        start_time: rfc3339(session.start_ms),
        end_time: rfc3339(session.end_ms),
        message: "Session created successfully".into(),
    }
}
