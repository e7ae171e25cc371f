use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::{RefreshTokenRequest, TokenResponse},
    middleware::AuthSession,
    models::IdentityId,
    AppState,
};

/// Mint a fresh token, revoking the target's previous one
pub async fn refresh(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let target = req.identity_id.unwrap_or(session.identity_id);
    let token = state
        .engine
        .sessions
        .refresh_token_as(&session, target, req.kind)
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(token))))
}

pub async fn revoke(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(identity_id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine
        .sessions
        .revoke_token(&session, IdentityId(identity_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
