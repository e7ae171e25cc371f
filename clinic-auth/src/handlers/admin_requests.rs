use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::{AdminRequestResponse, AdminSignupRequest, ApprovedAdminResponse},
    middleware::AuthSession,
    models::AdminRequestId,
    utils::ValidatedJson,
    AppState,
};

/// Public self-service signup; lands in the pending queue
pub async fn submit(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AdminSignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.engine.admin_requests.request_signup(req.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(AdminRequestResponse::from(request)),
    ))
}

pub async fn list_pending(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<impl IntoResponse, AppError> {
    session.require_global_admin()?;
    let pending: Vec<AdminRequestResponse> = state
        .engine
        .admin_requests
        .list_pending()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(pending))
}

pub async fn approve(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor = session.require_global_admin()?;
    tracing::info!(actor_id = %actor.identity_id, request_id = %id, "Approving admin request");

    let approved = state
        .engine
        .admin_requests
        .approve(AdminRequestId(id))
        .await?;
    Ok((StatusCode::OK, Json(ApprovedAdminResponse::from(approved))))
}

pub async fn reject(
    State(state): State<AppState>,
    session: AuthSession,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let actor = session.require_global_admin()?;
    tracing::info!(actor_id = %actor.identity_id, request_id = %id, "Rejecting admin request");

    let rejected = state
        .engine
        .admin_requests
        .reject(AdminRequestId(id))
        .await?;
    Ok((StatusCode::OK, Json(AdminRequestResponse::from(rejected))))
}
