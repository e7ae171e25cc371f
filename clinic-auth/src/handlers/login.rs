use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::{
        PasswordLoginRequest, PhoneLoginStartRequest, PhoneLoginStartResponse,
        PhoneLoginVerifyRequest, SessionResponse, TokenLoginRequest,
    },
    utils::{PlainSecret, ValidatedJson},
    AppState,
};

/// Login with email or phone plus password
pub async fn password_login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .engine
        .sessions
        .login_with_password(&req.identifier, &PlainSecret::new(req.password), req.role)
        .await?;
    Ok((StatusCode::OK, Json(SessionResponse::from(session))))
}

/// Send a one-time code to the phone's registered Telegram channel
pub async fn start_phone_login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PhoneLoginStartRequest>,
) -> Result<impl IntoResponse, AppError> {
    let challenge = state
        .engine
        .sessions
        .start_phone_login(&req.phone, req.channel_id.as_deref(), req.role)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PhoneLoginStartResponse::from(challenge)),
    ))
}

pub async fn verify_phone_login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PhoneLoginVerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .engine
        .sessions
        .verify_phone_login(&req.phone, &req.code)
        .await?;
    Ok((StatusCode::OK, Json(SessionResponse::from(session))))
}

pub async fn token_login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TokenLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.engine.sessions.login_with_token(&req.token).await?;
    Ok((StatusCode::OK, Json(SessionResponse::from(session))))
}
