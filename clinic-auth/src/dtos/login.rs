use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    AttemptState, IdentityId, IssuedToken, LoginMethod, Permission, Role, Session, TokenKind,
};
use crate::services::{Authenticated, PhoneChallenge};

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordLoginRequest {
    /// Email or phone in international format.
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PhoneLoginStartRequest {
    #[validate(custom(function = "crate::utils::phone_rule", message = "Invalid phone format"))]
    pub phone: String,

    /// Telegram chat the caller expects the code on; must match the registered one.
    pub channel_id: Option<String>,

    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct PhoneLoginStartResponse {
    pub state: AttemptState,
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
    pub message: String,
}

impl From<PhoneChallenge> for PhoneLoginStartResponse {
    fn from(challenge: PhoneChallenge) -> Self {
        Self {
            state: AttemptState::OtpPending,
            expires_at: challenge.expires_at,
            resend_available_at: challenge.resend_available_at,
            message: "Verification code sent to your Telegram".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PhoneLoginVerifyRequest {
    #[validate(custom(function = "crate::utils::phone_rule", message = "Invalid phone format"))]
    pub phone: String,

    #[validate(length(equal = 4, message = "Code must be 4 digits"))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TokenLoginRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub state: AttemptState,
    pub identity_id: IdentityId,
    pub role: Role,
    pub permissions: Vec<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub login_method: LoginMethod,
    pub issued_at: DateTime<Utc>,
    /// Present only when the login minted a fresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenResponse>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            state: AttemptState::Authenticated,
            identity_id: session.identity_id,
            role: session.role,
            permissions: session.permissions.iter().collect(),
            branch_id: session.branch_scope.map(|s| s.branch_id.0),
            login_method: session.login_method,
            issued_at: session.issued_at,
            token: None,
        }
    }
}

impl From<Authenticated> for SessionResponse {
    fn from(outcome: Authenticated) -> Self {
        Self {
            token: Some(outcome.token.into()),
            ..outcome.session.into()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    /// Defaults to the caller's own identity.
    pub identity_id: Option<IdentityId>,
    #[serde(default = "default_kind")]
    pub kind: TokenKind,
}

fn default_kind() -> TokenKind {
    TokenKind::Standard
}

/// The only place a token value leaves the service.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
}

impl From<IssuedToken> for TokenResponse {
    fn from(token: IssuedToken) -> Self {
        Self {
            token: token.value,
            kind: token.kind,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            branch_id: token.scope.map(|s| s.branch_id.0),
        }
    }
}
