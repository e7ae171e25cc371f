use service_core::error::AppError;
use thiserror::Error;

use crate::models::AdminRequestStatus;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The single rejection for bad identifiers, secrets, roles, and tokens.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} has expired")]
    Expired(String),

    #[error("Request has already been {0}")]
    AlreadyProcessed(AdminRequestStatus),

    #[error("Could not deliver the verification code: {reason}")]
    DeliveryFailure { reason: String },

    #[error("No Telegram channel is linked to this account. Link one in the clinic bot, then retry.")]
    ChannelNotRegistered,

    #[error("A code was sent recently. Retry in {retry_after_secs} seconds.")]
    ResendCooldown { retry_after_secs: u64 },

    #[error("Administrators cannot perform this action on their own account")]
    SelfActionForbidden,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::InvalidCredentials => AppError::AuthError(anyhow::anyhow!(message)),
            AuthError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            AuthError::Expired(_) => AppError::Gone(anyhow::anyhow!(message)),
            AuthError::AlreadyProcessed(_) => AppError::Conflict(anyhow::anyhow!(message)),
            // Retry-After: 0 tells the client a resend is allowed right away.
            AuthError::DeliveryFailure { .. } => {
                AppError::BadGateway(format!("{}. Request a new code.", message), Some(0))
            }
            AuthError::ChannelNotRegistered => {
                AppError::PreconditionFailed(anyhow::anyhow!(message))
            }
            AuthError::ResendCooldown { retry_after_secs } => {
                AppError::TooManyRequests(message, Some(retry_after_secs))
            }
            AuthError::SelfActionForbidden => AppError::Forbidden(anyhow::anyhow!(message)),
            AuthError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            AuthError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
