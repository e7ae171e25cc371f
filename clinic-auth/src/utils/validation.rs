use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::{Validate, ValidateEmail};

use crate::services::AuthError;

/// JSON body extractor that runs `validator` rules before the handler sees it.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e)))?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

/// `+` followed by 9 to 15 digits.
pub fn is_valid_phone(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (9..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_phone(phone: &str) -> Result<(), AuthError> {
    if is_valid_phone(phone) {
        Ok(())
    } else {
        Err(AuthError::Validation(
            "Invalid phone format. Use international format (+998901234567)".to_string(),
        ))
    }
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.validate_email() {
        Ok(())
    } else {
        Err(AuthError::Validation("Invalid email format".to_string()))
    }
}

/// Phone-shape check usable from `#[validate(custom(function = ...))]`.
pub fn phone_rule(phone: &str) -> Result<(), validator::ValidationError> {
    if is_valid_phone(phone) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("phone"))
    }
}
