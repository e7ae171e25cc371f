use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use service_core::error::AppError;

use crate::models::{Permission, Session};
use crate::AppState;

/// Session resolved from an `Authorization: Bearer <token>` header via the
/// token login channel.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

impl AuthSession {
    /// Admin permission and no branch restriction.
    pub fn require_global_admin(&self) -> Result<&Session, AppError> {
        if !self.0.can(Permission::Admin) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator access required"
            )));
        }
        if !self.0.is_global() {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This action requires global scope"
            )));
        }
        Ok(&self.0)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>() {
            return Ok(AuthSession(session.clone()));
        }

        let token = bearer_token(parts).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

        let session = state.engine.sessions.login_with_token(token).await?;
        parts.extensions.insert(session.clone());
        Ok(AuthSession(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header_value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/auth/tokens/refresh");
        if let Some(value) = header_value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token(&parts(Some("Bearer ABCDEF123456"))), Some("ABCDEF123456"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer   "))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
