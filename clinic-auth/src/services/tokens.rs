//! Token issuer - opaque bearer tokens with role-specific TTL classes.

use rand::Rng;
use std::sync::Arc;

use super::{AuthError, Clock, IdentityStore};
use crate::models::{IdentityId, IdentityRecord, IssuedToken, TokenKind};

pub const TOKEN_LENGTH: usize = 12;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_MINT_ATTEMPTS: usize = 8;

type TokenGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// 12 characters, each uniform over `[A-Z0-9]`.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

#[derive(Clone)]
pub struct TokenIssuer {
    identities: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    generate: TokenGenerator,
}

impl TokenIssuer {
    pub fn new(identities: Arc<dyn IdentityStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            identities,
            clock,
            generate: Arc::new(generate_token),
        }
    }

    /// Replace the random source, e.g. to force collisions in tests.
    pub fn with_generator(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generate = Arc::new(generate);
        self
    }

    /// Mint and store a token, overwriting (and so revoking) any prior one.
    #[tracing::instrument(skip(self), fields(identity_id = %identity_id, kind = kind.as_str()))]
    pub async fn mint(
        &self,
        identity_id: IdentityId,
        kind: TokenKind,
    ) -> Result<IssuedToken, AuthError> {
        let mut record = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))?;

        let token = self.stamp(&mut record, kind).await?;
        self.identities.save(record).await?;

        tracing::info!(expires_at = %token.expires_at, "Token minted");
        Ok(token)
    }

    /// Put a fresh token on `record` without saving it, so callers can
    /// persist the record together with other changes.
    pub async fn stamp(
        &self,
        record: &mut IdentityRecord,
        kind: TokenKind,
    ) -> Result<IssuedToken, AuthError> {
        let scope = match kind {
            TokenKind::BranchHead => Some(record.branch_scope().ok_or_else(|| {
                AuthError::Validation(
                    "Branch-head tokens require an identity bound to a branch".to_string(),
                )
            })?),
            TokenKind::Standard | TokenKind::Admin => None,
        };

        let value = self.unique_value().await?;
        let token = IssuedToken::new(value, kind, self.clock.now(), scope);
        record.token = Some(token.clone());
        Ok(token)
    }

    /// Token values share one alphabet across every role partition, so a
    /// candidate is only accepted once no identity holds it.
    async fn unique_value(&self) -> Result<String, AuthError> {
        for attempt in 1..=MAX_MINT_ATTEMPTS {
            let candidate = (self.generate)();
            if self.identities.find_by_token(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            tracing::warn!(attempt, "Token collision, drawing again");
        }
        Err(AuthError::Internal(anyhow::anyhow!(
            "Could not mint a unique token after {} attempts",
            MAX_MINT_ATTEMPTS
        )))
    }

    /// The identity holding `token`, if the token is still inside its TTL.
    pub async fn resolve(&self, token: &str) -> Result<Option<IdentityRecord>, AuthError> {
        if !is_well_formed(token) {
            return Ok(None);
        }

        let now = self.clock.now();
        let record = self.identities.find_by_token(token).await?;
        Ok(record.filter(|r| {
            let active = r.active_token(now).is_some();
            if !active {
                tracing::debug!(identity_id = %r.id, "Token presented after expiry");
            }
            active
        }))
    }

    /// Clear the identity's token slot.
    pub async fn revoke(&self, identity_id: IdentityId) -> Result<(), AuthError> {
        let mut record = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))?;

        if record.token.take().is_some() {
            self.identities.save(record).await?;
            tracing::info!(identity_id = %identity_id, "Token revoked");
        }
        Ok(())
    }
}
