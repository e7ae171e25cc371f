//! Session resolver - runs one login attempt per call across the password,
//! phone + OTP, and bearer-token channels and assembles the resulting Session.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::scheduler::RESEND_COOLDOWN_SECS;
use super::{AuthError, Clock, IdentityStore, OtpAuthority, Scheduler, TokenIssuer};
use crate::models::{
    AttemptState, IdentityId, IdentityProfile, IdentityRecord, IssuedToken, LoginAttempt,
    LoginMethod, OtpVerification, Permission, Role, Session, TokenKind,
};
use crate::utils::{
    validate_email, validate_phone, verify_secret, verify_secret_decoy, PlainSecret,
};

/// Returned by `start_phone_login`; the code itself only travels out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneChallenge {
    pub expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

/// A completed password or phone login: the session plus the token minted for it.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    pub token: IssuedToken,
}

#[derive(Debug, Clone)]
struct PendingPhoneLogin {
    identity_id: IdentityId,
    attempt: LoginAttempt,
    code_expires_at: DateTime<Utc>,
}

/// Phone logins parked in `OTP_PENDING`, keyed by phone. Shared with the
/// scheduler so an OTP expiry timer also ends the attempt it belongs to.
#[derive(Debug, Default)]
pub struct PhoneAttempts {
    pending: DashMap<String, PendingPhoneLogin>,
}

impl PhoneAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn park(&self, phone: &str, login: PendingPhoneLogin) {
        self.pending.insert(phone.to_string(), login);
    }

    fn take(&self, phone: &str) -> Option<PendingPhoneLogin> {
        self.pending.remove(phone).map(|(_, login)| login)
    }

    /// Move the phone's attempt to `REJECTED` and drop it.
    pub fn reject(&self, phone: &str) -> bool {
        match self.take(phone) {
            Some(mut login) => {
                mark_rejected(&mut login.attempt);
                true
            }
            None => false,
        }
    }

    /// Reject the phone's attempt if its code expired before `now`. An
    /// attempt re-parked by a later resend carries the newer expiry and stays.
    pub fn expire(&self, phone: &str, now: DateTime<Utc>) -> bool {
        match self.pending.remove_if(phone, |_, login| login.code_expires_at < now) {
            Some((_, mut login)) => {
                mark_rejected(&mut login.attempt);
                tracing::info!(identity_id = %login.identity_id, "Phone login attempt expired");
                true
            }
            None => false,
        }
    }

    fn state(&self, phone: &str) -> Option<AttemptState> {
        self.pending.get(phone).map(|p| p.attempt.state())
    }
}

pub struct SessionResolver {
    identities: Arc<dyn IdentityStore>,
    otp: Arc<dyn OtpAuthority>,
    tokens: TokenIssuer,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    resend_cooldown: Duration,
    attempts: Arc<PhoneAttempts>,
}

fn step(attempt: &mut LoginAttempt, next: AttemptState) -> Result<(), AuthError> {
    attempt
        .advance(next)
        .map_err(|e| AuthError::Internal(anyhow::Error::new(e)))
}

fn mark_rejected(attempt: &mut LoginAttempt) {
    if let Err(e) = attempt.advance(AttemptState::Rejected) {
        tracing::error!(error = %e, "Could not mark attempt rejected");
    }
}

fn reject(attempt: &mut LoginAttempt) -> AuthError {
    mark_rejected(attempt);
    AuthError::InvalidCredentials
}

/// TTL class a fresh login is issued, by role.
pub fn login_token_kind(record: &IdentityRecord) -> TokenKind {
    match &record.profile {
        IdentityProfile::Admin { .. } => TokenKind::Admin,
        IdentityProfile::Staff {
            branch_head_access: Some(_),
            ..
        } => TokenKind::BranchHead,
        IdentityProfile::Staff { .. } | IdentityProfile::Patient => TokenKind::Standard,
    }
}

/// Whole seconds, rounded up so a client never retries early.
fn retry_after_secs(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

impl SessionResolver {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        otp: Arc<dyn OtpAuthority>,
        tokens: TokenIssuer,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identities,
            otp,
            tokens,
            scheduler,
            clock,
            resend_cooldown: Duration::seconds(RESEND_COOLDOWN_SECS),
            attempts: Arc::new(PhoneAttempts::new()),
        }
    }

    pub fn with_resend_cooldown(mut self, cooldown: Duration) -> Self {
        self.resend_cooldown = cooldown;
        self
    }

    /// Park attempts in `attempts`, typically the set the scheduler expires.
    pub fn with_phone_attempts(mut self, attempts: Arc<PhoneAttempts>) -> Self {
        self.attempts = attempts;
        self
    }

    async fn authenticate(
        &self,
        attempt: &mut LoginAttempt,
        record: &IdentityRecord,
    ) -> Result<Authenticated, AuthError> {
        step(attempt, AttemptState::Authenticated)?;
        let token = self.tokens.mint(record.id, login_token_kind(record)).await?;
        let session = Session::for_identity(
            record,
            attempt.method,
            token.scope.clone(),
            self.clock.now(),
        );
        Ok(Authenticated { session, token })
    }

    /// Single-factor by policy: a matching secret authenticates directly.
    #[tracing::instrument(skip(self, secret), fields(role = %role))]
    pub async fn login_with_password(
        &self,
        identifier: &str,
        secret: &PlainSecret,
        role: Role,
    ) -> Result<Authenticated, AuthError> {
        let is_email = identifier.contains('@');
        if is_email {
            validate_email(identifier)?;
        } else {
            validate_phone(identifier)?;
        }

        let mut attempt = LoginAttempt::start(LoginMethod::Password, self.clock.now());
        step(&mut attempt, AttemptState::CredentialCheck)?;

        let record = if is_email {
            self.identities.find_by_email(identifier, role).await?
        } else {
            self.identities.find_by_phone(identifier, role).await?
        };

        // Exactly one Argon2 verify runs whether or not the identifier matched.
        let verified = match record.as_ref().and_then(|r| r.credentials.secret_hash.as_ref()) {
            Some(hash) => verify_secret(secret, hash),
            None => verify_secret_decoy(secret),
        };
        let matched = record.filter(|_| verified);

        let Some(record) = matched else {
            tracing::info!("Password login rejected");
            return Err(reject(&mut attempt));
        };

        let authenticated = self.authenticate(&mut attempt, &record).await?;
        tracing::info!(identity_id = %record.id, "Password login succeeded");
        Ok(authenticated)
    }

    /// Look up the phone, issue an OTP to the identity's registered channel,
    /// and park the attempt in `OTP_PENDING`.
    #[tracing::instrument(skip(self, channel_id), fields(phone = %phone, role = %role))]
    pub async fn start_phone_login(
        &self,
        phone: &str,
        channel_id: Option<&str>,
        role: Role,
    ) -> Result<PhoneChallenge, AuthError> {
        validate_phone(phone)?;

        let mut attempt = LoginAttempt::start(LoginMethod::PhoneOtp, self.clock.now());
        step(&mut attempt, AttemptState::CredentialCheck)?;

        let Some(record) = self.identities.find_by_phone(phone, role).await? else {
            tracing::info!("Phone login rejected: no identity");
            return Err(reject(&mut attempt));
        };

        let Some(registered) = record.credentials.telegram_channel_id.clone() else {
            tracing::warn!(identity_id = %record.id, "Phone login without a notification channel");
            return Err(AuthError::ChannelNotRegistered);
        };

        if channel_id.is_some_and(|claimed| claimed != registered) {
            tracing::info!(identity_id = %record.id, "Phone login rejected: channel mismatch");
            return Err(reject(&mut attempt));
        }

        if let Some(remaining) = self.scheduler.cooldown_remaining(phone).await? {
            return Err(AuthError::ResendCooldown {
                retry_after_secs: retry_after_secs(remaining),
            });
        }

        // Delivery failures surface before any cooldown starts.
        let issued = self.otp.issue(phone, &registered).await?;
        self.scheduler
            .schedule_otp_timers(phone, issued.expires_at, self.resend_cooldown)
            .await?;

        step(&mut attempt, AttemptState::OtpPending)?;
        self.attempts.park(
            phone,
            PendingPhoneLogin {
                identity_id: record.id,
                attempt,
                code_expires_at: issued.expires_at,
            },
        );

        tracing::info!(identity_id = %record.id, "OTP challenge issued");
        Ok(PhoneChallenge {
            expires_at: issued.expires_at,
            resend_available_at: self.clock.now() + self.resend_cooldown,
        })
    }

    /// Complete a phone login. A mismatch leaves the attempt in `OTP_PENDING`
    /// but still consumes the code, so the caller must request a new one.
    /// Verifying once no code is held rejects the attempt.
    #[tracing::instrument(skip(self, code), fields(phone = %phone))]
    pub async fn verify_phone_login(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<Authenticated, AuthError> {
        validate_phone(phone)?;

        match self.otp.verify(phone, code).await? {
            OtpVerification::Valid => {
                let Some(mut pending) = self.attempts.take(phone) else {
                    return Err(AuthError::NotFound("Login attempt".to_string()));
                };
                let record = self
                    .identities
                    .find_by_id(pending.identity_id)
                    .await?
                    .ok_or_else(|| AuthError::NotFound("Identity".to_string()))?;

                let authenticated = self.authenticate(&mut pending.attempt, &record).await?;
                tracing::info!(identity_id = %record.id, "Phone login succeeded");
                Ok(authenticated)
            }
            OtpVerification::Mismatch => {
                if let Some(mut pending) = self.attempts.pending.get_mut(phone) {
                    step(&mut pending.attempt, AttemptState::OtpPending)?;
                }
                Err(AuthError::InvalidCredentials)
            }
            OtpVerification::Expired => {
                self.attempts.reject(phone);
                Err(AuthError::Expired("Verification code".to_string()))
            }
            OtpVerification::NotFound => {
                if self.attempts.reject(phone) {
                    tracing::info!("Phone login rejected: no code held");
                }
                Err(AuthError::NotFound("Verification code".to_string()))
            }
        }
    }

    /// State of the phone's in-flight attempt, if one is parked. Attempts
    /// whose code has expired are rejected here even before the timer fires.
    pub fn phone_attempt_state(&self, phone: &str) -> Option<AttemptState> {
        self.attempts.expire(phone, self.clock.now());
        self.attempts.state(phone)
    }

    /// Resolves without re-minting; use never extends a token's TTL.
    #[tracing::instrument(skip_all)]
    pub async fn login_with_token(&self, token: &str) -> Result<Session, AuthError> {
        let mut attempt = LoginAttempt::start(LoginMethod::Token, self.clock.now());
        step(&mut attempt, AttemptState::CredentialCheck)?;

        let Some(record) = self.tokens.resolve(token).await? else {
            tracing::info!("Token login rejected");
            return Err(reject(&mut attempt));
        };

        step(&mut attempt, AttemptState::Authenticated)?;
        let scope = record.token.as_ref().and_then(|t| t.scope.clone());
        Ok(Session::for_identity(
            &record,
            LoginMethod::Token,
            scope,
            self.clock.now(),
        ))
    }

    /// Mint a fresh token of `kind`, revoking whatever the identity held.
    pub async fn refresh_token(
        &self,
        identity_id: IdentityId,
        kind: TokenKind,
    ) -> Result<IssuedToken, AuthError> {
        let target = self.load(identity_id).await?;
        if kind == TokenKind::Admin && !target.role().is_admin() {
            return Err(AuthError::Validation(
                "Admin tokens can only be issued to administrators".to_string(),
            ));
        }
        self.tokens.mint(identity_id, kind).await
    }

    /// `refresh_token` on behalf of an authenticated actor. Without the admin
    /// permission an actor may only renew its own standard token.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.identity_id, target_id = %identity_id))]
    pub async fn refresh_token_as(
        &self,
        actor: &Session,
        identity_id: IdentityId,
        kind: TokenKind,
    ) -> Result<IssuedToken, AuthError> {
        if !actor.can(Permission::Admin) {
            if actor.identity_id != identity_id || kind != TokenKind::Standard {
                return Err(AuthError::Forbidden(
                    "Only administrators can issue this token".to_string(),
                ));
            }
        } else {
            let target = self.load(identity_id).await?;
            ensure_in_scope(actor, &target)?;
        }
        self.refresh_token(identity_id, kind).await
    }

    /// Clear another identity's token. Admins cannot revoke their own.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.identity_id, target_id = %target_id))]
    pub async fn revoke_token(&self, actor: &Session, target_id: IdentityId) -> Result<(), AuthError> {
        if !actor.can(Permission::Admin) {
            return Err(AuthError::Forbidden(
                "Revoking tokens requires the admin permission".to_string(),
            ));
        }
        if actor.identity_id == target_id {
            return Err(AuthError::SelfActionForbidden);
        }

        let target = self.load(target_id).await?;
        ensure_in_scope(actor, &target)?;
        self.tokens.revoke(target_id).await
    }

    async fn load(&self, identity_id: IdentityId) -> Result<IdentityRecord, AuthError> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Identity".to_string()))
    }
}

/// Branch-scoped actors only act on identities bound to the same branch.
fn ensure_in_scope(actor: &Session, target: &IdentityRecord) -> Result<(), AuthError> {
    match &actor.branch_scope {
        None => Ok(()),
        Some(scope) if target.branch_scope().as_ref() == Some(scope) => Ok(()),
        Some(_) => Err(AuthError::Forbidden(
            "Target identity is outside your branch".to_string(),
        )),
    }
}
