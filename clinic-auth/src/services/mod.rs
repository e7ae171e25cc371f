//! Services layer for clinic-auth.
//!
//! Identity and OTP storage, the notification gateway, and the clock sit
//! behind traits; the engine components on top of them are plain structs.

pub mod admin_requests;
mod clock;
pub mod error;
mod identity_store;
mod notification;
pub mod otp;
pub mod scheduler;
pub mod session;
pub mod tokens;

pub use admin_requests::{AdminRequestWorkflow, AdminSignup, ApprovedAdmin};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::AuthError;
pub use identity_store::{
    AdminRequestStore, IdentityStore, InMemoryAdminRequestStore, InMemoryIdentityStore,
};
pub use notification::{
    DeliveryReceipt, GatewayError, MockNotificationGateway, NotificationGateway,
    SentNotification, TelegramGateway,
};
pub use otp::{AcceptAnyCodeOtp, InMemoryOtpStore, IssuedOtp, OtpAuthority, OtpEngine, OtpStore};
pub use scheduler::{DrainReport, InMemoryScheduleStore, ScheduleStore, Scheduler};
pub use session::{
    login_token_kind, Authenticated, PhoneAttempts, PhoneChallenge, SessionResolver,
};
pub use tokens::TokenIssuer;

use chrono::Duration;
use std::sync::Arc;

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub identities: Arc<dyn IdentityStore>,
    pub admin_requests: Arc<dyn AdminRequestStore>,
    pub otp: Arc<dyn OtpAuthority>,
    pub schedule: Arc<dyn ScheduleStore>,
    pub gateway: Arc<dyn NotificationGateway>,
    pub clock: Arc<dyn Clock>,
    pub resend_cooldown: Duration,
}

#[derive(Clone)]
pub struct AuthEngine {
    pub identities: Arc<dyn IdentityStore>,
    pub tokens: TokenIssuer,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionResolver>,
    pub admin_requests: Arc<AdminRequestWorkflow>,
}

impl AuthEngine {
    pub fn assemble(parts: EngineParts) -> Self {
        let tokens = TokenIssuer::new(parts.identities.clone(), parts.clock.clone());
        let attempts = Arc::new(PhoneAttempts::new());
        let scheduler = Arc::new(
            Scheduler::new(
                parts.schedule,
                parts.otp.clone(),
                parts.gateway.clone(),
                parts.clock.clone(),
            )
            .with_phone_attempts(attempts.clone()),
        );
        let sessions = Arc::new(
            SessionResolver::new(
                parts.identities.clone(),
                parts.otp,
                tokens.clone(),
                scheduler.clone(),
                parts.clock.clone(),
            )
            .with_resend_cooldown(parts.resend_cooldown)
            .with_phone_attempts(attempts),
        );
        let admin_requests = Arc::new(
            AdminRequestWorkflow::new(
                parts.admin_requests,
                parts.identities.clone(),
                tokens.clone(),
                parts.clock,
            )
            .with_notifier(parts.gateway),
        );

        Self {
            identities: parts.identities,
            tokens,
            scheduler,
            sessions,
            admin_requests,
        }
    }
}
