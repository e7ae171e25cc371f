//! OTP engine - issues and verifies phone-bound one-time codes.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

use super::{AuthError, Clock, NotificationGateway};
use crate::models::{OtpEntry, OtpVerification};
use crate::utils::validate_phone;

pub const OTP_TTL_MINUTES: i64 = 10;
const OTP_MIN: u16 = 1000;
const OTP_MAX: u16 = 9999;

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Insert, replacing and returning any entry already held for the phone.
    async fn put(&self, entry: OtpEntry) -> Result<Option<OtpEntry>, anyhow::Error>;
    async fn get(&self, phone: &str) -> Result<Option<OtpEntry>, anyhow::Error>;
    async fn take(&self, phone: &str) -> Result<Option<OtpEntry>, anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryOtpStore {
    entries: DashMap<String, OtpEntry>,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn put(&self, entry: OtpEntry) -> Result<Option<OtpEntry>, anyhow::Error> {
        Ok(self.entries.insert(entry.phone.clone(), entry))
    }

    async fn get(&self, phone: &str) -> Result<Option<OtpEntry>, anyhow::Error> {
        Ok(self.entries.get(phone).map(|e| e.value().clone()))
    }

    async fn take(&self, phone: &str) -> Result<Option<OtpEntry>, anyhow::Error> {
        Ok(self.entries.remove(phone).map(|(_, entry)| entry))
    }
}

/// A freshly issued code. The code itself never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedOtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedOtp")
            .field("code", &"****")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Issue/verify seam. `OtpEngine` is the production implementation;
/// `AcceptAnyCodeOtp` exists only for explicitly configured test setups.
#[async_trait]
pub trait OtpAuthority: Send + Sync {
    async fn issue(&self, phone: &str, channel_id: &str) -> Result<IssuedOtp, AuthError>;
    async fn verify(&self, phone: &str, code: &str) -> Result<OtpVerification, AuthError>;
    /// Remove the phone's entry if it is past its TTL. Returns whether one was removed.
    async fn purge_expired(&self, phone: &str) -> Result<bool, AuthError>;
}

pub struct OtpEngine {
    store: Arc<dyn OtpStore>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OtpEngine {
    pub fn new(
        store: Arc<dyn OtpStore>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            ttl: Duration::minutes(OTP_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn message_for(&self, code: &str) -> String {
        format!(
            "Your clinic verification code is {}. It expires in {} minutes.",
            code,
            self.ttl.num_minutes()
        )
    }

    /// Drop the entry only if it still holds `code`; a concurrent reissue wins.
    async fn discard_if_current(&self, phone: &str, code: &str) -> Result<(), AuthError> {
        if let Some(current) = self.store.take(phone).await? {
            if current.code != code {
                self.store.put(current).await?;
            }
        }
        Ok(())
    }
}

/// Uniform code in 1000..=9999.
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(OTP_MIN..=OTP_MAX).to_string()
}

#[async_trait]
impl OtpAuthority for OtpEngine {
    #[tracing::instrument(skip(self), fields(phone = %phone))]
    async fn issue(&self, phone: &str, channel_id: &str) -> Result<IssuedOtp, AuthError> {
        validate_phone(phone)?;

        let code = generate_code();
        let entry = OtpEntry::new(phone.to_string(), code.clone(), self.clock.now(), self.ttl);
        let expires_at = entry.expires_at;

        if self.store.put(entry).await?.is_some() {
            tracing::info!("Replaced previously issued OTP");
        }

        let failure = match self.gateway.send(channel_id, &self.message_for(&code)).await {
            Ok(receipt) if receipt.ok => None,
            Ok(receipt) => Some(
                receipt
                    .description
                    .unwrap_or_else(|| "gateway reported failure".to_string()),
            ),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            tracing::warn!(reason = %reason, "OTP delivery failed");
            self.discard_if_current(phone, &code).await?;
            return Err(AuthError::DeliveryFailure { reason });
        }

        tracing::info!(expires_at = %expires_at, "OTP issued");
        Ok(IssuedOtp { code, expires_at })
    }

    #[tracing::instrument(skip(self, code), fields(phone = %phone))]
    async fn verify(&self, phone: &str, code: &str) -> Result<OtpVerification, AuthError> {
        validate_phone(phone)?;

        // Any lookup consumes the entry, matched or not.
        let Some(entry) = self.store.take(phone).await? else {
            return Ok(OtpVerification::NotFound);
        };

        let outcome = if entry.is_expired_at(self.clock.now()) {
            OtpVerification::Expired
        } else if entry.code == code {
            OtpVerification::Valid
        } else {
            OtpVerification::Mismatch
        };

        tracing::info!(outcome = ?outcome, "OTP verification");
        Ok(outcome)
    }

    async fn purge_expired(&self, phone: &str) -> Result<bool, AuthError> {
        let now = self.clock.now();
        match self.store.get(phone).await? {
            Some(entry) if entry.is_expired_at(now) => {
                // Re-check under take so a fresh reissue is not lost.
                match self.store.take(phone).await? {
                    Some(taken) if taken.is_expired_at(now) => Ok(true),
                    Some(fresh) => {
                        self.store.put(fresh).await?;
                        Ok(false)
                    }
                    None => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }
}

/// Test double that accepts any 4-digit string and delivers nothing.
/// Wired only when the configuration asks for it outside production.
pub struct AcceptAnyCodeOtp {
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AcceptAnyCodeOtp {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: Duration::minutes(OTP_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl OtpAuthority for AcceptAnyCodeOtp {
    async fn issue(&self, phone: &str, _channel_id: &str) -> Result<IssuedOtp, AuthError> {
        validate_phone(phone)?;
        tracing::warn!(phone = %phone, "Accept-any OTP double active: no code delivered");
        Ok(IssuedOtp {
            code: "0000".to_string(),
            expires_at: self.clock.now() + self.ttl,
        })
    }

    async fn verify(&self, phone: &str, code: &str) -> Result<OtpVerification, AuthError> {
        validate_phone(phone)?;
        if code.len() == 4 && code.chars().all(|c| c.is_ascii_digit()) {
            Ok(OtpVerification::Valid)
        } else {
            Ok(OtpVerification::Mismatch)
        }
    }

    async fn purge_expired(&self, _phone: &str) -> Result<bool, AuthError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockClock, MockNotificationGateway};

    const PHONE: &str = "+998901234567";

    struct Harness {
        engine: OtpEngine,
        store: Arc<InMemoryOtpStore>,
        gateway: Arc<MockNotificationGateway>,
        clock: Arc<MockClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryOtpStore::new());
        let gateway = Arc::new(MockNotificationGateway::new());
        let clock = Arc::new(MockClock::default());
        let engine = OtpEngine::new(store.clone(), gateway.clone(), clock.clone());
        Harness {
            engine,
            store,
            gateway,
            clock,
        }
    }

    #[test]
    fn generated_codes_are_four_digits() {
        for _ in 0..500 {
            let code: u16 = generate_code().parse().unwrap();
            assert!((OTP_MIN..=OTP_MAX).contains(&code));
        }
    }

    #[tokio::test]
    async fn issue_persists_and_delivers() {
        let h = harness();
        let issued = h.engine.issue(PHONE, "555").await.unwrap();

        assert_eq!(issued.expires_at, h.clock.now() + Duration::minutes(10));
        assert_eq!(h.gateway.last_code_for("555"), Some(issued.code.clone()));
        assert_eq!(h.store.get(PHONE).await.unwrap().unwrap().code, issued.code);
    }

    #[tokio::test]
    async fn verify_is_single_use() {
        let h = harness();
        let issued = h.engine.issue(PHONE, "555").await.unwrap();

        assert_eq!(
            h.engine.verify(PHONE, &issued.code).await.unwrap(),
            OtpVerification::Valid
        );
        assert_eq!(
            h.engine.verify(PHONE, &issued.code).await.unwrap(),
            OtpVerification::NotFound
        );
    }

    #[tokio::test]
    async fn mismatch_consumes_the_entry() {
        let h = harness();
        let issued = h.engine.issue(PHONE, "555").await.unwrap();
        let wrong = if issued.code == "1234" { "4321" } else { "1234" };

        assert_eq!(
            h.engine.verify(PHONE, wrong).await.unwrap(),
            OtpVerification::Mismatch
        );
        assert_eq!(
            h.engine.verify(PHONE, &issued.code).await.unwrap(),
            OtpVerification::NotFound
        );
    }

    #[tokio::test]
    async fn reissue_invalidates_prior_code() {
        let h = harness();
        let first = h.engine.issue(PHONE, "555").await.unwrap();
        let second = h.engine.issue(PHONE, "555").await.unwrap();

        let outcome = h.engine.verify(PHONE, &first.code).await.unwrap();
        if first.code == second.code {
            // Same draw twice; the live entry is still the second issuance.
            assert_eq!(outcome, OtpVerification::Valid);
        } else {
            assert_eq!(outcome, OtpVerification::Mismatch);
        }
        assert_ne!(
            h.engine.verify(PHONE, &first.code).await.unwrap(),
            OtpVerification::Valid
        );
    }

    #[tokio::test]
    async fn expired_entry_is_reported_and_deleted() {
        let h = harness();
        let issued = h.engine.issue(PHONE, "555").await.unwrap();
        h.clock.advance(Duration::minutes(10) + Duration::seconds(1));

        assert_eq!(
            h.engine.verify(PHONE, &issued.code).await.unwrap(),
            OtpVerification::Expired
        );
        assert!(h.store.get(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delivery_failure_is_distinct_and_leaves_no_entry() {
        let h = harness();
        h.gateway.set_failing(true);

        let err = h.engine.issue(PHONE, "555").await.unwrap_err();
        assert!(matches!(err, AuthError::DeliveryFailure { .. }));
        assert!(h.store.get(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_phone_is_rejected_before_store_access() {
        let h = harness();
        let err = h.engine.issue("901234567", "555").await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn purge_only_removes_expired_entries() {
        let h = harness();
        h.engine.issue(PHONE, "555").await.unwrap();
        assert!(!h.engine.purge_expired(PHONE).await.unwrap());

        h.clock.advance(Duration::minutes(11));
        assert!(h.engine.purge_expired(PHONE).await.unwrap());
        assert!(h.store.get(PHONE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accept_any_double_is_explicit() {
        let double = AcceptAnyCodeOtp::new(Arc::new(MockClock::default()));
        assert_eq!(
            double.verify(PHONE, "7777").await.unwrap(),
            OtpVerification::Valid
        );
        assert_eq!(
            double.verify(PHONE, "77a7").await.unwrap(),
            OtpVerification::Mismatch
        );
    }

    #[tokio::test]
    async fn accept_any_double_expires_on_the_injected_clock() {
        let clock = Arc::new(MockClock::default());
        clock.advance(Duration::days(400));
        let double = AcceptAnyCodeOtp::new(clock.clone()).with_ttl(Duration::minutes(3));

        let issued = double.issue(PHONE, "555").await.unwrap();
        assert_eq!(issued.expires_at, clock.now() + Duration::minutes(3));
    }
}
