//! OTP entry model - short-lived phone-bound one-time codes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// At most one live entry exists per phone.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpEntry {
    pub phone: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpEntry {
    pub fn new(phone: String, code: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            phone,
            code,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

impl fmt::Debug for OtpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpEntry")
            .field("phone", &self.phone)
            .field("code", &"****")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpVerification {
    Valid,
    Expired,
    Mismatch,
    NotFound,
}
