//! Schedule entries - explicit one-shot timers drained by the scheduler loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulePayload {
    /// Purge the phone's OTP entry if it is past its TTL.
    OtpExpiry { phone: String },
    /// Marks the resend cooldown window; lapses silently.
    ResendCooldown { phone: String },
    AppointmentReminder { channel_id: String, text: String },
}

impl SchedulePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulePayload::OtpExpiry { .. } => "otp_expiry",
            SchedulePayload::ResendCooldown { .. } => "resend_cooldown",
            SchedulePayload::AppointmentReminder { .. } => "appointment_reminder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    /// Who the timer is about: a phone number or an identity id.
    pub subject: String,
    pub fire_at: DateTime<Utc>,
    pub payload: SchedulePayload,
}

impl ScheduleEntry {
    pub fn new(subject: impl Into<String>, fire_at: DateTime<Utc>, payload: SchedulePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            fire_at,
            payload,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }
}
