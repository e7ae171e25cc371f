//! One-shot timers as explicit schedule entries, drained by a single loop.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::session::PhoneAttempts;
use super::{AuthError, Clock, NotificationGateway, OtpAuthority};
use crate::models::{ScheduleEntry, SchedulePayload};

pub const RESEND_COOLDOWN_SECS: i64 = 120;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert(&self, entry: ScheduleEntry) -> Result<(), anyhow::Error>;

    /// Remove and return every entry with `fire_at <= now`, oldest first.
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, anyhow::Error>;

    async fn pending_for(&self, subject: &str) -> Result<Vec<ScheduleEntry>, anyhow::Error>;
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: DashMap<Uuid, ScheduleEntry>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn insert(&self, entry: ScheduleEntry) -> Result<(), anyhow::Error> {
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, anyhow::Error> {
        let due_ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|e| e.is_due(now))
            .map(|e| *e.key())
            .collect();

        let mut due: Vec<ScheduleEntry> = due_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|(_, entry)| entry))
            .collect();
        due.sort_by_key(|e| e.fire_at);
        Ok(due)
    }

    async fn pending_for(&self, subject: &str) -> Result<Vec<ScheduleEntry>, anyhow::Error> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.subject == subject)
            .map(|e| e.value().clone())
            .collect())
    }
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub otp_purged: usize,
    pub attempts_rejected: usize,
    pub cooldowns_lapsed: usize,
    pub reminders_sent: usize,
    pub failures: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.otp_purged + self.attempts_rejected + self.cooldowns_lapsed + self.reminders_sent + self.failures
    }
}

pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    otp: Arc<dyn OtpAuthority>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    attempts: Arc<PhoneAttempts>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        otp: Arc<dyn OtpAuthority>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            otp,
            gateway,
            clock,
            attempts: Arc::new(PhoneAttempts::new()),
        }
    }

    /// Phone attempts to reject when their code's expiry timer fires.
    pub fn with_phone_attempts(mut self, attempts: Arc<PhoneAttempts>) -> Self {
        self.attempts = attempts;
        self
    }

    pub async fn schedule(&self, entry: ScheduleEntry) -> Result<Uuid, AuthError> {
        let id = entry.id;
        tracing::debug!(kind = entry.payload.kind(), fire_at = %entry.fire_at, "Timer scheduled");
        self.store.insert(entry).await?;
        Ok(id)
    }

    /// Both timers that follow a successful OTP issuance.
    pub async fn schedule_otp_timers(
        &self,
        phone: &str,
        expires_at: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<(), AuthError> {
        let now = self.clock.now();
        // An entry only counts as expired strictly after `expires_at`.
        self.schedule(ScheduleEntry::new(
            phone,
            expires_at + Duration::seconds(1),
            SchedulePayload::OtpExpiry {
                phone: phone.to_string(),
            },
        ))
        .await?;
        self.schedule(ScheduleEntry::new(
            phone,
            now + cooldown,
            SchedulePayload::ResendCooldown {
                phone: phone.to_string(),
            },
        ))
        .await?;
        Ok(())
    }

    pub async fn schedule_appointment_reminder(
        &self,
        channel_id: &str,
        text: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<Uuid, AuthError> {
        self.schedule(ScheduleEntry::new(
            channel_id,
            fire_at,
            SchedulePayload::AppointmentReminder {
                channel_id: channel_id.to_string(),
                text: text.to_string(),
            },
        ))
        .await
    }

    /// Time left on the phone's resend cooldown, if one is running.
    pub async fn cooldown_remaining(&self, phone: &str) -> Result<Option<Duration>, AuthError> {
        let now = self.clock.now();
        let latest = self
            .store
            .pending_for(phone)
            .await?
            .into_iter()
            .filter(|e| matches!(e.payload, SchedulePayload::ResendCooldown { .. }))
            .filter(|e| !e.is_due(now))
            .map(|e| e.fire_at)
            .max();
        Ok(latest.map(|fire_at| fire_at - now))
    }

    /// Fire everything due at the current clock reading.
    #[tracing::instrument(skip(self))]
    pub async fn run_due(&self) -> Result<DrainReport, AuthError> {
        let due = self.store.take_due(self.clock.now()).await?;
        let mut report = DrainReport::default();

        for entry in due {
            match &entry.payload {
                SchedulePayload::OtpExpiry { phone } => {
                    match self.otp.purge_expired(phone).await {
                        Ok(true) => report.otp_purged += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "OTP expiry purge failed");
                            report.failures += 1;
                        }
                    }
                    if self.attempts.expire(phone, self.clock.now()) {
                        report.attempts_rejected += 1;
                    }
                }
                SchedulePayload::ResendCooldown { .. } => report.cooldowns_lapsed += 1,
                SchedulePayload::AppointmentReminder { channel_id, text } => {
                    match self.gateway.send(channel_id, text).await {
                        Ok(receipt) if receipt.ok => report.reminders_sent += 1,
                        Ok(receipt) => {
                            tracing::warn!(description = ?receipt.description, "Reminder rejected by gateway");
                            report.failures += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Reminder delivery failed");
                            report.failures += 1;
                        }
                    }
                }
            }
        }

        if report.total() > 0 {
            tracing::info!(
                otp_purged = report.otp_purged,
                attempts_rejected = report.attempts_rejected,
                cooldowns_lapsed = report.cooldowns_lapsed,
                reminders_sent = report.reminders_sent,
                failures = report.failures,
                "Scheduler drained due entries"
            );
        }
        Ok(report)
    }

    /// Drive `run_due` on a fixed tick until `shutdown` fires.
    pub fn spawn(
        self: Arc<Self>,
        tick: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Scheduler loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_due().await {
                            tracing::error!(error = %e, "Scheduler pass failed");
                        }
                    }
                }
            }
        })
    }
}
