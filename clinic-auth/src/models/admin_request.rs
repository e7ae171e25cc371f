//! Admin signup request - two-outcome approval workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::utils::SecretHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminRequestId(pub Uuid);

impl AdminRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AdminRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AdminRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl AdminRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminRequestStatus::Pending => "pending",
            AdminRequestStatus::Approved => "approved",
            AdminRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdminRequestStatus::Pending)
    }
}

impl fmt::Display for AdminRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub id: AdminRequestId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub secret_hash: SecretHash,
    pub telegram: Option<String>,
    pub status: AdminRequestStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl AdminRequest {
    pub fn new(
        name: String,
        email: String,
        phone: String,
        secret_hash: SecretHash,
        telegram: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AdminRequestId::new(),
            name,
            email,
            phone,
            secret_hash,
            telegram,
            status: AdminRequestStatus::Pending,
            created_at: now,
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == AdminRequestStatus::Pending
    }

    /// Move out of `pending`. A terminal request is left untouched and its
    /// current status is returned as the error.
    pub fn decide(
        &mut self,
        decision: Decision,
        at: DateTime<Utc>,
    ) -> Result<(), AdminRequestStatus> {
        if self.status.is_terminal() {
            return Err(self.status);
        }
        self.status = match decision {
            Decision::Approve => AdminRequestStatus::Approved,
            Decision::Reject => AdminRequestStatus::Rejected,
        };
        self.decided_at = Some(at);
        Ok(())
    }
}
