//! Session model - resolved authorization context and the login attempt state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::identity::{BranchScope, IdentityId, IdentityRecord, Role};

/// Capability flags granted by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Patients,
    Appointments,
    Medications,
    Billing,
    Inventory,
    Reports,
    Admin,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Permission::Patients,
        Permission::Appointments,
        Permission::Medications,
        Permission::Billing,
        Permission::Inventory,
        Permission::Reports,
        Permission::Admin,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Role {
    /// Fixed role-to-permission table.
    pub fn permissions(&self) -> PermissionSet {
        use Permission::*;
        match self {
            Role::Patient => [Appointments].into_iter().collect(),
            Role::Staff => [Patients, Appointments, Medications, Inventory]
                .into_iter()
                .collect(),
            Role::BranchAdmin | Role::SuperAdmin => Permission::ALL.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Password,
    PhoneOtp,
    Token,
}

/// Produced on a successful attempt; the caller decides whether to persist it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity_id: IdentityId,
    pub role: Role,
    pub permissions: PermissionSet,
    /// `None` means global scope.
    pub branch_scope: Option<BranchScope>,
    pub login_method: LoginMethod,
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// A token-carried scope overrides the identity's own branch binding.
    pub fn for_identity(
        record: &IdentityRecord,
        login_method: LoginMethod,
        token_scope: Option<BranchScope>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let role = record.role();
        Self {
            identity_id: record.id,
            role,
            permissions: role.permissions(),
            branch_scope: token_scope.or_else(|| record.branch_scope()),
            login_method,
            issued_at,
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_global(&self) -> bool {
        self.branch_scope.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Start,
    CredentialCheck,
    OtpPending,
    Authenticated,
    Rejected,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Authenticated | AttemptState::Rejected)
    }

    fn can_move_to(&self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Start, CredentialCheck)
                | (CredentialCheck, OtpPending)
                | (CredentialCheck, Authenticated)
                | (CredentialCheck, Rejected)
                | (OtpPending, OtpPending)
                | (OtpPending, Authenticated)
                | (OtpPending, Rejected)
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::Start => "START",
            AttemptState::CredentialCheck => "CREDENTIAL_CHECK",
            AttemptState::OtpPending => "OTP_PENDING",
            AttemptState::Authenticated => "AUTHENTICATED",
            AttemptState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal login transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AttemptState,
    pub to: AttemptState,
}

/// One login attempt: `START -> CREDENTIAL_CHECK -> (OTP_PENDING ->)? AUTHENTICATED | REJECTED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub method: LoginMethod,
    pub started_at: DateTime<Utc>,
    state: AttemptState,
}

impl LoginAttempt {
    pub fn start(method: LoginMethod, started_at: DateTime<Utc>) -> Self {
        Self {
            method,
            started_at,
            state: AttemptState::Start,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn advance(&mut self, next: AttemptState) -> Result<(), InvalidTransition> {
        if !self.state.can_move_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(method = ?self.method, from = %self.state, to = %next, "Login attempt transition");
        self.state = next;
        Ok(())
    }
}
