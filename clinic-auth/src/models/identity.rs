//! Identity model - credential-bearing patients, staff, and administrators.
//!
//! The record store owns these; the auth core reads identity fields and
//! writes only the token slot.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::SecretHash;

/// Store-assigned identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Staff,
    BranchAdmin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Staff => "staff",
            Role::BranchAdmin => "branch_admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::BranchAdmin | Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "staff" => Ok(Role::Staff),
            "branch_admin" => Ok(Role::BranchAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub String);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability scope restricting authority to a single branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchScope {
    pub branch_id: BranchId,
}

impl BranchScope {
    pub fn new(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: BranchId(branch_id.into()),
        }
    }
}

/// TTL class fixed at mint time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Standard,
    Admin,
    BranchHead,
}

impl TokenKind {
    pub fn ttl(&self) -> Duration {
        match self {
            TokenKind::Standard => Duration::minutes(10),
            TokenKind::Admin => Duration::days(30),
            TokenKind::BranchHead => Duration::hours(24),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Standard => "standard",
            TokenKind::Admin => "admin",
            TokenKind::BranchHead => "branch_head",
        }
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(TokenKind::Standard),
            "admin" => Ok(TokenKind::Admin),
            "branch_head" => Ok(TokenKind::BranchHead),
            _ => Err(format!("Invalid token kind: {}", s)),
        }
    }
}

/// Bearer token held in an identity's token slot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub value: String,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Present on branch-head tokens only.
    pub scope: Option<BranchScope>,
}

impl IssuedToken {
    pub fn new(
        value: String,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        scope: Option<BranchScope>,
    ) -> Self {
        Self {
            value,
            kind,
            issued_at,
            expires_at: issued_at + kind.ttl(),
            scope,
        }
    }

    /// Valid iff `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("value", &"[redacted]")
            .field("kind", &self.kind)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    Branch,
    Super,
}

/// Role-specific part of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityProfile {
    Patient,
    Staff {
        branch_id: Option<BranchId>,
        branch_head_access: Option<BranchScope>,
    },
    Admin {
        level: AdminLevel,
        branch_id: Option<BranchId>,
    },
}

/// Credential fields shared by every profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub secret_hash: Option<SecretHash>,
    pub telegram_channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: IdentityId,
    pub name: String,
    pub credentials: Credentials,
    pub profile: IdentityProfile,
    pub token: Option<IssuedToken>,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn new(id: IdentityId, name: impl Into<String>, profile: IdentityProfile) -> Self {
        Self {
            id,
            name: name.into(),
            credentials: Credentials::default(),
            profile,
            token: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.credentials.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.credentials.phone = Some(phone.into());
        self
    }

    pub fn with_secret_hash(mut self, hash: SecretHash) -> Self {
        self.credentials.secret_hash = Some(hash);
        self
    }

    pub fn with_telegram_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.credentials.telegram_channel_id = Some(channel_id.into());
        self
    }

    pub fn role(&self) -> Role {
        match &self.profile {
            IdentityProfile::Patient => Role::Patient,
            IdentityProfile::Staff { .. } => Role::Staff,
            IdentityProfile::Admin {
                level: AdminLevel::Branch,
                ..
            } => Role::BranchAdmin,
            IdentityProfile::Admin {
                level: AdminLevel::Super,
                ..
            } => Role::SuperAdmin,
        }
    }

    /// Branch the identity is bound to; `None` means global scope.
    pub fn branch_scope(&self) -> Option<BranchScope> {
        match &self.profile {
            IdentityProfile::Patient => None,
            IdentityProfile::Staff {
                branch_id,
                branch_head_access,
            } => branch_head_access.clone().or_else(|| {
                branch_id.clone().map(|branch_id| BranchScope { branch_id })
            }),
            IdentityProfile::Admin { branch_id, .. } => {
                branch_id.clone().map(|branch_id| BranchScope { branch_id })
            }
        }
    }

    /// The held token, if it is still inside its TTL.
    pub fn active_token(&self, now: DateTime<Utc>) -> Option<&IssuedToken> {
        self.token.as_ref().filter(|t| t.is_valid_at(now))
    }

    pub fn token_kind(&self) -> Option<TokenKind> {
        self.token.as_ref().map(|t| t.kind)
    }

    pub fn holds_token(&self, value: &str) -> bool {
        self.token.as_ref().is_some_and(|t| t.value == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(branch: Option<&str>, head: Option<&str>) -> IdentityRecord {
        IdentityRecord::new(
            IdentityId(7),
            "Dilnoza",
            IdentityProfile::Staff {
                branch_id: branch.map(|b| BranchId(b.to_string())),
                branch_head_access: head.map(BranchScope::new),
            },
        )
    }

    #[test]
    fn token_kind_ttls() {
        assert_eq!(TokenKind::Standard.ttl(), Duration::minutes(10));
        assert_eq!(TokenKind::Admin.ttl(), Duration::days(30));
        assert_eq!(TokenKind::BranchHead.ttl(), Duration::hours(24));
    }

    #[test]
    fn token_validity_is_strictly_before_expiry() {
        let t0 = Utc::now();
        let token = IssuedToken::new("ABCDEF123456".into(), TokenKind::Standard, t0, None);
        assert!(token.is_valid_at(t0 + Duration::minutes(9) + Duration::seconds(59)));
        assert!(!token.is_valid_at(t0 + Duration::minutes(10)));
    }

    #[test]
    fn role_is_derived_from_profile() {
        let admin = IdentityRecord::new(
            IdentityId(1),
            "Root",
            IdentityProfile::Admin {
                level: AdminLevel::Super,
                branch_id: None,
            },
        );
        assert_eq!(admin.role(), Role::SuperAdmin);
        assert_eq!(staff(None, None).role(), Role::Staff);
    }

    #[test]
    fn branch_head_access_takes_precedence_over_branch_id() {
        let record = staff(Some("north"), Some("south"));
        assert_eq!(record.branch_scope(), Some(BranchScope::new("south")));
        assert_eq!(
            staff(Some("north"), None).branch_scope(),
            Some(BranchScope::new("north"))
        );
        assert_eq!(staff(None, None).branch_scope(), None);
    }

    #[test]
    fn role_parsing_rejects_unknown_names() {
        assert_eq!("super_admin".parse::<Role>(), Ok(Role::SuperAdmin));
        assert_eq!(
            "superuser".parse::<Role>(),
            Err(UnknownRole("superuser".to_string()))
        );
    }

    #[test]
    fn debug_output_redacts_token_value() {
        let token = IssuedToken::new("SECRET123456".into(), TokenKind::Admin, Utc::now(), None);
        assert!(!format!("{:?}", token).contains("SECRET123456"));
    }
}
