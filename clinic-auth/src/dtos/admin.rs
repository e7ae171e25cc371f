use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AdminRequest, AdminRequestId, AdminRequestStatus, IdentityId};
use crate::services::{AdminSignup, ApprovedAdmin};
use crate::utils::PlainSecret;

#[derive(Debug, Deserialize, Validate)]
pub struct AdminSignupRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(custom(function = "crate::utils::phone_rule", message = "Invalid phone format"))]
    pub phone: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    pub telegram: Option<String>,
}

impl From<AdminSignupRequest> for AdminSignup {
    fn from(req: AdminSignupRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            phone: req.phone,
            secret: PlainSecret::new(req.password),
            telegram: req.telegram,
        }
    }
}

/// Admin request as shown to reviewers; the secret hash stays inside.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminRequestResponse {
    pub id: AdminRequestId,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    pub status: AdminRequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<AdminRequest> for AdminRequestResponse {
    fn from(req: AdminRequest) -> Self {
        Self {
            id: req.id,
            name: req.name,
            email: req.email,
            phone: req.phone,
            telegram: req.telegram,
            status: req.status,
            created_at: req.created_at,
            decided_at: req.decided_at,
        }
    }
}

/// What the approving admin sees. The new admin's token is not included;
/// the applicant signs in with their own password.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovedAdminResponse {
    pub request: AdminRequestResponse,
    pub identity_id: IdentityId,
}

impl From<ApprovedAdmin> for ApprovedAdminResponse {
    fn from(approved: ApprovedAdmin) -> Self {
        Self {
            request: approved.request.into(),
            identity_id: approved.identity_id,
        }
    }
}
