pub mod admin_request;
pub mod identity;
pub mod otp_entry;
pub mod schedule;
pub mod session;

pub use admin_request::{AdminRequest, AdminRequestId, AdminRequestStatus, Decision};
pub use identity::{
    AdminLevel, BranchId, BranchScope, Credentials, IdentityId, IdentityProfile, IdentityRecord,
    IssuedToken, Role, TokenKind, UnknownRole,
};
pub use otp_entry::{OtpEntry, OtpVerification};
pub use schedule::{ScheduleEntry, SchedulePayload};
pub use session::{
    AttemptState, InvalidTransition, LoginAttempt, LoginMethod, Permission, PermissionSet, Session,
};
