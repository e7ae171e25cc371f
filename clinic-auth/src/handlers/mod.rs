//! HTTP handlers for clinic-auth.

pub mod admin_requests;
pub mod login;
pub mod tokens;
