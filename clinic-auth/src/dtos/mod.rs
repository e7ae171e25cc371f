pub mod admin;
pub mod login;

pub use admin::{AdminRequestResponse, AdminSignupRequest, ApprovedAdminResponse};
pub use login::{
    PasswordLoginRequest, PhoneLoginStartRequest, PhoneLoginStartResponse,
    PhoneLoginVerifyRequest, RefreshTokenRequest, SessionResponse, TokenLoginRequest,
    TokenResponse,
};
