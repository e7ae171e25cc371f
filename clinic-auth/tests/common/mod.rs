//! Test helper module for clinic-auth integration tests.
//!
//! Builds the full router over in-memory stores, a mock clock, and a
//! recording Telegram gateway, then drives it with `oneshot` requests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use clinic_auth::{
    build_router,
    config::{
        ClinicAuthConfig, Environment, OtpConfig, OtpMode, RateLimitConfig, SchedulerConfig,
        SecurityConfig, TelegramConfig,
    },
    models::{
        AdminLevel, BranchId, BranchScope, IdentityId, IdentityProfile, IdentityRecord, TokenKind,
    },
    services::{
        AuthEngine, EngineParts, InMemoryAdminRequestStore, InMemoryIdentityStore,
        InMemoryOtpStore, InMemoryScheduleStore, MockClock, MockNotificationGateway, OtpEngine,
    },
    utils::{hash_secret, PlainSecret},
    AppState,
};
use http_body_util::BodyExt;
use serde_json::Value;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const STAFF_ID: IdentityId = IdentityId(7);
pub const STAFF_PHONE: &str = "+998901234567";
pub const STAFF_EMAIL: &str = "dilnoza@clinic.uz";
pub const STAFF_PASSWORD: &str = "staff-password";
pub const STAFF_CHANNEL: &str = "555";

pub const UNLINKED_STAFF_PHONE: &str = "+998901234568";

pub const BRANCH_HEAD_ID: IdentityId = IdentityId(9);
pub const BRANCH_HEAD_PHONE: &str = "+998901234569";
pub const BRANCH_HEAD_BRANCH: &str = "yunusobod";

pub const SUPER_ADMIN_ID: IdentityId = IdentityId(1);
pub const SUPER_ADMIN_EMAIL: &str = "root@clinic.uz";
pub const SUPER_ADMIN_PASSWORD: &str = "root-password";

pub fn test_config() -> ClinicAuthConfig {
    ClinicAuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "clinic-auth".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        telegram: TelegramConfig {
            api_base_url: "https://api.telegram.org".to_string(),
            bot_token: "test:token".to_string(),
            timeout_secs: 5,
        },
        otp: OtpConfig {
            mode: OtpMode::Live,
            ttl_secs: 600,
            resend_cooldown_secs: 120,
        },
        scheduler: SchedulerConfig { tick_millis: 1000 },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        bootstrap_admin: None,
    }
}

fn seed_identities() -> Vec<IdentityRecord> {
    let hash = |secret: &str| hash_secret(&PlainSecret::new(secret)).unwrap();

    vec![
        IdentityRecord::new(
            SUPER_ADMIN_ID,
            "Root Admin",
            IdentityProfile::Admin {
                level: AdminLevel::Super,
                branch_id: None,
            },
        )
        .with_email(SUPER_ADMIN_EMAIL)
        .with_phone("+998900000001")
        .with_secret_hash(hash(SUPER_ADMIN_PASSWORD)),
        IdentityRecord::new(
            STAFF_ID,
            "Dilnoza",
            IdentityProfile::Staff {
                branch_id: Some(BranchId("chilonzor".to_string())),
                branch_head_access: None,
            },
        )
        .with_email(STAFF_EMAIL)
        .with_phone(STAFF_PHONE)
        .with_secret_hash(hash(STAFF_PASSWORD))
        .with_telegram_channel(STAFF_CHANNEL),
        IdentityRecord::new(
            IdentityId(8),
            "Bekzod",
            IdentityProfile::Staff {
                branch_id: None,
                branch_head_access: None,
            },
        )
        .with_phone(UNLINKED_STAFF_PHONE),
        IdentityRecord::new(
            BRANCH_HEAD_ID,
            "Malika",
            IdentityProfile::Staff {
                branch_id: None,
                branch_head_access: Some(BranchScope::new(BRANCH_HEAD_BRANCH)),
            },
        )
        .with_phone(BRANCH_HEAD_PHONE)
        .with_telegram_channel("556"),
    ]
}

/// Router plus direct handles on the collaborators behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<MockClock>,
    pub gateway: Arc<MockNotificationGateway>,
    pub identities: Arc<InMemoryIdentityStore>,
    pub admin_token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ClinicAuthConfig) -> Self {
        let clock = Arc::new(MockClock::default());
        let gateway = Arc::new(MockNotificationGateway::new());
        let identities = Arc::new(InMemoryIdentityStore::with_records(seed_identities()));

        let otp = Arc::new(
            OtpEngine::new(Arc::new(InMemoryOtpStore::new()), gateway.clone(), clock.clone())
                .with_ttl(config.otp_ttl()),
        );

        let engine = AuthEngine::assemble(EngineParts {
            identities: identities.clone(),
            admin_requests: Arc::new(InMemoryAdminRequestStore::new()),
            otp,
            schedule: Arc::new(InMemoryScheduleStore::new()),
            gateway: gateway.clone(),
            clock: clock.clone(),
            resend_cooldown: config.resend_cooldown(),
        });

        let admin_token = engine
            .tokens
            .mint(SUPER_ADMIN_ID, TokenKind::Admin)
            .await
            .expect("Failed to mint admin token")
            .value;

        let state = AppState {
            login_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            ip_rate_limiter: create_ip_rate_limiter(
                config.rate_limit.global_ip_limit,
                config.rate_limit.global_ip_window_seconds,
            ),
            config,
            engine,
        };
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            clock,
            gateway,
            identities,
            admin_token,
        }
    }

    pub fn engine(&self) -> &AuthEngine {
        &self.state.engine
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(body), None).await
    }

    pub async fn post_as(&self, uri: &str, body: Value, token: &str) -> TestResponse {
        self.send(Method::POST, uri, Some(body), Some(token)).await
    }

    pub async fn get_as(&self, uri: &str, token: &str) -> TestResponse {
        self.send(Method::GET, uri, None, Some(token)).await
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// The code the mock gateway last delivered to `channel_id`.
    pub fn code_sent_to(&self, channel_id: &str) -> String {
        self.gateway
            .last_code_for(channel_id)
            .expect("No code was delivered to the channel")
    }
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn retry_after(&self) -> Option<u64> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }
}
