use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ClinicAuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub telegram: TelegramConfig,
    pub otp: OtpConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Clone, Deserialize)]
pub struct TelegramConfig {
    pub api_base_url: String,
    pub bot_token: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_base_url", &self.api_base_url)
            .field("bot_token", &"[redacted]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OtpMode {
    /// Real codes delivered through Telegram.
    Live,
    /// Any 4-digit code verifies. Never allowed in prod.
    AcceptAny,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    pub mode: OtpMode,
    pub ttl_secs: i64,
    pub resend_cooldown_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// First super admin, created at startup when `BOOTSTRAP_ADMIN_EMAIL` is set.
#[derive(Clone, Deserialize)]
pub struct BootstrapAdminConfig {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub telegram_channel_id: Option<String>,
}

impl std::fmt::Debug for BootstrapAdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdminConfig")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("password", &"[redacted]")
            .field("telegram_channel_id", &self.telegram_channel_id)
            .finish()
    }
}

impl BootstrapAdminConfig {
    fn from_env() -> Result<Option<Self>, AppError> {
        let Ok(email) = env::var("BOOTSTRAP_ADMIN_EMAIL") else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: get_env("BOOTSTRAP_ADMIN_NAME", Some("Super Admin"), false)?,
            email,
            phone: get_env("BOOTSTRAP_ADMIN_PHONE", None, false)?,
            password: get_env("BOOTSTRAP_ADMIN_PASSWORD", None, false)?,
            telegram_channel_id: env::var("BOOTSTRAP_ADMIN_TELEGRAM").ok(),
        }))
    }
}

impl ClinicAuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = ClinicAuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("clinic-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            telegram: TelegramConfig {
                api_base_url: get_env(
                    "TELEGRAM_API_BASE_URL",
                    Some("https://api.telegram.org"),
                    is_prod,
                )?,
                // Never defaulted: without a token no code can be delivered.
                bot_token: get_env("TELEGRAM_BOT_TOKEN", None, is_prod)?,
                timeout_secs: parse_env("TELEGRAM_TIMEOUT_SECS", Some("10"), is_prod)?,
            },
            otp: OtpConfig {
                mode: get_env("OTP_MODE", Some("live"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                ttl_secs: parse_env("OTP_TTL_SECS", Some("600"), is_prod)?,
                resend_cooldown_secs: parse_env("OTP_RESEND_COOLDOWN_SECS", Some("120"), is_prod)?,
            },
            scheduler: SchedulerConfig {
                tick_millis: parse_env("SCHEDULER_TICK_MILLIS", Some("1000"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("5"), is_prod)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            bootstrap_admin: BootstrapAdminConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.otp.ttl_secs <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_TTL_SECS must be positive"
            )));
        }

        if self.otp.resend_cooldown_secs <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OTP_RESEND_COOLDOWN_SECS must be positive"
            )));
        }

        if self.scheduler.tick_millis == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SCHEDULER_TICK_MILLIS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.otp.mode == OtpMode::AcceptAny {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "OTP_MODE=accept_any is a test double and is not allowed in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        } else if self.otp.mode == OtpMode::AcceptAny {
            tracing::warn!("OTP_MODE=accept_any: any 4-digit code will verify");
        }

        Ok(())
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp.ttl_secs)
    }

    pub fn resend_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp.resend_cooldown_secs)
    }

    pub fn scheduler_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler.tick_millis)
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for OtpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(OtpMode::Live),
            "accept_any" => Ok(OtpMode::AcceptAny),
            _ => Err(format!("Invalid OTP mode: {}", s)),
        }
    }
}
