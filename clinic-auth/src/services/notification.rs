//! Out-of-band delivery of OTP codes and event notices.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use crate::config::TelegramConfig;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Gateway returned status {0}")]
    Status(u16),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Outcome reported by the gateway for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub ok: bool,
    pub description: Option<String>,
}

impl DeliveryReceipt {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            description: None,
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<DeliveryReceipt, GatewayError>;
}

/// Telegram Bot API `sendMessage` over HTTPS.
#[derive(Clone)]
pub struct TelegramGateway {
    client: Client,
    api_base_url: String,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramGateway {
    pub fn new(config: &TelegramConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Telegram HTTP client: {}", e))?;

        tracing::info!(api_base_url = %config.api_base_url, "Telegram gateway configured");

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn send_message_url(&self, channel_id: &str, text: &str) -> String {
        format!(
            "{}/bot{}/sendMessage?chat_id={}&text={}",
            self.api_base_url,
            self.bot_token,
            urlencoding::encode(channel_id),
            urlencoding::encode(text)
        )
    }
}

#[async_trait]
impl NotificationGateway for TelegramGateway {
    #[instrument(skip(self, text), fields(channel_id = %channel_id))]
    async fn send(&self, channel_id: &str, text: &str) -> Result<DeliveryReceipt, GatewayError> {
        let response = self
            .client
            .get(self.send_message_url(channel_id, text))
            .send()
            .await
            // reqwest errors embed the URL, which carries the bot token.
            .map_err(|e| GatewayError::Connection(e.without_url().to_string()))?;

        let status = response.status();
        let body: TelegramResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(GatewayError::Status(status.as_u16())),
            Err(e) => return Err(GatewayError::InvalidResponse(e.without_url().to_string())),
        };

        if body.ok {
            tracing::info!("Telegram message delivered");
        } else {
            tracing::warn!(
                status = status.as_u16(),
                description = ?body.description,
                "Telegram rejected message"
            );
        }

        Ok(DeliveryReceipt {
            ok: body.ok,
            description: body.description,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub channel_id: String,
    pub text: String,
}

/// Records every message; can be switched into a failing mode.
#[derive(Default)]
pub struct MockNotificationGateway {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl MockNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Last 4-digit code delivered to `channel_id`.
    pub fn last_code_for(&self, channel_id: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.channel_id == channel_id)
            .and_then(|n| {
                n.text
                    .split(|c: char| !c.is_ascii_digit())
                    .find(|word| word.len() == 4)
                    .map(str::to_string)
            })
    }
}

#[async_trait]
impl NotificationGateway for MockNotificationGateway {
    async fn send(&self, channel_id: &str, text: &str) -> Result<DeliveryReceipt, GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("mock gateway is failing".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentNotification {
                channel_id: channel_id.to_string(),
                text: text.to_string(),
            });
        Ok(DeliveryReceipt::delivered())
    }
}
