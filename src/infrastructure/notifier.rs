//! Alert channel: webhook delivery with bounded retry
//!
//! Messages are either plain text or a rich embed. Delivery retries with a
//! fixed delay sequence; a 429 waits the server's `Retry-After` hint instead
//! and does not advance the sequence, but still counts against the attempt
//! cap.

#![allow(clippy::uninlined_format_args)]

pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::domain::NotificationError;
use crate::infrastructure::config::NotificationConfig;
use crate::infrastructure::http_client::HttpTransport;
use crate::infrastructure::retry_manager::{ErrorClassification, Sleeper, clamp_retry_after, classify_delivery_status};

pub use templates::MessageRenderer;

/// Webhook limits on text sizes
const MAX_CONTENT_CHARS: usize = 2000;
const MAX_DESCRIPTION_CHARS: usize = 4096;
const MAX_FIELD_VALUE_CHARS: usize = 1024;

/// Alert severity, rendered as the embed color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Restock,
    Price,
    Warning,
    Critical,
}

impl Severity {
    pub const fn color(self) -> u32 {
        match self {
            Self::Info => 0x00FF00,
            Self::Restock => 0xFF9900,
            Self::Price => 0x0099FF,
            Self::Warning => 0xFFAA00,
            Self::Critical => 0xFF0000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl AlertField {
    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }
}

/// Structured alert rendered as a single embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichAlert {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub url: Option<String>,
    pub fields: Vec<AlertField>,
    pub timestamp: DateTime<Utc>,
}

impl RichAlert {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            url: None,
            fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(AlertField::inline(name, value));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertMessage {
    Text(String),
    Rich(RichAlert),
}

impl AlertMessage {
    /// Short description for logs
    pub fn summary(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Rich(alert) => &alert.title,
        }
    }

    /// Webhook JSON body
    pub fn to_payload(&self, username: &str) -> Value {
        match self {
            Self::Text(text) => json!({
                "content": truncate_chars(text, MAX_CONTENT_CHARS),
                "username": username,
            }),
            Self::Rich(alert) => {
                let mut embed = json!({
                    "title": alert.title,
                    "description": truncate_chars(&alert.description, MAX_DESCRIPTION_CHARS),
                    "color": alert.severity.color(),
                    "timestamp": alert.timestamp.to_rfc3339(),
                });
                if let Some(url) = &alert.url {
                    embed["url"] = json!(url);
                }
                if !alert.fields.is_empty() {
                    let fields: Vec<Value> = alert
                        .fields
                        .iter()
                        .map(|f| {
                            json!({
                                "name": f.name,
                                "value": truncate_chars(&f.value, MAX_FIELD_VALUE_CHARS),
                                "inline": f.inline,
                            })
                        })
                        .collect();
                    embed["fields"] = Value::Array(fields);
                }
                json!({ "embeds": [embed], "username": username })
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Destination for alerts
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), NotificationError>;
}

/// Webhook alert channel
pub struct WebhookNotifier {
    transport: Arc<dyn HttpTransport>,
    endpoint: String,
    username: String,
    delays: Vec<Duration>,
    max_retry_after: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl WebhookNotifier {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoint: impl Into<String>,
        config: &NotificationConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            username: config.username.clone(),
            delays: config.retry_delays(),
            max_retry_after: config.max_retry_after(),
            sleeper,
        }
    }

    /// Initial attempt plus one retry per configured delay
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Send a short text message to check the endpoint
    pub async fn test_connection(&self) -> Result<(), NotificationError> {
        self.deliver(&AlertMessage::Text("商品監視ツール接続テスト".to_string())).await
    }
}

#[async_trait]
impl AlertChannel for WebhookNotifier {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), NotificationError> {
        let payload = message.to_payload(&self.username);
        let max_attempts = self.max_attempts();
        let mut attempt = 0;
        let mut delay_index = 0;
        let mut last_status = None;
        let mut last_body = String::new();

        loop {
            attempt += 1;
            debug!("🌐 Delivering '{}' (attempt {}/{})", message.summary(), attempt, max_attempts);

            match self.transport.post_json(&self.endpoint, &payload).await {
                Ok(response) => match classify_delivery_status(response.status, response.retry_after) {
                    ErrorClassification::Success => {
                        info!("✅ Alert delivered: {}", message.summary());
                        return Ok(());
                    }
                    ErrorClassification::RateLimited { retry_after } => {
                        last_status = Some(response.status);
                        last_body = response.body;
                        if attempt >= max_attempts {
                            break;
                        }
                        let wait = match retry_after {
                            Some(hint) => clamp_retry_after(hint, self.max_retry_after),
                            None => self.delays.first().copied().unwrap_or_default(),
                        };
                        warn!("⏳ Alert channel rate limited, waiting {:?}", wait);
                        self.sleeper.sleep(wait).await;
                        continue;
                    }
                    ErrorClassification::Recoverable | ErrorClassification::NonRecoverable => {
                        warn!("❌ Alert delivery got HTTP {}: {}", response.status, response.body);
                        last_status = Some(response.status);
                        last_body = response.body;
                    }
                },
                Err(err) => {
                    warn!("❌ Alert delivery transport error: {}", err);
                    last_body = err.to_string();
                }
            }

            if attempt >= max_attempts {
                break;
            }
            let delay = self
                .delays
                .get(delay_index)
                .or_else(|| self.delays.last())
                .copied()
                .unwrap_or_default();
            delay_index += 1;
            self.sleeper.sleep(delay).await;
        }

        Err(NotificationError::Exhausted {
            attempts: attempt,
            last_status,
            last_body,
        })
    }
}
