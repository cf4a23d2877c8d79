//! Notification sink.
//!
//! The poller hands each qualifying message to a [`NotificationSink`] once.
//! Delivery guarantees belong to the sink; the poller logs failures and
//! moves on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::mail::Message;
use crate::account::AccountId;

/// Telegram Bot API root.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Errors that can occur while sending a notification.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Transport failure, including request timeouts. The request URL is
    /// stripped because it carries the bot token.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The channel refused the message.
    #[error("Notification rejected ({status}): {description}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Reason given by the channel.
        description: String,
    },
}

/// Delivers a plain-text alert to a human-facing channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sends one message.
    async fn send(&self, text: &str) -> Result<(), SendError>;
}

/// Renders the alert text for a message that arrived in `account`.
#[must_use]
pub fn format_notification(account: &AccountId, message: &Message) -> String {
    format!(
        "New mail in {account} | Subject: {} | From: {} | Date: {}",
        message.subject, message.sender, message.date
    )
}

/// Sends notifications to a Telegram chat through a bot.
#[derive(Clone)]
pub struct TelegramSink {
    http: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    timeout: Duration,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("base_url", &self.base_url)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSink {
    /// Creates a sink posting as `bot_token` into `chat_id`.
    #[must_use]
    pub fn new(
        http: Client,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            timeout,
        }
    }

    /// Points the sink at another API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<(), SendError> {
        let response = self
            .http
            .post(self.send_message_url())
            .timeout(self.timeout)
            .json(&SendMessageRequest {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .map_err(|e| SendError::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SendError::Http(e.without_url()))?;
        bot_reply(status, body)
    }
}

/// Maps a Bot API reply to the send outcome. Only a 2xx reply with
/// `"ok": true` counts as delivered.
fn bot_reply(status: StatusCode, body: String) -> Result<(), SendError> {
    match serde_json::from_str::<BotResponse>(&body).ok() {
        Some(BotResponse { ok: true, .. }) if status.is_success() => Ok(()),
        Some(BotResponse { description, .. }) => Err(SendError::Rejected {
            status: status.as_u16(),
            description: description.unwrap_or(body),
        }),
        None => Err(SendError::Rejected {
            status: status.as_u16(),
            description: body,
        }),
    }
}
