//! Telegram Bot API notifier.
//!
//! API: `https://api.telegram.org/bot<token>/sendMessage`

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::types::TradeError;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: SecretString,
        chat_id: String,
        timeout: Duration,
    ) -> Result<Self, TradeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::NotifierFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            bot_token,
            chat_id,
            base_url: TELEGRAM_API_URL.to_string(),
        })
    }
}

fn truncate_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), TradeError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        );
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: truncate_message(text),
        };

        // The URL embeds the token; never surface reqwest's error text.
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                TradeError::NotifierFailed(format!(
                    "telegram request failed (timeout={})",
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        let parsed: TelegramResponse = response
            .json()
            .await
            .map_err(|_| TradeError::NotifierFailed(format!("telegram HTTP {status}")))?;

        if !parsed.ok {
            return Err(TradeError::NotifierFailed(format!(
                "telegram rejected message: {}",
                parsed.description.unwrap_or_else(|| status.to_string())
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
