//! The messaging collaborator: outbound sends to real channels.
//!
//! Owns credential resolution (settings store first, environment
//! fallback) and the HTTP legwork for each channel. Every send uses a
//! fixed 10-second timeout so a slow channel API cannot stall unrelated
//! sessions' steps.
//!
//! Failures never raise to the engine: [`MessagingClient::send`] returns
//! `false` and logs. At-least-once delivery to the end user is not
//! guaranteed; only session-cursor durability is.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::instrument;

use crate::config::Settings;
use crate::stores::SettingStore;
use crate::types::ChannelType;

/// Settings-store key for the Telegram bot token.
pub const TELEGRAM_BOT_TOKEN: &str = "telegram_bot_token";
/// Settings-store key for the WhatsApp gateway base URL.
pub const WHATSAPP_API_URL: &str = "whatsapp_api_url";
/// Settings-store key for the WhatsApp instance id.
pub const WHATSAPP_INSTANCE_ID: &str = "whatsapp_instance_id";
/// Settings-store key for the WhatsApp access token.
pub const WHATSAPP_ACCESS_TOKEN: &str = "whatsapp_access_token";

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the real messaging channels.
pub struct MessagingClient {
    http: reqwest::Client,
    settings: Arc<dyn SettingStore>,
    config: Settings,
}

impl std::fmt::Debug for MessagingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingClient").finish()
    }
}

impl MessagingClient {
    pub fn new(settings: Arc<dyn SettingStore>, config: Settings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            settings,
            config,
        }
    }

    /// Send `text` to `external_id` on `channel`.
    ///
    /// Returns `true` on a 2xx response from the channel API and `false`
    /// for everything else: missing credentials, transport errors, API
    /// rejections. Callers treat `false` as "logged, move on".
    #[instrument(skip(self, text), fields(channel = %channel))]
    pub async fn send(&self, channel: &ChannelType, external_id: &str, text: &str) -> bool {
        match channel {
            // Preview messages never leave the process.
            ChannelType::Web => true,
            ChannelType::Telegram => self.send_telegram(external_id, text).await,
            ChannelType::Whatsapp => self.send_whatsapp(external_id, text).await,
            ChannelType::Other(name) => {
                tracing::warn!(channel = %name, "no sender for channel; message dropped");
                false
            }
        }
    }

    /// Setting-store value first, environment fallback second.
    async fn resolve(&self, key: &str, fallback: Option<&str>) -> Option<String> {
        match self.settings.setting(key).await {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => fallback.map(str::to_string),
            Err(error) => {
                tracing::error!(key, %error, "failed to read setting");
                fallback.map(str::to_string)
            }
        }
    }

    async fn send_telegram(&self, chat_id: &str, text: &str) -> bool {
        let Some(token) = self
            .resolve(TELEGRAM_BOT_TOKEN, self.config.telegram_bot_token.as_deref())
            .await
        else {
            tracing::warn!("no Telegram token configured; message dropped");
            return false;
        };

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.telegram_api_base.trim_end_matches('/'),
            token
        );
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        self.post_json("telegram", &url, &payload).await
    }

    async fn send_whatsapp(&self, phone: &str, text: &str) -> bool {
        let Some(base_url) = self
            .resolve(WHATSAPP_API_URL, self.config.whatsapp_api_url.as_deref())
            .await
        else {
            tracing::warn!("WhatsApp API URL not configured; message dropped");
            return false;
        };
        let instance = self
            .resolve(
                WHATSAPP_INSTANCE_ID,
                self.config.whatsapp_instance_id.as_deref(),
            )
            .await
            .unwrap_or_default();
        let token = self
            .resolve(
                WHATSAPP_ACCESS_TOKEN,
                self.config.whatsapp_access_token.as_deref(),
            )
            .await
            .unwrap_or_default();

        // GreenAPI-style endpoint: {host}/waInstance{id}/sendMessage/{token}
        let url = format!(
            "{}/waInstance{}/sendMessage/{}",
            base_url.trim_end_matches('/'),
            instance,
            token
        );
        let payload = json!({
            "chatId": format!("{phone}@c.us"),
            "message": text,
        });
        self.post_json("whatsapp", &url, &payload).await
    }

    async fn post_json(&self, channel: &str, url: &str, payload: &serde_json::Value) -> bool {
        match self.http.post(url).json(payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(channel, %status, %body, "channel API rejected message");
                false
            }
            Err(error) => {
                tracing::error!(channel, %error, "channel send failed");
                false
            }
        }
    }
}
