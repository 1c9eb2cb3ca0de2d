//! Environment-backed configuration.
//!
//! Channel credentials resolve in two layers: the settings store first
//! (operator-editable at runtime), then these environment values. A
//! `.env` file is honored via `dotenvy`.

use std::env;

/// Static configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database URL, e.g. `sqlite://botflow.db`.
    pub database_url: Option<String>,
    /// Telegram bot token fallback (`TELEGRAM_BOT_TOKEN`).
    pub telegram_bot_token: Option<String>,
    /// Telegram API host (`TELEGRAM_API_BASE`); overridable for tests.
    pub telegram_api_base: String,
    /// WhatsApp gateway base URL (`WA_API_URL`), GreenAPI-style.
    pub whatsapp_api_url: Option<String>,
    /// WhatsApp instance id (`WA_INSTANCE_ID`).
    pub whatsapp_instance_id: Option<String>,
    /// WhatsApp access token (`WA_ACCESS_TOKEN`).
    pub whatsapp_access_token: Option<String>,
    /// Per-step node transition ceiling (`BOTFLOW_STEP_LIMIT`).
    pub step_limit: usize,
}

impl Settings {
    /// Default node transition ceiling per `process_step` invocation.
    pub const DEFAULT_STEP_LIMIT: usize = 64;

    const DEFAULT_TELEGRAM_API_BASE: &'static str = "https://api.telegram.org";

    /// Load settings from the process environment (and `.env`, if any).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_api_base: env::var("TELEGRAM_API_BASE")
                .unwrap_or_else(|_| Self::DEFAULT_TELEGRAM_API_BASE.to_string()),
            whatsapp_api_url: env::var("WA_API_URL").ok(),
            whatsapp_instance_id: env::var("WA_INSTANCE_ID").ok(),
            whatsapp_access_token: env::var("WA_ACCESS_TOKEN").ok(),
            step_limit: env::var("BOTFLOW_STEP_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Self::DEFAULT_STEP_LIMIT),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            telegram_bot_token: None,
            telegram_api_base: Self::DEFAULT_TELEGRAM_API_BASE.to_string(),
            whatsapp_api_url: None,
            whatsapp_instance_id: None,
            whatsapp_access_token: None,
            step_limit: Self::DEFAULT_STEP_LIMIT,
        }
    }
}
