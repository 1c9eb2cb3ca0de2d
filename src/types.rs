//! Core identifier and enum types for the botflow engine.
//!
//! This module defines the fundamental types shared across the crate:
//! integer row identifiers for the persisted entities, the channel a
//! respondent arrives on, and the lifecycle status of a session.
//!
//! Channel and status enums carry stable string encodings
//! ([`ChannelType::encode`], [`SessionStatus::as_str`]) used by the
//! persistence layer, so renaming a variant is a schema migration, not a
//! refactor.
//!
//! # Examples
//!
//! ```rust
//! use botflow::types::{ChannelType, SessionStatus};
//!
//! let channel = ChannelType::Telegram;
//! assert_eq!(channel.encode(), "telegram");
//! assert_eq!(ChannelType::decode("telegram"), ChannelType::Telegram);
//!
//! assert_eq!(SessionStatus::Active.as_str(), "active");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Row identifier of a bot.
pub type BotId = i64;
/// Row identifier of a script version.
pub type ScriptId = i64;
/// Row identifier of a respondent.
pub type RespondentId = i64;
/// Row identifier of a session.
pub type SessionId = i64;

/// The messaging channel a respondent is reached on.
///
/// `Web` is the in-process preview channel: dispatched messages are only
/// collected into the step transcript and never leave the process. The
/// remaining variants delegate delivery to the messaging collaborator.
///
/// Unknown encodings round-trip through [`Other`](Self::Other) so rows
/// written by a newer deployment still load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// In-process preview/test channel; no external delivery.
    Web,
    /// Telegram Bot API.
    Telegram,
    /// WhatsApp (GreenAPI-style gateway).
    Whatsapp,
    /// A channel this build does not know how to deliver to.
    #[serde(untagged)]
    Other(String),
}

impl ChannelType {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &str {
        match self {
            ChannelType::Web => "web",
            ChannelType::Telegram => "telegram",
            ChannelType::Whatsapp => "whatsapp",
            ChannelType::Other(s) => s.as_str(),
        }
    }

    /// Decode a persisted string form back into a `ChannelType`.
    ///
    /// Unrecognized values become [`Other`](Self::Other) for forward
    /// compatibility.
    pub fn decode(s: &str) -> Self {
        match s {
            "web" => ChannelType::Web,
            "telegram" => ChannelType::Telegram,
            "whatsapp" => ChannelType::Whatsapp,
            other => ChannelType::Other(other.to_string()),
        }
    }

    /// Returns `true` for the in-process preview channel.
    #[must_use]
    pub fn is_web(&self) -> bool {
        matches!(self, Self::Web)
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<&str> for ChannelType {
    fn from(s: &str) -> Self {
        ChannelType::decode(s)
    }
}

/// Lifecycle status of a session.
///
/// A session is `Active` from creation until graph traversal reaches a
/// dead end, then `Finished` forever; finished sessions are never
/// resurrected; a new session must be created instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finished,
}

impl SessionStatus {
    /// The persisted string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }

    /// Parse a persisted string form; anything but `"finished"` is
    /// treated as active.
    pub fn parse(s: &str) -> Self {
        if s == "finished" {
            SessionStatus::Finished
        } else {
            SessionStatus::Active
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
