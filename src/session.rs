//! Session, respondent, and answer models.
//!
//! A session is the execution cursor of one respondent's traversal of one
//! script version: which node the machine is paused at, the variables
//! collected so far, and the lifecycle status. It is owned exclusively by
//! the step executor while advancing and persisted after every node
//! transition, so a crash loses at most the in-flight step.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{BotId, ChannelType, RespondentId, ScriptId, SessionId, SessionStatus};

/// The execution cursor for one respondent on one script version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub bot_id: BotId,
    pub respondent_id: RespondentId,
    pub script_id: ScriptId,
    pub status: SessionStatus,
    /// Node the machine is paused at; `None` before the first step.
    pub current_node_id: Option<String>,
    /// Live variable snapshot, last-write-wins per key. The immutable
    /// answer log is the audit trail; this is the working copy conditions
    /// read.
    pub variables: FxHashMap<String, String>,
    /// Optimistic-concurrency counter, bumped by every successful save.
    pub revision: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session still accepts steps.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Transition to `finished`, stamping `finished_at` exactly once.
    ///
    /// Idempotent: finishing an already-finished session neither changes
    /// the status nor overwrites the timestamp.
    pub fn finish(&mut self) {
        if self.status == SessionStatus::Finished {
            return;
        }
        self.status = SessionStatus::Finished;
        self.finished_at = Some(Utc::now());
    }
}

/// The identity of an end user on one channel of one bot.
///
/// Unique per `(bot_id, channel, external_id)`; the resolver creates one
/// on first contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Respondent {
    pub id: RespondentId,
    pub bot_id: BotId,
    pub channel: ChannelType,
    /// Channel-native identifier (Telegram chat id, phone number, ...).
    pub external_id: String,
    /// Channel-provided profile payload, opaque to the engine.
    pub profile: Value,
    pub created_at: DateTime<Utc>,
}

/// One append-only answer log entry.
///
/// Never mutated or deleted except via cascading session/respondent
/// deletion. Repeated visits to the same question append further rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub session_id: SessionId,
    pub respondent_id: RespondentId,
    pub node_id: Option<String>,
    pub question_key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// An answer about to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnswer {
    pub session_id: SessionId,
    pub respondent_id: RespondentId,
    pub node_id: Option<String>,
    pub question_key: String,
    pub value: String,
}

/// A session about to be created; the store assigns id, timestamps, and
/// the initial revision. The cursor starts at `None` so the first step
/// enters the graph at its start node.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub bot_id: BotId,
    pub respondent_id: RespondentId,
    pub script_id: ScriptId,
    pub variables: FxHashMap<String, String>,
}
