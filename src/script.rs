//! Script and bot models.
//!
//! A script is an immutable-once-published, versioned document holding one
//! authored graph. A bot owns a monotonically increasing sequence of
//! script versions; at most one of them, referenced by
//! [`Bot::active_script_version`], serves live traffic. The highest
//! unpublished version, if any, is the editable draft.
//!
//! Versioning rules are enforced by the stores (`save_draft` /
//! `publish_latest`); the models here are plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::GraphData;
use crate::types::{BotId, ScriptId};

/// One versioned script document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub bot_id: BotId,
    pub title: Option<String>,
    /// Monotonically increasing per bot, starting at 1.
    pub version: i64,
    /// Published versions are frozen and never edited again.
    pub is_published: bool,
    pub graph: GraphData,
    pub created_at: DateTime<Utc>,
}

/// A bot: owner of script versions and the anchor for respondents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    pub description: Option<String>,
    /// Version number of the published script serving live traffic, if
    /// the bot has ever been published.
    pub active_script_version: Option<i64>,
    pub created_at: DateTime<Utc>,
}
