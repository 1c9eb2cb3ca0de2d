//! Persistence interfaces for the flow engine.
//!
//! The engine talks to storage through narrow async traits, one per
//! aggregate, so the interpreter stays independent of the backing
//! technology. Two backends ship with the crate:
//!
//! - [`MemoryStore`]: volatile, for tests and preview sessions.
//! - [`SqliteStore`]: durable sqlx/SQLite persistence with embedded
//!   migrations (behind the default `sqlite` feature).
//!
//! Both implement every trait, so a single store value can be shared
//! across the resolver and executor as `Arc<MemoryStore>` /
//! `Arc<SqliteStore>`.
//!
//! Session saves are revision-checked: [`SessionStore::save_session`]
//! compares the session's `revision` against the stored row and fails
//! with [`StoreError::Conflict`] on mismatch, bumping it on success. This
//! is the optimistic backstop behind the executor's per-session mutex:
//! two processes racing on one session fail loud instead of silently
//! interleaving cursor writes.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::graph::GraphData;
use crate::script::{Bot, Script};
use crate::session::{Answer, NewAnswer, NewSession, Respondent, Session};
use crate::types::{BotId, ChannelType, RespondentId, ScriptId, SessionId};

/// Storage-layer failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("backend error: {message}")]
    #[diagnostic(code(botflow::store::backend))]
    Backend { message: String },

    #[error("serialization error: {source}")]
    #[diagnostic(code(botflow::store::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("revision conflict saving session {session_id}: expected {expected}, found {found}")]
    #[diagnostic(
        code(botflow::store::conflict),
        help("Another writer advanced this session; reload it and retry the step.")
    )]
    Conflict {
        session_id: SessionId,
        expected: i64,
        found: i64,
    },

    #[error("latest script of bot {bot_id} (version {version}) is already published")]
    #[diagnostic(
        code(botflow::store::already_published),
        help("Save a new draft first; published versions are frozen.")
    )]
    AlreadyPublished { bot_id: BotId, version: i64 },

    #[error("bot {bot_id} has no script to publish")]
    #[diagnostic(code(botflow::store::no_script))]
    NoScript { bot_id: BotId },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(source: serde_json::Error) -> Self {
        StoreError::Serde { source }
    }
}

/// Versioned script documents.
///
/// `save_draft` overwrites the latest version while it is still
/// unpublished, otherwise allocates `max(version) + 1`. `publish_latest`
/// freezes the head version and points the bot's
/// `active_script_version` at it.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn script(&self, id: ScriptId) -> Result<Option<Script>>;
    async fn script_by_version(&self, bot_id: BotId, version: i64) -> Result<Option<Script>>;
    /// Highest version for the bot, published or not.
    async fn latest_script(&self, bot_id: BotId) -> Result<Option<Script>>;
    async fn save_draft(
        &self,
        bot_id: BotId,
        title: Option<String>,
        graph: GraphData,
    ) -> Result<Script>;
    async fn publish_latest(&self, bot_id: BotId) -> Result<Script>;
}

/// Bots (thin: the engine only needs lookups and test fixtures).
#[async_trait]
pub trait BotStore: Send + Sync {
    async fn bot(&self, id: BotId) -> Result<Option<Bot>>;
    async fn create_bot(&self, name: &str, description: Option<String>) -> Result<Bot>;
}

/// Respondent identities, unique per (bot, channel, external id).
#[async_trait]
pub trait RespondentStore: Send + Sync {
    async fn respondent(&self, id: RespondentId) -> Result<Option<Respondent>>;
    async fn find_respondent(
        &self,
        bot_id: BotId,
        channel: &ChannelType,
        external_id: &str,
    ) -> Result<Option<Respondent>>;
    async fn create_respondent(
        &self,
        bot_id: BotId,
        channel: ChannelType,
        external_id: &str,
        profile: serde_json::Value,
    ) -> Result<Respondent>;
}

/// Session rows: the execution cursor.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn session(&self, id: SessionId) -> Result<Option<Session>>;
    /// The most recently started active session for a respondent.
    async fn active_session(&self, respondent_id: RespondentId) -> Result<Option<Session>>;
    async fn create_session(&self, session: NewSession) -> Result<Session>;
    /// Persist the session, enforcing the optimistic revision check and
    /// bumping `session.revision` on success.
    async fn save_session(&self, session: &mut Session) -> Result<()>;
}

/// Append-only answer log.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    async fn append(&self, answer: NewAnswer) -> Result<Answer>;
    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<Answer>>;
}

/// Key/value settings (channel credentials and the like).
#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}
