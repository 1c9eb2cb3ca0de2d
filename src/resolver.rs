//! Session resolution: mapping inbound channel events to sessions.
//!
//! Webhook surfaces call [`SessionResolver::resolve`] before every
//! [`crate::executor::StepExecutor::process_step`]: it pins down *who* is
//! talking (find-or-create the respondent) and *which traversal* the
//! message belongs to (the newest active session, or a fresh one bound to
//! the bot's published script). Preview surfaces use
//! [`SessionResolver::start_preview`] instead, which always opens a fresh
//! session on the latest script version, draft included.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::session::{NewSession, Respondent, Session};
use crate::stores::{BotStore, RespondentStore, ScriptStore, SessionStore, StoreError};
use crate::types::{BotId, ChannelType};

/// External id of the shared preview respondent per bot.
const PREVIEW_EXTERNAL_ID: &str = "test_user";

#[derive(Debug, Error, Diagnostic)]
pub enum ResolverError {
    #[error("bot {bot_id} has no script")]
    #[diagnostic(
        code(botflow::resolver::no_script),
        help("Save a script for the bot before starting a preview chat.")
    )]
    NoScript { bot_id: BotId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Maps `(bot, channel, external id)` to the session a step should run
/// against.
pub struct SessionResolver {
    bots: Arc<dyn BotStore>,
    scripts: Arc<dyn ScriptStore>,
    respondents: Arc<dyn RespondentStore>,
    sessions: Arc<dyn SessionStore>,
}

impl SessionResolver {
    pub fn new(
        bots: Arc<dyn BotStore>,
        scripts: Arc<dyn ScriptStore>,
        respondents: Arc<dyn RespondentStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            bots,
            scripts,
            respondents,
            sessions,
        }
    }

    /// Build a resolver over a single store value implementing all the
    /// persistence traits (e.g. [`crate::stores::MemoryStore`]).
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: BotStore + ScriptStore + RespondentStore + SessionStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    /// Resolve an inbound event to a session.
    ///
    /// Returns the respondent's newest active session when one exists.
    /// Otherwise creates one bound to the bot's active published script,
    /// seeding `variables` with the channel and external id. When the bot
    /// has no active script the event is dropped (logged, not queued)
    /// and `Ok(None)` is returned.
    #[instrument(skip(self), fields(%channel), err)]
    pub async fn resolve(
        &self,
        bot_id: BotId,
        channel: ChannelType,
        external_id: &str,
    ) -> Result<Option<Session>, ResolverError> {
        let respondent = self
            .find_or_create_respondent(bot_id, channel.clone(), external_id, json!({}))
            .await?;

        if let Some(active) = self.sessions.active_session(respondent.id).await? {
            return Ok(Some(active));
        }

        let Some(bot) = self.bots.bot(bot_id).await? else {
            tracing::warn!(bot_id, "inbound event for unknown bot dropped");
            return Ok(None);
        };
        let Some(version) = bot.active_script_version else {
            tracing::warn!(bot_id, "bot has no active script; inbound event dropped");
            return Ok(None);
        };
        let Some(script) = self.scripts.script_by_version(bot_id, version).await? else {
            tracing::warn!(
                bot_id,
                version,
                "active script version missing; inbound event dropped"
            );
            return Ok(None);
        };

        let mut variables = FxHashMap::default();
        variables.insert("channel".to_string(), channel.encode().to_string());
        variables.insert("external_id".to_string(), external_id.to_string());

        let session = self
            .sessions
            .create_session(NewSession {
                bot_id,
                respondent_id: respondent.id,
                script_id: script.id,
                variables,
            })
            .await?;
        tracing::info!(bot_id, session_id = session.id, "session created");
        Ok(Some(session))
    }

    /// Open a fresh preview session on the bot's latest script version
    /// (draft allowed), for the bot's shared web test respondent.
    ///
    /// Always creates a new session: previews restart from the top.
    #[instrument(skip(self), err)]
    pub async fn start_preview(&self, bot_id: BotId) -> Result<Session, ResolverError> {
        let Some(script) = self.scripts.latest_script(bot_id).await? else {
            return Err(ResolverError::NoScript { bot_id });
        };

        let respondent = self
            .find_or_create_respondent(
                bot_id,
                ChannelType::Web,
                PREVIEW_EXTERNAL_ID,
                json!({"name": "Tester"}),
            )
            .await?;

        let session = self
            .sessions
            .create_session(NewSession {
                bot_id,
                respondent_id: respondent.id,
                script_id: script.id,
                variables: FxHashMap::default(),
            })
            .await?;
        Ok(session)
    }

    async fn find_or_create_respondent(
        &self,
        bot_id: BotId,
        channel: ChannelType,
        external_id: &str,
        profile: serde_json::Value,
    ) -> Result<Respondent, StoreError> {
        if let Some(existing) = self
            .respondents
            .find_respondent(bot_id, &channel, external_id)
            .await?
        {
            return Ok(existing);
        }
        self.respondents
            .create_respondent(bot_id, channel, external_id, profile)
            .await
    }
}
