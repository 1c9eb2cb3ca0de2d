//! Volatile in-memory store, for tests and preview sessions.
//!
//! Implements every persistence trait over `parking_lot`-guarded maps.
//! Row ids are allocated sequentially per entity, mirroring the SQLite
//! backend's autoincrement columns.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::graph::GraphData;
use crate::script::{Bot, Script};
use crate::session::{Answer, NewAnswer, NewSession, Respondent, Session};
use crate::types::{BotId, ChannelType, RespondentId, ScriptId, SessionId, SessionStatus};

use super::{
    AnswerStore, BotStore, RespondentStore, Result, ScriptStore, SessionStore, SettingStore,
    StoreError,
};

#[derive(Debug, Default)]
struct Inner {
    bots: FxHashMap<BotId, Bot>,
    scripts: Vec<Script>,
    respondents: Vec<Respondent>,
    sessions: FxHashMap<SessionId, Session>,
    answers: Vec<Answer>,
    settings: FxHashMap<String, String>,
    next_bot_id: BotId,
    next_script_id: ScriptId,
    next_respondent_id: RespondentId,
    next_session_id: SessionId,
    next_answer_id: i64,
}

/// In-memory implementation of all store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BotStore for MemoryStore {
    async fn bot(&self, id: BotId) -> Result<Option<Bot>> {
        Ok(self.inner.read().bots.get(&id).cloned())
    }

    async fn create_bot(&self, name: &str, description: Option<String>) -> Result<Bot> {
        let mut inner = self.inner.write();
        inner.next_bot_id += 1;
        let bot = Bot {
            id: inner.next_bot_id,
            name: name.to_string(),
            description,
            active_script_version: None,
            created_at: Utc::now(),
        };
        inner.bots.insert(bot.id, bot.clone());
        Ok(bot)
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn script(&self, id: ScriptId) -> Result<Option<Script>> {
        Ok(self.inner.read().scripts.iter().find(|s| s.id == id).cloned())
    }

    async fn script_by_version(&self, bot_id: BotId, version: i64) -> Result<Option<Script>> {
        Ok(self
            .inner
            .read()
            .scripts
            .iter()
            .find(|s| s.bot_id == bot_id && s.version == version)
            .cloned())
    }

    async fn latest_script(&self, bot_id: BotId) -> Result<Option<Script>> {
        Ok(self
            .inner
            .read()
            .scripts
            .iter()
            .filter(|s| s.bot_id == bot_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn save_draft(
        &self,
        bot_id: BotId,
        title: Option<String>,
        graph: GraphData,
    ) -> Result<Script> {
        let mut inner = self.inner.write();
        let latest = inner
            .scripts
            .iter_mut()
            .filter(|s| s.bot_id == bot_id)
            .max_by_key(|s| s.version);

        if let Some(draft) = latest.filter(|s| !s.is_published) {
            // The unpublished head is the editable draft.
            draft.title = title;
            draft.graph = graph;
            return Ok(draft.clone());
        }

        let version = inner
            .scripts
            .iter()
            .filter(|s| s.bot_id == bot_id)
            .map(|s| s.version)
            .max()
            .unwrap_or(0)
            + 1;
        inner.next_script_id += 1;
        let script = Script {
            id: inner.next_script_id,
            bot_id,
            title,
            version,
            is_published: false,
            graph,
            created_at: Utc::now(),
        };
        inner.scripts.push(script.clone());
        Ok(script)
    }

    async fn publish_latest(&self, bot_id: BotId) -> Result<Script> {
        let mut inner = self.inner.write();
        let Some(latest) = inner
            .scripts
            .iter_mut()
            .filter(|s| s.bot_id == bot_id)
            .max_by_key(|s| s.version)
        else {
            return Err(StoreError::NoScript { bot_id });
        };
        if latest.is_published {
            return Err(StoreError::AlreadyPublished {
                bot_id,
                version: latest.version,
            });
        }
        latest.is_published = true;
        let published = latest.clone();
        if let Some(bot) = inner.bots.get_mut(&bot_id) {
            bot.active_script_version = Some(published.version);
        }
        Ok(published)
    }
}

#[async_trait]
impl RespondentStore for MemoryStore {
    async fn respondent(&self, id: RespondentId) -> Result<Option<Respondent>> {
        Ok(self
            .inner
            .read()
            .respondents
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_respondent(
        &self,
        bot_id: BotId,
        channel: &ChannelType,
        external_id: &str,
    ) -> Result<Option<Respondent>> {
        Ok(self
            .inner
            .read()
            .respondents
            .iter()
            .find(|r| r.bot_id == bot_id && &r.channel == channel && r.external_id == external_id)
            .cloned())
    }

    async fn create_respondent(
        &self,
        bot_id: BotId,
        channel: ChannelType,
        external_id: &str,
        profile: serde_json::Value,
    ) -> Result<Respondent> {
        let mut inner = self.inner.write();
        inner.next_respondent_id += 1;
        let respondent = Respondent {
            id: inner.next_respondent_id,
            bot_id,
            channel,
            external_id: external_id.to_string(),
            profile,
            created_at: Utc::now(),
        };
        inner.respondents.push(respondent.clone());
        Ok(respondent)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.inner.read().sessions.get(&id).cloned())
    }

    async fn active_session(&self, respondent_id: RespondentId) -> Result<Option<Session>> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| s.respondent_id == respondent_id && s.status == SessionStatus::Active)
            // Most recent first; id breaks started_at ties from rapid creates.
            .max_by_key(|s| (s.started_at, s.id))
            .cloned())
    }

    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let mut inner = self.inner.write();
        inner.next_session_id += 1;
        let session = Session {
            id: inner.next_session_id,
            bot_id: new.bot_id,
            respondent_id: new.respondent_id,
            script_id: new.script_id,
            status: SessionStatus::Active,
            current_node_id: None,
            variables: new.variables,
            revision: 0,
            started_at: Utc::now(),
            finished_at: None,
        };
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn save_session(&self, session: &mut Session) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(stored) = inner.sessions.get_mut(&session.id) else {
            return Err(StoreError::Backend {
                message: format!("session {} does not exist", session.id),
            });
        };
        if stored.revision != session.revision {
            return Err(StoreError::Conflict {
                session_id: session.id,
                expected: session.revision,
                found: stored.revision,
            });
        }
        session.revision += 1;
        *stored = session.clone();
        Ok(())
    }
}

#[async_trait]
impl AnswerStore for MemoryStore {
    async fn append(&self, answer: NewAnswer) -> Result<Answer> {
        let mut inner = self.inner.write();
        inner.next_answer_id += 1;
        let answer = Answer {
            id: inner.next_answer_id,
            session_id: answer.session_id,
            respondent_id: answer.respondent_id,
            node_id: answer.node_id,
            question_key: answer.question_key,
            value: answer.value,
            created_at: Utc::now(),
        };
        inner.answers.push(answer.clone());
        Ok(answer)
    }

    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<Answer>> {
        Ok(self
            .inner
            .read()
            .answers
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn draft_overwrites_until_published_then_new_version() {
        let store = MemoryStore::new();
        let bot = store.create_bot("demo", None).await.unwrap();

        let v1 = store
            .save_draft(bot.id, None, GraphData::default())
            .await
            .unwrap();
        assert_eq!(v1.version, 1);

        // Saving again edits the same draft in place.
        let v1_again = store
            .save_draft(bot.id, Some("t".into()), GraphData::default())
            .await
            .unwrap();
        assert_eq!(v1_again.version, 1);
        assert_eq!(v1_again.id, v1.id);

        let published = store.publish_latest(bot.id).await.unwrap();
        assert!(published.is_published);
        assert_eq!(
            store.bot(bot.id).await.unwrap().unwrap().active_script_version,
            Some(1)
        );

        // Publishing froze v1; the next draft is v2.
        let v2 = store
            .save_draft(bot.id, None, GraphData::default())
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert!(!v2.is_published);

        assert!(matches!(
            store.publish_latest(0).await,
            Err(StoreError::NoScript { .. })
        ));
    }

    #[tokio::test]
    async fn session_save_enforces_revision() {
        let store = MemoryStore::new();
        let mut session = store
            .create_session(NewSession {
                bot_id: 1,
                respondent_id: 1,
                script_id: 1,
                variables: FxHashMap::default(),
            })
            .await
            .unwrap();

        let mut stale = session.clone();
        session.current_node_id = Some("a".into());
        store.save_session(&mut session).await.unwrap();
        assert_eq!(session.revision, 1);

        stale.current_node_id = Some("b".into());
        assert!(matches!(
            store.save_session(&mut stale).await,
            Err(StoreError::Conflict { expected: 0, found: 1, .. })
        ));
    }

    #[tokio::test]
    async fn active_session_picks_most_recent() {
        let store = MemoryStore::new();
        let new = || NewSession {
            bot_id: 1,
            respondent_id: 7,
            script_id: 1,
            variables: FxHashMap::default(),
        };
        let _first = store.create_session(new()).await.unwrap();
        let second = store.create_session(new()).await.unwrap();

        let active = store.active_session(7).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        let mut finished = second.clone();
        finished.finish();
        store.save_session(&mut finished).await.unwrap();
        let active = store.active_session(7).await.unwrap().unwrap();
        assert_eq!(active.id, 1);
    }

    #[tokio::test]
    async fn respondent_profile_roundtrip() {
        let store = MemoryStore::new();
        let created = store
            .create_respondent(1, ChannelType::Web, "test_user", json!({"name": "Tester"}))
            .await
            .unwrap();
        let found = store
            .find_respondent(1, &ChannelType::Web, "test_user")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created, found);
        assert!(store
            .find_respondent(1, &ChannelType::Telegram, "test_user")
            .await
            .unwrap()
            .is_none());
    }
}
