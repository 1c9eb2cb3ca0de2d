/*!
SQLite store

Durable sqlx-backed implementation of the persistence traits in
`stores::mod`.

## Behavior

- Timestamps are stored as RFC3339 text and parsed leniently on read
  (a malformed value degrades to "now" instead of failing the row).
- Graph payloads, session variables, and respondent profiles are stored
  as JSON text columns.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) run on connect; disabling
  the feature assumes external migration orchestration.

## Concurrency

`save_session` performs the optimistic revision check in a single
`UPDATE ... WHERE id = ? AND revision = ?` statement, so two writers
racing on one session cannot interleave cursor writes: the loser gets
`StoreError::Conflict`.

## Schema mapping

- `bots`               ← [`crate::script::Bot`]
- `scripts.graph_json` ← serialized [`crate::graph::GraphData`]
- `respondents`        ← unique on (bot_id, channel_type, external_id)
- `sessions.variables_json` ← the live variables map
- `answers`            ← append-only log, never updated
- `settings`           ← key/value credential storage
*/

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::graph::GraphData;
use crate::script::{Bot, Script};
use crate::session::{Answer, NewAnswer, NewSession, Respondent, Session};
use crate::types::{BotId, ChannelType, RespondentId, ScriptId, SessionId, SessionStatus};

use super::{
    AnswerStore, BotStore, RespondentStore, Result, ScriptStore, SessionStore, SettingStore,
    StoreError,
};

/// SQLite-backed implementation of all store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn backend(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {e}"),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_ts(&v))
}

impl SqliteStore {
    /// Connect to (or create) a SQLite database at `database_url`.
    /// Example URL: `"sqlite://botflow.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| backend("parse database url", e))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| backend("connect", e))?;
        Self::prepare(pool).await
    }

    /// Connect to a private in-memory database (single connection, so the
    /// database lives as long as the pool). Intended for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| backend("parse database url", e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| backend("connect", e))?;
        Self::prepare(pool).await
    }

    async fn prepare(pool: SqlitePool) -> Result<Self> {
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| backend("migration failure", e))?;
        }
        Ok(Self { pool })
    }

    fn row_to_bot(row: &SqliteRow) -> Bot {
        Bot {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            active_script_version: row.get("active_script_version"),
            created_at: parse_ts(&row.get::<String, _>("created_at")),
        }
    }

    fn row_to_script(row: &SqliteRow) -> Result<Script> {
        let graph_json: String = row.get("graph_json");
        let graph: GraphData = serde_json::from_str(&graph_json)?;
        Ok(Script {
            id: row.get("id"),
            bot_id: row.get("bot_id"),
            title: row.get("title"),
            version: row.get("version"),
            is_published: row.get::<i64, _>("is_published") != 0,
            graph,
            created_at: parse_ts(&row.get::<String, _>("created_at")),
        })
    }

    fn row_to_respondent(row: &SqliteRow) -> Result<Respondent> {
        let profile_json: String = row.get("profile_json");
        Ok(Respondent {
            id: row.get("id"),
            bot_id: row.get("bot_id"),
            channel: ChannelType::decode(&row.get::<String, _>("channel_type")),
            external_id: row.get("external_id"),
            profile: serde_json::from_str(&profile_json)?,
            created_at: parse_ts(&row.get::<String, _>("created_at")),
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session> {
        let variables_json: String = row.get("variables_json");
        Ok(Session {
            id: row.get("id"),
            bot_id: row.get("bot_id"),
            respondent_id: row.get("respondent_id"),
            script_id: row.get("script_id"),
            status: SessionStatus::parse(&row.get::<String, _>("status")),
            current_node_id: row.get("current_node_id"),
            variables: serde_json::from_str(&variables_json)?,
            revision: row.get("revision"),
            started_at: parse_ts(&row.get::<String, _>("started_at")),
            finished_at: parse_opt_ts(row.get("finished_at")),
        })
    }

    fn row_to_answer(row: &SqliteRow) -> Answer {
        Answer {
            id: row.get("id"),
            session_id: row.get("session_id"),
            respondent_id: row.get("respondent_id"),
            node_id: row.get("node_id"),
            question_key: row.get("question_key"),
            value: row.get("value"),
            created_at: parse_ts(&row.get::<String, _>("created_at")),
        }
    }
}

#[async_trait]
impl BotStore for SqliteStore {
    async fn bot(&self, id: BotId) -> Result<Option<Bot>> {
        let row = sqlx::query("SELECT * FROM bots WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select bot", e))?;
        Ok(row.as_ref().map(Self::row_to_bot))
    }

    async fn create_bot(&self, name: &str, description: Option<String>) -> Result<Bot> {
        let created_at = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO bots (name, description, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(&description)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert bot", e))?;
        Ok(Bot {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            description,
            active_script_version: None,
            created_at: parse_ts(&created_at),
        })
    }
}

#[async_trait]
impl ScriptStore for SqliteStore {
    async fn script(&self, id: ScriptId) -> Result<Option<Script>> {
        let row = sqlx::query("SELECT * FROM scripts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select script", e))?;
        row.as_ref().map(Self::row_to_script).transpose()
    }

    async fn script_by_version(&self, bot_id: BotId, version: i64) -> Result<Option<Script>> {
        let row = sqlx::query("SELECT * FROM scripts WHERE bot_id = ?1 AND version = ?2")
            .bind(bot_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select script by version", e))?;
        row.as_ref().map(Self::row_to_script).transpose()
    }

    async fn latest_script(&self, bot_id: BotId) -> Result<Option<Script>> {
        let row = sqlx::query(
            "SELECT * FROM scripts WHERE bot_id = ?1 ORDER BY version DESC LIMIT 1",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select latest script", e))?;
        row.as_ref().map(Self::row_to_script).transpose()
    }

    #[instrument(skip(self, graph), err)]
    async fn save_draft(
        &self,
        bot_id: BotId,
        title: Option<String>,
        graph: GraphData,
    ) -> Result<Script> {
        let graph_json = serde_json::to_string(&graph)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("tx begin", e))?;

        let latest = sqlx::query(
            "SELECT * FROM scripts WHERE bot_id = ?1 ORDER BY version DESC LIMIT 1",
        )
        .bind(bot_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend("select latest script", e))?;

        let script = match latest {
            Some(row) if row.get::<i64, _>("is_published") == 0 => {
                // The unpublished head is the editable draft.
                let id: ScriptId = row.get("id");
                sqlx::query("UPDATE scripts SET title = ?1, graph_json = ?2 WHERE id = ?3")
                    .bind(&title)
                    .bind(&graph_json)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| backend("update draft", e))?;
                Script {
                    id,
                    bot_id,
                    title,
                    version: row.get("version"),
                    is_published: false,
                    graph,
                    created_at: parse_ts(&row.get::<String, _>("created_at")),
                }
            }
            latest => {
                let version = latest
                    .map(|row| row.get::<i64, _>("version"))
                    .unwrap_or(0)
                    + 1;
                let created_at = now_rfc3339();
                let result = sqlx::query(
                    "INSERT INTO scripts (bot_id, title, version, is_published, graph_json, created_at) \
                     VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                )
                .bind(bot_id)
                .bind(&title)
                .bind(version)
                .bind(&graph_json)
                .bind(&created_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| backend("insert draft", e))?;
                Script {
                    id: result.last_insert_rowid(),
                    bot_id,
                    title,
                    version,
                    is_published: false,
                    graph,
                    created_at: parse_ts(&created_at),
                }
            }
        };

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        Ok(script)
    }

    #[instrument(skip(self), err)]
    async fn publish_latest(&self, bot_id: BotId) -> Result<Script> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("tx begin", e))?;

        let row = sqlx::query(
            "SELECT * FROM scripts WHERE bot_id = ?1 ORDER BY version DESC LIMIT 1",
        )
        .bind(bot_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| backend("select latest script", e))?;

        let Some(row) = row else {
            return Err(StoreError::NoScript { bot_id });
        };
        let mut script = Self::row_to_script(&row)?;
        if script.is_published {
            return Err(StoreError::AlreadyPublished {
                bot_id,
                version: script.version,
            });
        }

        sqlx::query("UPDATE scripts SET is_published = 1 WHERE id = ?1")
            .bind(script.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("publish script", e))?;
        sqlx::query("UPDATE bots SET active_script_version = ?1 WHERE id = ?2")
            .bind(script.version)
            .bind(bot_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| backend("activate script version", e))?;

        tx.commit().await.map_err(|e| backend("tx commit", e))?;
        script.is_published = true;
        Ok(script)
    }
}

#[async_trait]
impl RespondentStore for SqliteStore {
    async fn respondent(&self, id: RespondentId) -> Result<Option<Respondent>> {
        let row = sqlx::query("SELECT * FROM respondents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select respondent", e))?;
        row.as_ref().map(Self::row_to_respondent).transpose()
    }

    async fn find_respondent(
        &self,
        bot_id: BotId,
        channel: &ChannelType,
        external_id: &str,
    ) -> Result<Option<Respondent>> {
        let row = sqlx::query(
            "SELECT * FROM respondents \
             WHERE bot_id = ?1 AND channel_type = ?2 AND external_id = ?3",
        )
        .bind(bot_id)
        .bind(channel.encode())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select respondent", e))?;
        row.as_ref().map(Self::row_to_respondent).transpose()
    }

    async fn create_respondent(
        &self,
        bot_id: BotId,
        channel: ChannelType,
        external_id: &str,
        profile: serde_json::Value,
    ) -> Result<Respondent> {
        let profile_json = serde_json::to_string(&profile)?;
        let created_at = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO respondents (bot_id, channel_type, external_id, profile_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(bot_id)
        .bind(channel.encode())
        .bind(external_id)
        .bind(&profile_json)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert respondent", e))?;
        Ok(Respondent {
            id: result.last_insert_rowid(),
            bot_id,
            channel,
            external_id: external_id.to_string(),
            profile,
            created_at: parse_ts(&created_at),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn session(&self, id: SessionId) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select session", e))?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn active_session(&self, respondent_id: RespondentId) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT * FROM sessions \
             WHERE respondent_id = ?1 AND status = 'active' \
             ORDER BY started_at DESC, id DESC LIMIT 1",
        )
        .bind(respondent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("select active session", e))?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn create_session(&self, new: NewSession) -> Result<Session> {
        let variables_json = serde_json::to_string(&new.variables)?;
        let started_at = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO sessions \
             (bot_id, respondent_id, script_id, status, current_node_id, variables_json, revision, started_at) \
             VALUES (?1, ?2, ?3, 'active', NULL, ?4, 0, ?5)",
        )
        .bind(new.bot_id)
        .bind(new.respondent_id)
        .bind(new.script_id)
        .bind(&variables_json)
        .bind(&started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert session", e))?;
        Ok(Session {
            id: result.last_insert_rowid(),
            bot_id: new.bot_id,
            respondent_id: new.respondent_id,
            script_id: new.script_id,
            status: SessionStatus::Active,
            current_node_id: None,
            variables: new.variables,
            revision: 0,
            started_at: parse_ts(&started_at),
            finished_at: None,
        })
    }

    #[instrument(skip(self, session), fields(session_id = session.id), err)]
    async fn save_session(&self, session: &mut Session) -> Result<()> {
        let variables_json = serde_json::to_string(&session.variables)?;
        let result = sqlx::query(
            "UPDATE sessions SET \
                 status = ?1, \
                 current_node_id = ?2, \
                 variables_json = ?3, \
                 finished_at = ?4, \
                 revision = revision + 1 \
             WHERE id = ?5 AND revision = ?6",
        )
        .bind(session.status.as_str())
        .bind(&session.current_node_id)
        .bind(&variables_json)
        .bind(session.finished_at.map(|dt| dt.to_rfc3339()))
        .bind(session.id)
        .bind(session.revision)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update session", e))?;

        if result.rows_affected() == 0 {
            let found: Option<i64> =
                sqlx::query_scalar("SELECT revision FROM sessions WHERE id = ?1")
                    .bind(session.id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| backend("reload session revision", e))?;
            return match found {
                Some(found) => Err(StoreError::Conflict {
                    session_id: session.id,
                    expected: session.revision,
                    found,
                }),
                None => Err(StoreError::Backend {
                    message: format!("session {} does not exist", session.id),
                }),
            };
        }

        session.revision += 1;
        Ok(())
    }
}

#[async_trait]
impl AnswerStore for SqliteStore {
    async fn append(&self, answer: NewAnswer) -> Result<Answer> {
        let created_at = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO answers (session_id, respondent_id, node_id, question_key, value, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(answer.session_id)
        .bind(answer.respondent_id)
        .bind(&answer.node_id)
        .bind(&answer.question_key)
        .bind(&answer.value)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| backend("insert answer", e))?;
        Ok(Answer {
            id: result.last_insert_rowid(),
            session_id: answer.session_id,
            respondent_id: answer.respondent_id,
            node_id: answer.node_id,
            question_key: answer.question_key,
            value: answer.value,
            created_at: parse_ts(&created_at),
        })
    }

    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<Answer>> {
        let rows = sqlx::query("SELECT * FROM answers WHERE session_id = ?1 ORDER BY id")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("select answers", e))?;
        Ok(rows.iter().map(Self::row_to_answer).collect())
    }
}

#[async_trait]
impl SettingStore for SqliteStore {
    async fn setting(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("select setting", e))
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("upsert setting", e))?;
        Ok(())
    }
}
