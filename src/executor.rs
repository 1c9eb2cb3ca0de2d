//! The step executor: the resumable state machine at the core of the
//! engine.
//!
//! One [`StepExecutor::process_step`] call advances a session by exactly
//! one logical step: it consumes at most one user input, records it as an
//! answer when the session is paused at a question, resolves the next
//! node, then executes nodes until the graph pauses (an interactive node)
//! or terminates (no outgoing edge). Each inbound message from a channel
//! maps to one call; the process may restart between calls, so the
//! session row is the only execution state.
//!
//! # Durability ordering
//!
//! The cursor (`current_node_id`) is persisted *before* a node's side
//! effects run. A crash between persist and dispatch resumes at the node
//! that was about to run: at-least-once dispatch, never a lost cursor.
//!
//! # Concurrency
//!
//! Two concurrent steps on the same session would both read the same
//! cursor and advance independently, duplicating or skipping transitions.
//! The executor therefore serializes steps per session id with an async
//! mutex; unrelated sessions never contend. Underneath, every session
//! save also carries an optimistic revision check
//! ([`StoreError::Conflict`]) so a second process racing on the same row
//! fails loud.
//!
//! # Loop ceiling
//!
//! Node execution is an explicit loop with a per-invocation ceiling
//! (default [`Settings::DEFAULT_STEP_LIMIT`]). A script wired into a
//! cycle of non-pausing nodes (`condition` → `condition` → ...) fails
//! with [`EngineError::InfiniteLoop`] instead of hanging the request; the
//! session stays paused at the last persisted node for inspection.

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::config::Settings;
use crate::dispatch::{Dispatcher, OutboundMessage};
use crate::graph::{GraphError, Node, NodeBody, ScriptGraph};
use crate::session::{NewAnswer, Respondent, Session};
use crate::stores::{AnswerStore, RespondentStore, ScriptStore, SessionStore, StoreError};
use crate::types::{ScriptId, SessionId};

/// Result of one `process_step` invocation.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The session as persisted at the end of the step.
    pub session: Session,
    /// Every message dispatched during the step, in order. Preview
    /// surfaces return this to the caller; webhook surfaces ignore it.
    pub transcript: Vec<OutboundMessage>,
    /// Ids of the nodes executed during this step, in order.
    pub visited: Vec<String>,
}

impl StepOutcome {
    /// Whether the session reached a dead end during this step.
    #[must_use]
    pub fn finished(&self) -> bool {
        !self.session.is_active()
    }
}

/// Fatal step-execution errors. Delivery failures are *not* here: they
/// are logged and swallowed so the state machine never unwinds over a
/// flaky channel.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("session not found: {session_id}")]
    #[diagnostic(code(botflow::engine::session_not_found))]
    SessionNotFound { session_id: SessionId },

    #[error("script not found: {script_id}")]
    #[diagnostic(
        code(botflow::engine::script_not_found),
        help("Sessions must reference an existing script version.")
    )]
    ScriptNotFound { script_id: ScriptId },

    #[error("node transition ceiling of {limit} exceeded in session {session_id}")]
    #[diagnostic(
        code(botflow::engine::infinite_loop),
        help(
            "The script likely wires non-pausing nodes into a cycle \
             (condition -> condition -> ...). The session is left paused \
             at the last persisted node."
        )
    )]
    InfiniteLoop { session_id: SessionId, limit: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Per-session async mutexes keyed by session id.
///
/// Entries are a handful of bytes and stay for the lifetime of the
/// executor; a given deployment cycles executors long before the registry
/// size matters.
#[derive(Debug, Default)]
struct SessionLocks {
    inner: Mutex<FxHashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn lock_for(&self, session_id: SessionId) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Outcome of next-node selection for a resumed session.
enum Selection<'g> {
    /// Execute from this node; `None` means terminal.
    Advance(Option<&'g Node>),
    /// Unmatched choice with no default route: stay paused and wait for
    /// a better answer.
    Stay,
}

/// Drives sessions through their script graphs, one step per call.
pub struct StepExecutor {
    scripts: Arc<dyn ScriptStore>,
    sessions: Arc<dyn SessionStore>,
    answers: Arc<dyn AnswerStore>,
    respondents: Arc<dyn RespondentStore>,
    dispatcher: Arc<dyn Dispatcher>,
    step_limit: usize,
    locks: SessionLocks,
}

impl StepExecutor {
    pub fn new(
        scripts: Arc<dyn ScriptStore>,
        sessions: Arc<dyn SessionStore>,
        answers: Arc<dyn AnswerStore>,
        respondents: Arc<dyn RespondentStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            scripts,
            sessions,
            answers,
            respondents,
            dispatcher,
            step_limit: Settings::DEFAULT_STEP_LIMIT,
            locks: SessionLocks::default(),
        }
    }

    /// Build an executor over a single store value implementing all the
    /// persistence traits (e.g. [`crate::stores::MemoryStore`]).
    pub fn from_store<S>(store: Arc<S>, dispatcher: Arc<dyn Dispatcher>) -> Self
    where
        S: ScriptStore + SessionStore + AnswerStore + RespondentStore + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            dispatcher,
        )
    }

    /// Override the per-invocation node transition ceiling.
    #[must_use]
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Advance a session by one logical step.
    ///
    /// `user_input` is the inbound message text, if any; `None` starts a
    /// fresh session at its entry node or nudges a non-interactive pause.
    /// Steps on a finished session are a logged no-op with an empty
    /// transcript.
    #[instrument(skip(self, user_input), err)]
    pub async fn process_step(
        &self,
        session_id: SessionId,
        user_input: Option<&str>,
    ) -> Result<StepOutcome, EngineError> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self
            .sessions
            .session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound { session_id })?;

        let mut transcript = Vec::new();
        if !session.is_active() {
            tracing::warn!(session_id, "step on finished session ignored");
            return Ok(StepOutcome {
                session,
                transcript,
                visited: Vec::new(),
            });
        }

        let script = self
            .scripts
            .script(session.script_id)
            .await?
            .ok_or(EngineError::ScriptNotFound {
                script_id: session.script_id,
            })?;
        let graph = ScriptGraph::try_from(&script.graph)?;

        let respondent = self.respondents.respondent(session.respondent_id).await?;
        if respondent.is_none() {
            tracing::error!(
                session_id,
                respondent_id = session.respondent_id,
                "no respondent linked to session; outbound delivery disabled"
            );
        }

        // Phase 1: consume input while paused at a question-like node.
        if let (Some(input), Some(current_id)) = (user_input, session.current_node_id.clone()) {
            if let Some(node) = graph.node(&current_id) {
                if node.body.records_input() {
                    self.record_answer(&mut session, node, input).await?;
                }
            }
        }

        // Phase 2: pick where to go next.
        let selection = match session.current_node_id.clone() {
            None => Selection::Advance(graph.entry_node()),
            Some(current_id) => select_next(&graph, &current_id, user_input),
        };

        let mut next = match selection {
            Selection::Stay => {
                // Keep the recorded variables even though the cursor does
                // not move.
                self.sessions.save_session(&mut session).await?;
                return Ok(StepOutcome {
                    session,
                    transcript,
                    visited: Vec::new(),
                });
            }
            Selection::Advance(next) => next,
        };

        // Phase 3: execute until the graph pauses or terminates.
        let mut visited: Vec<String> = Vec::new();
        loop {
            let Some(node) = next else {
                session.finish();
                self.sessions.save_session(&mut session).await?;
                break;
            };

            if visited.len() >= self.step_limit {
                return Err(EngineError::InfiniteLoop {
                    session_id,
                    limit: self.step_limit,
                });
            }
            visited.push(node.id.clone());

            // Cursor first, side effects after.
            session.current_node_id = Some(node.id.clone());
            self.sessions.save_session(&mut session).await?;

            match &node.body {
                NodeBody::Start => {
                    next = graph.next_node(Some(node.id.as_str()), None);
                }
                NodeBody::Message { text, interactive } => {
                    self.deliver(
                        respondent.as_ref(),
                        &mut transcript,
                        OutboundMessage::text(text),
                    )
                    .await;
                    if *interactive {
                        break;
                    }
                    next = graph.next_node(Some(node.id.as_str()), None);
                }
                NodeBody::Question { text, .. } => {
                    self.deliver(
                        respondent.as_ref(),
                        &mut transcript,
                        OutboundMessage::text(text),
                    )
                    .await;
                    break;
                }
                NodeBody::SingleChoice { text, options, .. } => {
                    self.deliver(
                        respondent.as_ref(),
                        &mut transcript,
                        OutboundMessage::with_options(text, options.clone()),
                    )
                    .await;
                    break;
                }
                NodeBody::Condition {
                    variable,
                    operator,
                    value,
                } => {
                    let actual = variable
                        .as_deref()
                        .and_then(|name| session.variables.get(name))
                        .map(String::as_str);
                    let result = operator.evaluate(actual, value);
                    tracing::debug!(
                        session_id,
                        node = %node.id,
                        variable = variable.as_deref().unwrap_or(""),
                        actual = actual.unwrap_or(""),
                        %operator,
                        check = %value,
                        result,
                        "condition evaluated"
                    );
                    let handle = if result { "true" } else { "false" };
                    next = graph.next_node(Some(node.id.as_str()), Some(handle));
                }
            }
        }

        Ok(StepOutcome {
            session,
            transcript,
            visited,
        })
    }

    /// The answer recorder: append to the immutable log and mirror into
    /// the live variables (last-write-wins per key; repeated visits to
    /// the same question append further rows).
    async fn record_answer(
        &self,
        session: &mut Session,
        node: &Node,
        value: &str,
    ) -> Result<(), EngineError> {
        let key = match &node.body {
            NodeBody::Question { variable, .. } | NodeBody::SingleChoice { variable, .. } => {
                variable.clone()
            }
            _ => None,
        }
        .unwrap_or_else(|| format!("q_{}", node.id));

        self.answers
            .append(NewAnswer {
                session_id: session.id,
                respondent_id: session.respondent_id,
                node_id: Some(node.id.clone()),
                question_key: key.clone(),
                value: value.to_string(),
            })
            .await?;
        session.variables.insert(key, value.to_string());
        Ok(())
    }

    /// Record the message in the step transcript and, for real channels,
    /// hand it to the dispatcher. Delivery failure is logged and
    /// swallowed: the respondent misses a message, the session cursor
    /// still advances.
    async fn deliver(
        &self,
        respondent: Option<&Respondent>,
        transcript: &mut Vec<OutboundMessage>,
        message: OutboundMessage,
    ) {
        transcript.push(message.clone());
        let Some(respondent) = respondent else {
            return;
        };
        if respondent.channel.is_web() {
            return;
        }
        if let Err(error) = self.dispatcher.deliver(respondent, &message).await {
            tracing::warn!(
                channel = %respondent.channel,
                external_id = %respondent.external_id,
                %error,
                "outbound delivery failed; session state advances regardless"
            );
        }
    }
}

/// Next-node selection for a session resumed from `current_id`.
///
/// The single-choice fallback chain is deliberate and order-sensitive;
/// authored graphs depend on it: matched option handle (`option-<i>`,
/// then `option-<i>-left`), then the generic `default` handle, then the
/// unconditional edge. An input matching no option routes through
/// `default` when present and otherwise leaves the session paused.
fn select_next<'g>(
    graph: &'g ScriptGraph,
    current_id: &str,
    user_input: Option<&str>,
) -> Selection<'g> {
    if let Some(node) = graph.node(current_id) {
        if let (NodeBody::SingleChoice { options, .. }, Some(input)) = (&node.body, user_input) {
            if let Some(idx) = options.iter().position(|o| o.label == input) {
                for handle in [format!("option-{idx}"), format!("option-{idx}-left")] {
                    if let Some(next) = graph.next_node(Some(current_id), Some(handle.as_str())) {
                        return Selection::Advance(Some(next));
                    }
                }
                if let Some(next) = graph.next_node(Some(current_id), Some("default")) {
                    return Selection::Advance(Some(next));
                }
                return Selection::Advance(graph.next_node(Some(current_id), None));
            }
            if options.iter().any(|o| o.value.as_deref() == Some(input)) {
                return Selection::Advance(graph.next_node(Some(current_id), None));
            }
            if let Some(next) = graph.next_node(Some(current_id), Some("default")) {
                return Selection::Advance(Some(next));
            }
            return Selection::Stay;
        }
    }
    Selection::Advance(graph.next_node(Some(current_id), None))
}
