//! # Botflow: resumable conversational flow engine
//!
//! Botflow executes user-authored bot scripts (directed graphs of typed
//! nodes built in a visual editor) against real users arriving over
//! messaging channels. Each inbound message advances a session by exactly
//! one logical step; sessions are persisted after every node transition,
//! so the process can restart freely between steps.
//!
//! ## Core concepts
//!
//! - **Script**: a versioned, immutable-once-published graph document
//! - **Session**: one respondent's traversal of one script version: the
//!   execution cursor plus collected variables
//! - **Step**: one [`executor::StepExecutor::process_step`] call;
//!   consumes at most one user input, then runs nodes until the graph
//!   pauses or finishes
//! - **Respondent**: an end user, identified per (bot, channel,
//!   external id)
//! - **Transcript**: the ordered messages dispatched during one step,
//!   returned to preview surfaces
//!
//! ## Quick start
//!
//! Author a two-node script, publish nothing, and drive a preview chat
//! against the in-memory store:
//!
//! ```
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use botflow::dispatch::NullDispatcher;
//! use botflow::executor::StepExecutor;
//! use botflow::graph::GraphData;
//! use botflow::resolver::SessionResolver;
//! use botflow::stores::{BotStore, MemoryStore, ScriptStore};
//! use serde_json::json;
//!
//! let store = Arc::new(MemoryStore::new());
//! let bot = store.create_bot("onboarding", None).await?;
//! let graph: GraphData = serde_json::from_value(json!({
//!     "nodes": [
//!         {"id": "1", "type": "start"},
//!         {"id": "2", "type": "message", "data": {"text": "Welcome!"}}
//!     ],
//!     "edges": [{"source": "1", "target": "2"}]
//! }))?;
//! store.save_draft(bot.id, None, graph).await?;
//!
//! let resolver = SessionResolver::from_store(store.clone());
//! let executor = StepExecutor::from_store(store, Arc::new(NullDispatcher));
//!
//! let session = resolver.start_preview(bot.id).await?;
//! let outcome = executor.process_step(session.id, None).await?;
//!
//! assert_eq!(outcome.transcript[0].text, "Welcome!");
//! assert!(outcome.finished()); // node "2" has no outgoing edge
//! # Ok(())
//! # }
//! ```
//!
//! Webhook surfaces use [`resolver::SessionResolver::resolve`] instead of
//! `start_preview`, wire a [`dispatch::ChannelDispatcher`] over a
//! [`messaging::MessagingClient`], and back everything with
//! [`stores::SqliteStore`].
//!
//! ## Module guide
//!
//! - [`graph`] - graph model, validation, and edge resolution
//! - [`condition`] - condition operator semantics
//! - [`executor`] - the step state machine and answer recording
//! - [`resolver`] - inbound event to session mapping
//! - [`dispatch`] - channel-polymorphic outbound delivery
//! - [`messaging`] - Telegram/WhatsApp senders with credential resolution
//! - [`stores`] - persistence traits, in-memory and SQLite backends
//! - [`script`], [`session`] - domain models
//! - [`config`], [`telemetry`] - environment settings and tracing setup

pub mod condition;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod graph;
pub mod messaging;
pub mod resolver;
pub mod script;
pub mod session;
pub mod stores;
pub mod telemetry;
pub mod types;
