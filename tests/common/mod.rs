#![allow(dead_code)]

//! Shared fixtures for the integration suites.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use botflow::dispatch::{DispatchError, Dispatcher, NullDispatcher, OutboundMessage};
use botflow::executor::StepExecutor;
use botflow::graph::GraphData;
use botflow::resolver::SessionResolver;
use botflow::session::Respondent;
use botflow::stores::{BotStore, MemoryStore, ScriptStore};
use botflow::types::BotId;

/// Dispatcher that records every delivery for assertions.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<(String, OutboundMessage)>>,
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn deliver(
        &self,
        respondent: &Respondent,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .push((respondent.external_id.clone(), message.clone()));
        Ok(())
    }
}

/// Dispatcher whose deliveries always fail, for the swallow-and-advance
/// path.
#[derive(Debug, Default)]
pub struct FailingDispatcher;

#[async_trait]
impl Dispatcher for FailingDispatcher {
    async fn deliver(
        &self,
        respondent: &Respondent,
        _message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::Delivery {
            channel: respondent.channel.encode().to_string(),
            external_id: respondent.external_id.clone(),
        })
    }
}

pub fn graph_from(value: Value) -> GraphData {
    serde_json::from_value(value).expect("fixture graph")
}

/// A fresh store holding one bot with `graph` saved and published.
pub async fn published_bot(graph: Value) -> (Arc<MemoryStore>, BotId) {
    let store = Arc::new(MemoryStore::new());
    let bot = store.create_bot("fixture", None).await.unwrap();
    store
        .save_draft(bot.id, None, graph_from(graph))
        .await
        .unwrap();
    store.publish_latest(bot.id).await.unwrap();
    (store, bot.id)
}

/// Resolver + executor over the store, delivering into the void (the
/// transcript is the observable output for web previews).
pub fn engine_over(store: Arc<MemoryStore>) -> (SessionResolver, StepExecutor) {
    (
        SessionResolver::from_store(store.clone()),
        StepExecutor::from_store(store, Arc::new(NullDispatcher)),
    )
}

/// Resolver + executor wired to a recording dispatcher, for real-channel
/// assertions.
pub fn engine_with_recorder(
    store: Arc<MemoryStore>,
) -> (SessionResolver, StepExecutor, Arc<RecordingDispatcher>) {
    let recorder = Arc::new(RecordingDispatcher::default());
    (
        SessionResolver::from_store(store.clone()),
        StepExecutor::from_store(store, recorder.clone()),
        recorder,
    )
}
