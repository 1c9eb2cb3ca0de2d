//! Channel-polymorphic outbound delivery.
//!
//! The step executor produces [`OutboundMessage`]s; a [`Dispatcher`]
//! decides what "deliver" means for the respondent's channel. The web
//! (preview) channel never reaches a dispatcher (its messages live only
//! in the step transcript), so implementations only see real channels.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::graph::ChoiceOption;
use crate::messaging::MessagingClient;
use crate::session::Respondent;

/// One message produced by a node: text plus, for choice nodes, the
/// selectable options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ChoiceOption>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: None,
        }
    }

    pub fn with_options(text: impl Into<String>, options: Vec<ChoiceOption>) -> Self {
        Self {
            text: text.into(),
            options: Some(options),
        }
    }

    /// Flatten into a single text body for channels without native
    /// choice buttons: options become plain `- label` lines.
    #[must_use]
    pub fn render_plain(&self) -> String {
        match &self.options {
            None => self.text.clone(),
            Some(options) if options.is_empty() => self.text.clone(),
            Some(options) => {
                let mut body = self.text.clone();
                body.push('\n');
                for option in options {
                    body.push_str("\n- ");
                    body.push_str(&option.label);
                }
                body
            }
        }
    }
}

/// Delivery failures. Always logged and swallowed by the executor;
/// message loss is the accepted trade-off over session corruption.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("delivery to {external_id} over {channel} failed")]
    #[diagnostic(code(botflow::dispatch::delivery))]
    Delivery {
        channel: String,
        external_id: String,
    },

    #[error("no delivery route for channel {channel}")]
    #[diagnostic(code(botflow::dispatch::unsupported))]
    Unsupported { channel: String },
}

/// Deliver one message to one respondent on a real channel.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn deliver(
        &self,
        respondent: &Respondent,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError>;
}

/// Production dispatcher: forwards to the messaging collaborator, which
/// owns credential resolution and timeouts.
pub struct ChannelDispatcher {
    messaging: MessagingClient,
}

impl ChannelDispatcher {
    pub fn new(messaging: MessagingClient) -> Self {
        Self { messaging }
    }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
    async fn deliver(
        &self,
        respondent: &Respondent,
        message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        let delivered = self
            .messaging
            .send(
                &respondent.channel,
                &respondent.external_id,
                &message.render_plain(),
            )
            .await;
        if delivered {
            Ok(())
        } else {
            Err(DispatchError::Delivery {
                channel: respondent.channel.encode().to_string(),
                external_id: respondent.external_id.clone(),
            })
        }
    }
}

/// Dispatcher that drops everything. For preview-only deployments and
/// tests where the transcript is the observable output.
#[derive(Debug, Default)]
pub struct NullDispatcher;

#[async_trait]
impl Dispatcher for NullDispatcher {
    async fn deliver(
        &self,
        _respondent: &Respondent,
        _message: &OutboundMessage,
    ) -> Result<(), DispatchError> {
        Ok(())
    }
}
