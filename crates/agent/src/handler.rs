use async_trait::async_trait;
use thiserror::Error;

use alcoguard_core::domain::message::{AgentId, EventType, Message, NewMessage};
use alcoguard_core::domain::payload::{PayloadError, WirePayload};

use crate::broker::BrokerError;

/// Anything that can put a message on the fabric.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: NewMessage) -> Result<Message, BrokerError>;
}

pub struct HandlerContext<'a> {
    pub agent_id: &'a AgentId,
    pub correlation_id: &'a str,
    pub publisher: &'a dyn Publisher,
}

impl HandlerContext<'_> {
    /// Encodes a typed payload and publishes it from this agent.
    pub async fn publish_payload<P>(
        &self,
        payload: P,
        to: Option<&AgentId>,
    ) -> Result<Message, HandlerError>
    where
        P: WirePayload + Send,
    {
        let mut message = NewMessage::new(P::EVENT_TYPE, self.agent_id.clone())
            .with_payload(payload.into_payload()?);
        if let Some(to) = to {
            message = message.to(to.clone());
        }
        self.publisher.publish(message).await.map_err(HandlerError::from)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    Unhandled { message_type: EventType },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    MalformedPayload(#[from] PayloadError),
    #[error("publish failed: {0}")]
    Publish(#[from] BrokerError),
    #[error("handler failure: {0}")]
    Internal(String),
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        message: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError>;
}
