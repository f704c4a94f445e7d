//! Response-stream handler that pushes messages to live connections.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::{ProcessingError, PushError};
use crate::queue::{Envelope, PushKey, ResponseMessage, ResponseTopic};
use crate::scheduler::MessageHandler;

/// Keyed unicast to a client connection.
///
/// `Ok(false)` means no live connection exists for the key. Implementations
/// must not block indefinitely.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send(&self, key: &PushKey, message: &str) -> Result<bool, PushError>;
}

/// Decodes response envelopes and pushes their client body.
pub struct ResponseDispatcher {
    channel: Arc<dyn PushChannel>,
}

impl ResponseDispatcher {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self { channel }
    }

    /// Pushes one message; returns whether a live connection received it.
    pub async fn deliver(&self, message: &ResponseMessage) -> Result<bool, ProcessingError> {
        let key = message.push_key();
        let body = serde_json::to_string(&message.client_body(Utc::now())).map_err(PushError::from)?;
        let delivered = self.channel.send(&key, &body).await?;
        if !delivered {
            debug!(key = %key, topic = %message.topic(), "No live connection, message discarded");
        }
        Ok(delivered)
    }
}

#[async_trait]
impl MessageHandler for ResponseDispatcher {
    async fn handle(&self, envelope: &Envelope) -> Result<(), ProcessingError> {
        let topic = ResponseTopic::parse(&envelope.topic)
            .ok_or_else(|| ProcessingError::UnknownTopic(envelope.topic.clone()))?;
        let message = ResponseMessage::decode(topic, &envelope.payload)?;
        self.deliver(&message).await?;
        Ok(())
    }
}
