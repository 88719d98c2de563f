use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use feedpulse_common::error::AppError;
use feedpulse_common::queue::MessageBrokerQueue;

use crate::publisher::Transport;

/// A message captured by [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub queue: MessageBrokerQueue,
    pub body: serde_json::Value,
    pub expiration: Duration,
}

/// Transport that keeps published messages in memory, in publish order.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn messages_for(&self, queue: MessageBrokerQueue) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|message| message.queue == queue)
            .collect()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        queue: MessageBrokerQueue,
        body: serde_json::Value,
        expiration: Duration,
    ) -> Result<(), AppError> {
        self.messages
            .lock()
            .map_err(|_| AppError::Internal("in-memory transport lock poisoned".into()))?
            .push(PublishedMessage {
                queue,
                body,
                expiration,
            });
        Ok(())
    }
}
