//! Redis list transport.
//!
//! Each queue is the list `queue:<name>`. Publishers `LPUSH` a stored record
//! carrying an absolute expiry; consumers `BRPOP` and discard expired records.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use feedpulse_common::error::AppError;
use feedpulse_common::queue::MessageBrokerQueue;

use crate::publisher::Transport;

/// A message as stored in a queue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Epoch milliseconds after which the message is dropped
    pub expires_at_ms: i64,
    pub body: serde_json::Value,
}

impl StoredRecord {
    pub fn new(body: serde_json::Value, expiration: Duration, now_ms: i64) -> Self {
        let ttl_ms = i64::try_from(expiration.as_millis()).unwrap_or(i64::MAX);
        Self {
            expires_at_ms: now_ms.saturating_add(ttl_ms),
            body,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Redis key holding a queue's list.
pub fn queue_key(queue: MessageBrokerQueue) -> String {
    format!("queue:{}", queue.as_str())
}

/// Publishing side of the Redis transport.
#[derive(Clone)]
pub struct RedisTransport {
    redis: ConnectionManager,
}

impl RedisTransport {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(
        &self,
        queue: MessageBrokerQueue,
        body: serde_json::Value,
        expiration: Duration,
    ) -> Result<(), AppError> {
        let record = StoredRecord::new(body, expiration, chrono::Utc::now().timestamp_millis());
        let payload = serde_json::to_string(&record)?;

        // ConnectionManager is a cheap handle over one multiplexed connection
        let mut redis = self.redis.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue_key(queue))
            .arg(payload)
            .query_async(&mut redis)
            .await?;

        Ok(())
    }
}
