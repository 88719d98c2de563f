//! Publish helper over a pluggable transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use feedpulse_common::error::AppError;
use feedpulse_common::queue::MessageBrokerQueue;

use crate::envelope::{DELIVERY_MESSAGE_SOURCE, Envelope, MESSAGE_SOURCE, UrlFetchItem};

/// Expiration of delivery instructions.
pub const DELIVER_ARTICLES_EXPIRATION: Duration = Duration::from_secs(10 * 60);

/// Publish/consume primitive. Every message carries an explicit time to live;
/// consumers drop it once expired.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        queue: MessageBrokerQueue,
        body: serde_json::Value,
        expiration: Duration,
    ) -> Result<(), AppError>;
}

/// Named publish operations used by the scheduler and the events service.
#[derive(Clone)]
pub struct BrokerPublisher {
    transport: Arc<dyn Transport>,
}

impl BrokerPublisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Publish one fetch batch, expiring after one refresh interval.
    pub async fn publish_url_fetch_batch(
        &self,
        rate_seconds: u32,
        items: Vec<UrlFetchItem>,
    ) -> Result<(), AppError> {
        let count = items.len();
        let envelope = Envelope::new(items, MESSAGE_SOURCE).with_rate_seconds(rate_seconds);

        self.transport
            .publish(
                MessageBrokerQueue::UrlFetchBatch,
                serde_json::to_value(&envelope)?,
                Duration::from_millis(u64::from(rate_seconds) * 1000),
            )
            .await?;

        tracing::debug!(rate_seconds, count, "Published url fetch batch");
        Ok(())
    }

    /// Publish the delivery instruction of a single feed.
    pub async fn publish_deliver_feed_articles<T>(&self, payload: &T, debug: bool) -> Result<(), AppError>
    where
        T: Serialize + Sync,
    {
        let envelope = Envelope::new(payload, DELIVERY_MESSAGE_SOURCE).with_debug(debug);

        self.transport
            .publish(
                MessageBrokerQueue::FeedDeliverArticles,
                serde_json::to_value(&envelope)?,
                DELIVER_ARTICLES_EXPIRATION,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_fetch_batch_expires_after_one_interval() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .withf(|queue, body, expiration| {
                *queue == MessageBrokerQueue::UrlFetchBatch
                    && body["rateSeconds"] == 600
                    && body["data"].as_array().map(Vec::len) == Some(2)
                    && *expiration == Duration::from_millis(600_000)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let publisher = BrokerPublisher::new(Arc::new(transport));
        publisher
            .publish_url_fetch_batch(
                600,
                vec![
                    UrlFetchItem::for_url("https://a.com", false),
                    UrlFetchItem::for_url("https://b.com", false),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deliver_articles_uses_ten_minute_expiration() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .with(
                eq(MessageBrokerQueue::FeedDeliverArticles),
                mockall::predicate::function(|body: &serde_json::Value| {
                    body["debug"] == true && body["data"]["articleDayLimit"] == 5
                }),
                eq(DELIVER_ARTICLES_EXPIRATION),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let publisher = BrokerPublisher::new(Arc::new(transport));
        publisher
            .publish_deliver_feed_articles(&serde_json::json!({ "articleDayLimit": 5 }), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_errors_surface() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .returning(|_, _, _| Err(AppError::Internal("down".into())));

        let publisher = BrokerPublisher::new(Arc::new(transport));
        let result = publisher.publish_url_fetch_batch(60, vec![]).await;
        assert!(result.is_err());
    }
}
