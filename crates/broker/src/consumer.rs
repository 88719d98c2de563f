//! Consumer loop for the Redis list transport.
//!
//! One task per queue, each on its own connection since `BRPOP` blocks the
//! connection it runs on. Popped messages are handled concurrently, bounded by
//! a per-queue semaphore. Delivery is at-most-once: a message whose handler
//! fails is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use redis::Client;
use redis::aio::MultiplexedConnection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use feedpulse_common::error::AppError;
use feedpulse_common::queue::MessageBrokerQueue;
use feedpulse_common::redis_pool::create_consumer_connection;

use crate::redis_transport::{StoredRecord, queue_key};

/// Seconds a single `BRPOP` blocks before the loop re-checks for shutdown.
const BLOCK_TIMEOUT_SECS: u64 = 5;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Messages handled at once per queue unless overridden.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Handles the body of one inbound message.
pub type MessageHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Spawns consumer tasks over a shared Redis client.
#[derive(Clone)]
pub struct QueueConsumer {
    client: Client,
    concurrency: usize,
}

impl QueueConsumer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Start consuming `queue` until `shutdown` flips to `true`.
    pub fn spawn(
        &self,
        queue: MessageBrokerQueue,
        handler: MessageHandler,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        tokio::spawn(run_consumer(client, queue, handler, permits, shutdown))
    }
}

async fn run_consumer(
    client: Client,
    queue: MessageBrokerQueue,
    handler: MessageHandler,
    permits: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let key = queue_key(queue);
    let mut connection: Option<MultiplexedConnection> = None;
    let mut in_flight = JoinSet::new();

    tracing::info!(queue = %queue, "Queue consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        while let Some(result) = in_flight.try_join_next() {
            log_join_error(queue, result);
        }

        if connection.is_none() {
            match create_consumer_connection(&client).await {
                Ok(conn) => connection = Some(conn),
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "Redis connection failed, retrying");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    }
                }
            }
        }
        let Some(conn) = connection.as_mut() else {
            continue;
        };

        // A popped message always has a permit.
        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let mut brpop = redis::cmd("BRPOP");
        brpop.arg(&key).arg(BLOCK_TIMEOUT_SECS);

        let popped: redis::RedisResult<Option<(String, String)>> = tokio::select! {
            _ = shutdown.changed() => break,
            result = brpop.query_async(conn) => result,
        };

        match popped {
            Ok(Some((_, raw))) => {
                spawn_delivery(&mut in_flight, permit, queue, raw, Arc::clone(&handler));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "BRPOP failed, reconnecting");
                connection = None;
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    while let Some(result) = in_flight.join_next().await {
        log_join_error(queue, result);
    }

    tracing::info!(queue = %queue, "Queue consumer stopped");
}

/// Handle one popped message on its own task, releasing `permit` when done.
fn spawn_delivery(
    in_flight: &mut JoinSet<()>,
    permit: OwnedSemaphorePermit,
    queue: MessageBrokerQueue,
    raw: String,
    handler: MessageHandler,
) {
    in_flight.spawn(async move {
        deliver(queue, &raw, &handler, chrono::Utc::now().timestamp_millis()).await;
        drop(permit);
    });
}

fn log_join_error(queue: MessageBrokerQueue, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(queue = %queue, error = %e, "Message handler task panicked");
    }
}

/// Decode one stored record and hand its body to the handler.
async fn deliver(queue: MessageBrokerQueue, raw: &str, handler: &MessageHandler, now_ms: i64) {
    let record: StoredRecord = match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(queue = %queue, error = %e, "Dropping malformed message");
            return;
        }
    };

    if record.is_expired(now_ms) {
        tracing::debug!(
            queue = %queue,
            expires_at_ms = record.expires_at_ms,
            "Dropping expired message"
        );
        return;
    }

    if let Err(e) = handler(record.body).await {
        if e.is_domain() {
            tracing::warn!(queue = %queue, error = %e, "Message rejected by handler");
        } else {
            tracing::error!(queue = %queue, error = %e, "Message handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>, fail: bool) -> MessageHandler {
        Arc::new(move |_body| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(AppError::Internal("boom".into()))
                } else {
                    Ok(())
                }
            })
        })
    }

    fn record(expires_at_ms: i64) -> String {
        serde_json::to_string(&StoredRecord {
            expires_at_ms,
            body: serde_json::json!({ "data": {} }),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_deliveries_run_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let handler: MessageHandler = Arc::new(move |_body| {
            let barrier = barrier.clone();
            Box::pin(async move {
                barrier.wait().await;
                Ok(())
            })
        });
        let permits = Arc::new(Semaphore::new(2));
        let mut in_flight = JoinSet::new();

        for _ in 0..2 {
            let permit = Arc::clone(&permits).acquire_owned().await.unwrap();
            spawn_delivery(
                &mut in_flight,
                permit,
                MessageBrokerQueue::UrlFetchCompleted,
                record(i64::MAX),
                handler.clone(),
            );
        }

        // Each handler waits for the other, so this only finishes if both run at once.
        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(result) = in_flight.join_next().await {
                result.unwrap();
            }
        })
        .await
        .expect("handlers did not run concurrently");
        assert_eq!(permits.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_live_message_is_delivered() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(counter.clone(), false);

        deliver(MessageBrokerQueue::UrlFailing, &record(2_000), &handler, 1_000).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_message_is_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(counter.clone(), false);

        deliver(MessageBrokerQueue::UrlFailing, &record(1_000), &handler, 1_000).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(counter.clone(), false);

        deliver(MessageBrokerQueue::UrlFailing, "not json", &handler, 1_000).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_panic() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(counter.clone(), true);

        deliver(MessageBrokerQueue::UrlFailing, &record(5_000), &handler, 1_000).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
