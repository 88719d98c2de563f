use std::sync::Arc;

use tokio::sync::watch;

use feedpulse_broker::{BrokerPublisher, MessageHandler, QueueConsumer, RedisTransport};
use feedpulse_common::config::AppConfig;
use feedpulse_common::queue::MessageBrokerQueue;
use feedpulse_common::{db, redis_pool};
use feedpulse_engine::{CredentialCipher, MessageBrokerEventsService, RequestLookupResolver};
use feedpulse_notifier::{BackendApiClient, BackendApiConfig};
use feedpulse_store::PgFeedRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "feedpulse_worker=info,feedpulse_engine=info,feedpulse_broker=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("FeedPulse worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let redis = redis_pool::create_client(&config.redis_url)?;
    let redis_manager = redis_pool::create_connection_manager(&redis).await?;
    let publisher = BrokerPublisher::new(Arc::new(RedisTransport::new(redis_manager)));

    let backend = Arc::new(BackendApiClient::new(BackendApiConfig::from(&config))?);
    let cipher = config
        .encryption_key_hex
        .as_deref()
        .map(CredentialCipher::from_hex_key)
        .transpose()?;

    let service = Arc::new(MessageBrokerEventsService::new(
        Arc::new(PgFeedRepository::new(pool)),
        backend.clone(),
        backend,
        publisher,
        RequestLookupResolver::new(cipher),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = QueueConsumer::new(redis);

    let consumers: Vec<_> = MessageBrokerQueue::INBOUND
        .into_iter()
        .map(|queue| consumer.spawn(queue, route_to(&service, queue), shutdown_rx.clone()))
        .collect();

    tracing::info!(queues = consumers.len(), "Consuming inbound queues");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    let _ = shutdown_tx.send(true);
    for result in futures::future::join_all(consumers).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Queue consumer task failed");
        }
    }

    tracing::info!("FeedPulse worker stopped.");
    Ok(())
}

fn route_to(service: &Arc<MessageBrokerEventsService>, queue: MessageBrokerQueue) -> MessageHandler {
    let service = Arc::clone(service);
    Arc::new(move |body| {
        let service = Arc::clone(&service);
        Box::pin(async move { service.handle_queue_message(queue, body).await })
    })
}
