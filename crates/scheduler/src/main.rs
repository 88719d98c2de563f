use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use feedpulse_broker::{BrokerPublisher, RedisTransport};
use feedpulse_common::config::AppConfig;
use feedpulse_common::{db, redis_pool};
use feedpulse_engine::{CredentialCipher, RequestLookupResolver, ScheduleHandler, ScheduleSettings};
use feedpulse_notifier::{BackendApiClient, BackendApiConfig};
use feedpulse_scheduler::SchedulerRunner;
use feedpulse_store::PgFeedRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "feedpulse_scheduler=info,feedpulse_engine=info,feedpulse_broker=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("FeedPulse scheduler starting...");

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

    let settings = ScheduleSettings {
        default_refresh_rate_seconds: config.default_refresh_rate_seconds,
        default_max_daily_articles: config.default_max_daily_articles,
        extra_refresh_rates_seconds: config.extra_refresh_rates_seconds.clone(),
    };
    let initial_rates: BTreeSet<u32> = std::iter::once(settings.default_refresh_rate_seconds)
        .chain(settings.extra_refresh_rates_seconds.iter().copied())
        .collect();

    let handler = ScheduleHandler::new(
        Arc::new(PgFeedRepository::new(pool)),
        backend.clone(),
        backend.clone(),
        backend,
        publisher,
        RequestLookupResolver::new(cipher),
        settings,
    );

    let mut runner = SchedulerRunner::new(
        Arc::new(handler),
        initial_rates,
        Duration::from_secs(config.maintenance_interval_minutes * 60),
    );

    tokio::select! {
        _ = runner.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("FeedPulse scheduler stopped.");
    Ok(())
}
