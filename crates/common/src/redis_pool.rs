use redis::Client;
use redis::aio::{ConnectionManager, MultiplexedConnection};

/// Open a Redis client without connecting.
pub fn create_client(redis_url: &str) -> anyhow::Result<Client> {
    Ok(Client::open(redis_url)?)
}

/// Reconnecting connection shared by publishers.
pub async fn create_connection_manager(client: &Client) -> anyhow::Result<ConnectionManager> {
    let manager = ConnectionManager::new(client.clone()).await?;
    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// Dedicated connection for a blocking consumer. `BRPOP` stalls the whole
/// connection, so consumers never share one.
pub async fn create_consumer_connection(client: &Client) -> redis::RedisResult<MultiplexedConnection> {
    client.get_multiplexed_async_connection().await
}
