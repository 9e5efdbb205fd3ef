pub mod redis_bus;
pub mod redis_cache;

use redis::aio::MultiplexedConnection;
use tracing::info;

pub use redis_bus::RedisBus;
pub use redis_cache::RedisCache;

use crate::db::StoreError;

/// Open a Redis client and verify it answers before handing it out
pub async fn connect_redis(url: &str) -> Result<(redis::Client, MultiplexedConnection), StoreError> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
    info!("Connected to Redis");
    Ok((client, conn))
}
