use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use tracing::{info, warn};

use crate::db::StoreError;
use crate::ws::relay::SyncBus;

/// Cross-process bus on top of Redis PUBLISH / SUBSCRIBE
pub struct RedisBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisBus {
    pub fn new(client: redis::Client, conn: MultiplexedConnection, channel: String) -> Self {
        Self {
            client,
            conn,
            channel,
        }
    }
}

#[async_trait]
impl SyncBus for RedisBus {
    async fn publish(&self, payload: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!("Listening for Redis Pub/Sub messages on '{}'", self.channel);

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!("Dropping non-text bus payload: {}", e);
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
