use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;
use tracing::info;

use crate::db::StoreError;

/// Cache key for a room
pub fn cache_key(room_id: &str) -> String {
    format!("room:{}", room_id)
}

/// TTL cache in front of the durable store. Entries expire on their own;
/// every `set` refreshes the TTL.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, room_id: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, room_id: &str, content: &str) -> Result<(), StoreError>;

    async fn invalidate(&self, room_id: &str) -> Result<(), StoreError>;
}

/// In-process cache. Only coherent when a single process serves all rooms.
pub struct MokaCache {
    inner: Cache<String, String>,
}

impl MokaCache {
    pub fn new(ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        info!("Room content cache initialized (ttl {:?})", ttl);
        Self { inner }
    }
}

#[async_trait]
impl ContentCache for MokaCache {
    async fn get(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.get(&cache_key(room_id)).await)
    }

    async fn set(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        self.inner.insert(cache_key(room_id), content.to_string()).await;
        Ok(())
    }

    async fn invalidate(&self, room_id: &str) -> Result<(), StoreError> {
        self.inner.invalidate(&cache_key(room_id)).await;
        Ok(())
    }
}
