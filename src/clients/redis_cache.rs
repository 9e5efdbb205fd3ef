use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::cache::{cache_key, ContentCache};
use crate::db::StoreError;

/// Cache shared by every process through Redis
pub struct RedisCache {
    conn: MultiplexedConnection,
    ttl_secs: u64,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection, ttl: Duration) -> Self {
        Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
        }
    }
}

#[async_trait]
impl ContentCache for RedisCache {
    async fn get(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(cache_key(room_id))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(cache_key(room_id))
            .arg(content)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, room_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(cache_key(room_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
