use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ContentStore, StoreError};

#[derive(Clone, Debug)]
struct ClipRow {
    content: String,
    updated_at: DateTime<Utc>,
}

/// Process-local stand-in for the `clips` table
#[derive(Default)]
pub struct MemoryClipStore {
    rows: RwLock<HashMap<String, ClipRow>>,
}

impl MemoryClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn insert_at(&self, room_id: &str, content: &str, updated_at: DateTime<Utc>) {
        self.rows.write().await.insert(
            room_id.to_string(),
            ClipRow {
                content: content.to_string(),
                updated_at,
            },
        );
    }
}

#[async_trait]
impl ContentStore for MemoryClipStore {
    async fn fetch(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.rows.read().await.get(room_id).map(|row| row.content.clone()))
    }

    async fn upsert(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        rows.entry(room_id.to_string())
            .and_modify(|row| {
                row.content = content.to_string();
                row.updated_at = now;
            })
            .or_insert_with(|| ClipRow {
                content: content.to_string(),
                updated_at: now,
            });
        Ok(())
    }

    async fn delete(&self, room_id: &str) -> Result<u64, StoreError> {
        Ok(self.rows.write().await.remove(room_id).map_or(0, |_| 1))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.updated_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}
