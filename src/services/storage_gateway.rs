use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::ContentCache;
use crate::db::{ContentStore, StoreError};

/// Cache-aside access to room content. The durable store is authoritative;
/// cache failures are logged and otherwise ignored.
pub struct StorageGateway {
    store: Arc<dyn ContentStore>,
    cache: Arc<dyn ContentCache>,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ContentStore>, cache: Arc<dyn ContentCache>) -> Self {
        Self { store, cache }
    }

    /// Current content of a room. A room that was never written reads as empty.
    ///
    /// A durable hit does not repopulate the cache; the next write does.
    pub async fn read(&self, room_id: &str) -> Result<String, StoreError> {
        match self.cache.get(room_id).await {
            Ok(Some(content)) => {
                debug!("Cache hit for room {}", room_id);
                return Ok(content);
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for room {}: {}", room_id, e),
        }

        let content = self.store.fetch(room_id).await?;
        Ok(content.unwrap_or_default())
    }

    /// Write to the cache (best effort) and then to the durable store
    pub async fn write(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        if let Err(e) = self.cache.set(room_id, content).await {
            warn!("Cache save error for room {}: {}", room_id, e);
        }
        self.store.upsert(room_id, content).await
    }

    /// Delete the durable record and drop the cached copy with it
    pub async fn delete(&self, room_id: &str) -> Result<(), StoreError> {
        let removed = self.store.delete(room_id).await?;
        if let Err(e) = self.cache.invalidate(room_id).await {
            warn!("Cache invalidation failed for room {}: {}", room_id, e);
        }
        debug!("Room {} deleted ({} rows)", room_id, removed);
        Ok(())
    }

    /// Delete every record last updated strictly before `cutoff`
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.store.delete_older_than(cutoff).await
    }

    /// One cleanup pass relative to now
    pub async fn cleanup_sweep(&self, max_age: Duration) -> Result<u64, StoreError> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.purge_older_than(cutoff).await?;
        if removed > 0 {
            info!("Cleanup complete: deleted {} expired clips", removed);
        }
        Ok(removed)
    }

    /// Run `cleanup_sweep` every `interval` until the task is dropped
    pub fn spawn_cleanup_worker(
        self: Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        info!(
            "Cleanup worker started: interval={:?}, maxAge={:?}",
            interval, max_age
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup_sweep(max_age).await {
                    error!("Error during cleanup: {}", e);
                }
            }
        })
    }
}
