//! Durable room storage.
//!
//! The durable store is the system of record. `clips` talks to Postgres,
//! `memory` keeps rows in process for standalone runs and tests.

pub mod clips;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use clips::PgClipStore;
pub use memory::MemoryClipStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("could not reach the database after {attempts} attempts")]
    ConnectFailed { attempts: u32 },
}

/// Keyed store holding the content of every room
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Content of a room, `None` when the room has no record
    async fn fetch(&self, room_id: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace the content of a room, refreshing its update timestamp
    async fn upsert(&self, room_id: &str, content: &str) -> Result<(), StoreError>;

    /// Remove a room's record. Returns the number of rows removed.
    async fn delete(&self, room_id: &str) -> Result<u64, StoreError>;

    /// Remove every record updated strictly before `cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
