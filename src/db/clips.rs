use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{ContentStore, StoreError};

const SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS clips (
        room_id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
"#;

const INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_clips_updated_at ON clips(updated_at);";

/// Room content backed by a Postgres `clips` table
pub struct PgClipStore {
    pool: PgPool,
}

impl PgClipStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    /// * `Result<Self, sqlx::Error>` - Store or error
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Connect with a fixed number of attempts and provision the schema
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `attempts` - How many times to try before giving up
    /// * `delay` - Pause between attempts
    pub async fn connect_with_retry(
        database_url: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, StoreError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match Self::new(database_url).await {
                Ok(store) => {
                    store.init_schema().await?;
                    return Ok(store);
                }
                Err(e) => {
                    warn!(
                        "Waiting for Postgres... (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        error!("Giving up on Postgres after {} attempts", attempts);
        Err(StoreError::ConnectFailed { attempts })
    }

    /// Create the `clips` table and its cleanup index when missing
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        sqlx::query(INDEX_SQL).execute(&self.pool).await?;
        info!("Database schema ready");
        Ok(())
    }

    fn log_pool_state(&self, what: &str, room_id: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} room {}. Pool connections: {} idle, {} in use",
            what,
            room_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

#[async_trait]
impl ContentStore for PgClipStore {
    async fn fetch(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        self.log_pool_state("Loading", room_id);

        let row = sqlx::query("SELECT content FROM clips WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let content: String = row.try_get("content")?;
                debug!("Room {} loaded from Postgres ({} bytes)", room_id, content.len());
                Ok(Some(content))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, room_id: &str, content: &str) -> Result<(), StoreError> {
        self.log_pool_state("Saving", room_id);

        let query_sql = r#"
            INSERT INTO clips (room_id, content, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (room_id)
            DO UPDATE SET content = EXCLUDED.content, updated_at = NOW();
        "#;
        sqlx::query(query_sql)
            .bind(room_id)
            .bind(content)
            .execute(&self.pool)
            .await?;

        info!("Room [{}] saved successfully", room_id);
        Ok(())
    }

    async fn delete(&self, room_id: &str) -> Result<u64, StoreError> {
        self.log_pool_state("Deleting", room_id);

        let result = sqlx::query("DELETE FROM clips WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await?;

        info!("Room [{}] deleted from Postgres", room_id);
        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM clips WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
