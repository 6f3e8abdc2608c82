//! PostgreSQL-backed counter store.
//!
//! One row per bucket in `rate_limits`, keyed by `(ip, bucket)`. The atomic
//! insert-or-increment is a single `INSERT ... ON CONFLICT DO UPDATE`, so
//! concurrent increments for one key are serialized by the database rather
//! than by this process.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use super::bucket::BucketKey;
use super::store::{LimitStore, StoreError, Usage};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_limits (
        ip TEXT NOT NULL,
        bucket TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        reset_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (ip, bucket)
    )
"#;

/// Postgres error codes a racing `CREATE TABLE IF NOT EXISTS` can report even
/// though the table ends up existing.
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed counter store.
#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
    timeout: Duration,
    schema: OnceCell<()>,
}

impl PostgresStore {
    /// Wrap an existing pool. Every operation is bounded by `timeout`.
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            schema: OnceCell::new(),
        }
    }

    /// Build a lazily connecting pool for `database_url`.
    ///
    /// No connection is opened until the first store operation, so an
    /// unreachable database surfaces as a store failure on that operation.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect_lazy(database_url)?;

        info!(max_connections, timeout_ms = timeout.as_millis() as u64, "Postgres pool configured");
        Ok(Self::new(pool, timeout))
    }

    /// Create the counter table if it does not exist.
    ///
    /// Safe to call concurrently from any number of tasks or processes.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema
            .get_or_try_init(|| async {
                match self.bounded(sqlx::query(CREATE_TABLE).execute(&self.pool)).await {
                    Ok(_) => {
                        debug!("Counter table ready");
                        Ok(())
                    }
                    Err(StoreError::Database(e)) if is_already_exists(&e) => {
                        debug!(error = %e, "Counter table created concurrently");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to create counter table");
                        Err(e)
                    }
                }
            })
            .await
            .map(|_| ())
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl LimitStore for PostgresStore {
    async fn peek(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<Usage, StoreError> {
        self.ensure_schema().await?;

        let row = self
            .bounded(
                sqlx::query_as::<_, (i32, DateTime<Utc>)>(
                    r#"
                    SELECT count, reset_at
                    FROM rate_limits
                    WHERE ip = $1 AND bucket = $2
                    "#,
                )
                .bind(&key.identity)
                .bind(key.bucket())
                .fetch_optional(&self.pool),
            )
            .await?;

        let usage = match row {
            Some((count, stored_reset_at)) => Usage {
                count: stored_count(count, key)?,
                reset_at: stored_reset_at,
            },
            None => Usage { count: 0, reset_at },
        };

        trace!(key = %key, count = usage.count, "Peeked counter");
        Ok(usage)
    }

    async fn consume(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.ensure_schema().await?;

        let (count,) = self
            .bounded(
                sqlx::query_as::<_, (i32,)>(
                    r#"
                    INSERT INTO rate_limits (ip, bucket, count, reset_at)
                    VALUES ($1, $2, 1, $3)
                    ON CONFLICT (ip, bucket)
                    DO UPDATE SET count = rate_limits.count + 1,
                                  reset_at = EXCLUDED.reset_at,
                                  updated_at = NOW()
                    RETURNING count
                    "#,
                )
                .bind(&key.identity)
                .bind(key.bucket())
                .bind(reset_at)
                .fetch_one(&self.pool),
            )
            .await?;

        let count = stored_count(count, key)?;

        trace!(key = %key, count, "Consumed counter");
        Ok(count)
    }
}

/// Counts are never negative unless the table was edited by hand.
fn stored_count(count: i32, key: &BucketKey) -> Result<u64, StoreError> {
    u64::try_from(count)
        .map_err(|_| StoreError::Unavailable(format!("negative count {} for {}", count, key)))
}

fn is_already_exists(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(DUPLICATE_TABLE) | Some(UNIQUE_VIOLATION)
        ),
        _ => false,
    }
}
