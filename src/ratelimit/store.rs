//! Counter store trait for abstracting in-memory and durable backends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::bucket::BucketKey;

/// Errors raised by a counter store during an actual read or write.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store did not answer in time
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store is reachable but refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Usage visible for a bucket at the time of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// Number of consumed units in the bucket
    pub count: u64,
    /// When the bucket's window ends
    pub reset_at: DateTime<Utc>,
}

/// A persisted counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRecord {
    pub key: BucketKey,
    pub count: u64,
    pub reset_at: DateTime<Utc>,
    /// Last write time. Advisory only.
    pub updated_at: DateTime<Utc>,
}

/// Trait for counter store implementations.
///
/// Implementations own every counter record. `consume` must be a single atomic
/// insert-or-increment so concurrent callers for one key never lose updates.
#[async_trait]
pub trait LimitStore: Send + Sync {
    /// Read the usage for a bucket without mutating anything.
    ///
    /// Returns a zero count with `reset_at` when no record exists.
    async fn peek(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<Usage, StoreError>;

    /// Record one unit of usage and return the new count.
    ///
    /// Creates the record with a count of 1 if absent, otherwise increments it
    /// and overwrites its reset time with `reset_at`.
    async fn consume(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<u64, StoreError>;
}
