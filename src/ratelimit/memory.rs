//! In-process counter store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::bucket::BucketKey;
use super::clock::{Clock, SystemClock};
use super::store::{CounterRecord, LimitStore, StoreError, Usage};

/// A counter store held in process memory.
///
/// Increments go through the map's entry API, which holds the shard lock for
/// the key while the record is created or bumped. Counts are lost on restart
/// and are not shared between instances.
///
/// Records whose window has ended are dropped once the clock passes the
/// earliest known reset time, so the map only holds live windows.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<BucketKey, CounterRecord>,
    clock: Arc<dyn Clock>,
    next_expiry: Mutex<Option<DateTime<Utc>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that expires records against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            next_expiry: Mutex::new(None),
        }
    }

    /// Get a copy of the record for a key, if any.
    pub fn record(&self, key: &BucketKey) -> Option<CounterRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Get the number of records held.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
        *self.next_expiry.lock() = None;
    }

    /// Drop every record whose reset time is at or before `now`.
    ///
    /// Returns the number of records removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        let mut earliest: Option<DateTime<Utc>> = None;

        self.records.retain(|_, record| {
            let live = record.reset_at > now;
            if live && earliest.map_or(true, |t| record.reset_at < t) {
                earliest = Some(record.reset_at);
            }
            live
        });
        *self.next_expiry.lock() = earliest;

        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Pruned expired counters");
        }
        removed
    }

    fn note_expiry(&self, reset_at: DateTime<Utc>) {
        let mut next = self.next_expiry.lock();
        if next.map_or(true, |t| reset_at < t) {
            *next = Some(reset_at);
        }
    }

    fn prune_if_due(&self, now: DateTime<Utc>) {
        // The lock is released before `retain` takes the shard locks
        let due = matches!(*self.next_expiry.lock(), Some(t) if t <= now);
        if due {
            self.prune_expired(now);
        }
    }
}

#[async_trait]
impl LimitStore for MemoryStore {
    async fn peek(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<Usage, StoreError> {
        let usage = self
            .records
            .get(key)
            .map(|r| Usage {
                count: r.count,
                reset_at: r.reset_at,
            })
            .unwrap_or(Usage { count: 0, reset_at });

        trace!(key = %key, count = usage.count, "Peeked counter");
        Ok(usage)
    }

    async fn consume(&self, key: &BucketKey, reset_at: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = self.clock.now();
        self.prune_if_due(now);

        let count = {
            let mut record = self.records.entry(key.clone()).or_insert_with(|| {
                debug!(key = %key, "Creating new counter");
                CounterRecord {
                    key: key.clone(),
                    count: 0,
                    reset_at,
                    updated_at: now,
                }
            });

            record.count += 1;
            record.reset_at = reset_at;
            record.updated_at = now;
            record.count
        };
        self.note_expiry(reset_at);

        trace!(key = %key, count, "Consumed counter");
        Ok(count)
    }
}
