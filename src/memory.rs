//! In-process [`NonceStore`] backed by a [`DashMap`].
//!
//! Suitable for tests and for deployments where every caller lives in one process. Each
//! operation runs under the map's shard lock for its key, which makes
//! `set_if_not_exists` and `compare_and_delete` atomic. Expiry is evaluated lazily on
//! access against [`tokio::time::Instant`], so paused test clocks apply.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nonce_types::{NonceStore, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Shared in-memory store. Clones share the same records.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<DashMap<String, Record>>,
    compare_and_delete: bool,
    compare_and_delete_calls: Arc<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            compare_and_delete: true,
            compare_and_delete_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A store that reports compare-and-delete as unsupported, like a backend with
    /// scripting disabled.
    pub fn without_compare_and_delete() -> Self {
        Self {
            compare_and_delete: false,
            ..Self::new()
        }
    }

    /// Number of compare-and-delete attempts, whether supported or not.
    pub fn compare_and_delete_calls(&self) -> usize {
        self.compare_and_delete_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let record = Record {
            value: value.to_string(),
            expires_at: Some(now + ttl),
        };
        let written = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(record);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                true
            }
        };
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let found = self
            .records
            .get(key)
            .map(|record| (record.value.clone(), record.is_expired(now)));
        match found {
            Some((_, true)) => {
                self.records.remove_if(key, |_, record| record.is_expired(now));
                Ok(None)
            }
            Some((value, false)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.compare_and_delete_calls.fetch_add(1, Ordering::Relaxed);
        if !self.compare_and_delete {
            return Err(StoreError::Unsupported("compare-and-delete"));
        }
        let now = Instant::now();
        let removed = self
            .records
            .remove_if(key, |_, record| {
                !record.is_expired(now) && record.value == expected
            })
            .is_some();
        Ok(removed)
    }
}
