//! Expiring key-value store used for rate-limit counters.
//!
//! Semantics follow the usual counter-store contract: `incr` on a missing
//! key creates it with value 1 and no expiry, `incr` never touches an
//! existing expiry, and expired keys read as absent.

use crate::clock::Clock;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> FaucetResult<Option<String>>;

    /// Overwrite `key` with an expiry of `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<()>;

    /// Write only when no live value exists; returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<bool>;

    /// Atomically add one and return the new value.
    async fn incr(&self, key: &str) -> FaucetResult<i64>;

    /// Atomically subtract one and return the new value.
    async fn decr(&self, key: &str) -> FaucetResult<i64>;

    /// Remove `key`; returns whether a live value was removed.
    async fn delete(&self, key: &str) -> FaucetResult<bool>;

    /// Set the expiry of an existing key; false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> FaucetResult<bool>;

    /// Remaining lifetime; `None` when absent or without expiry.
    async fn ttl(&self, key: &str) -> FaucetResult<Option<Duration>>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> FaucetResult<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.and_then(|at| (at - now).to_std().ok())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> FaucetResult<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| FaucetError::StoreError(format!("TTL out of range: {}", e)))?;
    Ok(now + ttl)
}

/// Apply `delta` to a (possibly absent) counter entry.
fn add_to(entry: Option<Entry>, key: &str, delta: i64, now: DateTime<Utc>) -> FaucetResult<(Entry, i64)> {
    match entry.filter(|e| e.is_live(now)) {
        Some(entry) => {
            let current: i64 = entry.value.parse().map_err(|_| {
                FaucetError::StoreError(format!("value at '{}' is not an integer", key))
            })?;
            let next = current
                .checked_add(delta)
                .ok_or_else(|| FaucetError::StoreError(format!("counter '{}' overflow", key)))?;
            Ok((
                Entry {
                    value: next.to_string(),
                    expires_at: entry.expires_at,
                },
                next,
            ))
        }
        None => Ok((
            Entry {
                value: delta.to_string(),
                expires_at: None,
            },
            delta,
        )),
    }
}

/// Process-local store. Counters reset on restart.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    async fn add(&self, key: &str, delta: i64) -> FaucetResult<i64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let (entry, value) = add_to(entries.remove(key), key, delta, now)?;
        entries.insert(key.to_string(), entry);
        Ok(value)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> FaucetResult<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<()> {
        let expires_at = expiry(self.clock.now(), ttl)?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<bool> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.entries.lock().await;
        if entries.get(key).map_or(false, |e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> FaucetResult<i64> {
        self.add(key, 1).await
    }

    async fn decr(&self, key: &str) -> FaucetResult<i64> {
        self.add(key, -1).await
    }

    async fn delete(&self, key: &str) -> FaucetResult<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).map_or(false, |e| e.is_live(now)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FaucetResult<bool> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> FaucetResult<Option<Duration>> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.remaining(now)))
    }

    async fn purge_expired(&self) -> FaucetResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

/// Store persisted in a sled tree so counters survive restarts. Expiry is
/// evaluated on read; `purge_expired` reclaims space.
pub struct SledStore {
    tree: Tree,
    clock: Arc<dyn Clock>,
}

impl SledStore {
    pub fn new(db: &sled::Db, clock: Arc<dyn Clock>) -> FaucetResult<Self> {
        let tree = db.open_tree("rate_limits")?;
        Ok(Self { tree, clock })
    }

    fn read(&self, key: &str) -> FaucetResult<Option<Entry>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write retried until no concurrent writer interferes.
    fn update<T, F>(&self, key: &str, mut apply: F) -> FaucetResult<T>
    where
        F: FnMut(Option<Entry>) -> FaucetResult<(Option<Entry>, T)>,
    {
        loop {
            let current = self.tree.get(key.as_bytes())?;
            let decoded = match &current {
                Some(bytes) => Some(bincode::deserialize::<Entry>(bytes)?),
                None => None,
            };

            let (next, result) = apply(decoded)?;
            let encoded = match &next {
                Some(entry) => Some(bincode::serialize(entry)?),
                None => None,
            };

            match self.tree.compare_and_swap(key.as_bytes(), current, encoded)? {
                Ok(()) => return Ok(result),
                Err(_) => debug!("Concurrent update on '{}', retrying", key),
            }
        }
    }

    fn add(&self, key: &str, delta: i64) -> FaucetResult<i64> {
        let now = self.clock.now();
        self.update(key, |entry| {
            let (entry, value) = add_to(entry, key, delta, now)?;
            Ok((Some(entry), value))
        })
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> FaucetResult<Option<String>> {
        let now = self.clock.now();
        Ok(self.read(key)?.filter(|e| e.is_live(now)).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Some(expiry(self.clock.now(), ttl)?),
        };
        self.tree.insert(key.as_bytes(), bincode::serialize(&entry)?)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FaucetResult<bool> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        self.update(key, |entry| match entry {
            Some(entry) if entry.is_live(now) => Ok((Some(entry), false)),
            _ => Ok((
                Some(Entry {
                    value: value.to_string(),
                    expires_at: Some(expires_at),
                }),
                true,
            )),
        })
    }

    async fn incr(&self, key: &str) -> FaucetResult<i64> {
        self.add(key, 1)
    }

    async fn decr(&self, key: &str) -> FaucetResult<i64> {
        self.add(key, -1)
    }

    async fn delete(&self, key: &str) -> FaucetResult<bool> {
        let now = self.clock.now();
        match self.tree.remove(key.as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize::<Entry>(&bytes)?.is_live(now)),
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FaucetResult<bool> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        self.update(key, |entry| match entry {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(expires_at);
                Ok((Some(entry), true))
            }
            other => Ok((other, false)),
        })
    }

    async fn ttl(&self, key: &str) -> FaucetResult<Option<Duration>> {
        let now = self.clock.now();
        Ok(self
            .read(key)?
            .filter(|e| e.is_live(now))
            .and_then(|e| e.remaining(now)))
    }

    async fn purge_expired(&self) -> FaucetResult<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for item in self.tree.iter() {
            let (key, value) = item?;
            let entry: Entry = bincode::deserialize(&value)?;
            if !entry.is_live(now) {
                // Only remove if nobody rewrote it meanwhile
                if self.tree.compare_and_swap(&key, Some(&value), None as Option<&[u8]>)?.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
