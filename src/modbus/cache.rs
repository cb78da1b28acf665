// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Short-lived register value cache
//!
//! Entries are only returned while they are younger than the TTL. Expired
//! entries behave exactly like missing ones.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use super::register::RegisterValue;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: RegisterValue,
    stored_at: Instant,
}

/// Register name to `(value, timestamp)` map with expiry.
#[derive(Debug)]
pub struct RegisterCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl RegisterCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Time to live of the entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `name` if it has not expired.
    pub fn get(&self, name: &str) -> Option<RegisterValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(name)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` for `name`, timestamped now.
    pub fn set(&self, name: &str, value: RegisterValue) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            name.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Store a batch of values under a single timestamp.
    pub fn set_many(&self, values: &HashMap<String, RegisterValue>) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for (name, value) in values {
            entries.insert(
                name.clone(),
                CacheEntry {
                    value: value.clone(),
                    stored_at: now,
                },
            );
        }
    }

    /// Return a snapshot of all `names` if every one of them is cached and live.
    pub fn snapshot<'a, I>(&self, names: I) -> Option<HashMap<String, RegisterValue>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = HashMap::new();
        for name in names {
            let entry = entries.get(name)?;
            if entry.stored_at.elapsed() >= self.ttl {
                return None;
            }
            snapshot.insert(name.to_string(), entry.value.clone());
        }
        Some(snapshot)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = RegisterCache::new(Duration::from_millis(500));
        cache.set("dome_open", RegisterValue::Bool(true));
        assert_eq!(cache.get("dome_open"), Some(RegisterValue::Bool(true)));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(cache.get("dome_open").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("dome_open"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_requires_all_entries_live() {
        let cache = RegisterCache::new(Duration::from_secs(1));
        cache.set("a", RegisterValue::Int(1));
        assert!(cache.snapshot(["a", "b"]).is_none());

        cache.set("b", RegisterValue::Int(2));
        let snapshot = cache.snapshot(["a", "b"]).unwrap();
        assert_eq!(snapshot.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.snapshot(["a", "b"]).is_none());
    }
}
