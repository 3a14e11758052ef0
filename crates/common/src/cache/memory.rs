//! In-memory cache backend
//!
//! Used in tests and single-node development; implements the same
//! capability set as the Redis backend, including TTL expiry, glob pattern
//! delete, and sliding-window counters.

use super::{CacheStore, WindowSample};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory `CacheStore`
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn glob_match(pattern: &str, key: &str) -> bool {
        // Supports '*' wildcards only, which is all the namespaces use
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 1 {
            return pattern == key;
        }
        let mut rest = key;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            if i == 0 {
                match rest.strip_prefix(part) {
                    Some(r) => rest = r,
                    None => return false,
                }
            } else if i == parts.len() - 1 && !pattern.ends_with('*') {
                return rest.ends_with(part);
            } else {
                match rest.find(part) {
                    Some(pos) => rest = &rest[pos + part.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.expires_at > now)
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str, budget: usize) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let matching: Vec<String> = entries
            .keys()
            .take(budget)
            .filter(|key| Self::glob_match(pattern, key))
            .cloned()
            .collect();
        let deleted = matching.len();
        for key in matching {
            entries.remove(&key);
        }
        Ok(deleted)
    }

    async fn window_trim_and_append(
        &self,
        key: &str,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowSample> {
        let mut windows = self.windows.lock().await;
        let entries = windows.entry(key.to_string()).or_default();
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        entries.retain(|&ts| ts > cutoff);
        entries.push(now_ms);
        Ok(WindowSample {
            count: entries.len() as u64,
            oldest_ms: entries.iter().min().copied(),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set_raw("a", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get_raw("a").await.unwrap().as_deref(), Some("1"));
        assert!(cache.delete("a").await.unwrap());
        assert_eq!(cache.get_raw("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_missed() {
        let cache = MemoryCache::new();
        cache.set_raw("a", "1", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get_raw("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pattern_delete() {
        let cache = MemoryCache::new();
        cache.set_raw("search:1", "x", Duration::from_secs(60)).await.unwrap();
        cache.set_raw("search:2", "y", Duration::from_secs(60)).await.unwrap();
        cache.set_raw("mat:1", "z", Duration::from_secs(60)).await.unwrap();

        let deleted = cache.delete_pattern("search:*", 10_000).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.get_raw("mat:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_window_trims_old_entries() {
        let cache = MemoryCache::new();
        let window = Duration::from_secs(60);

        let first = cache.window_trim_and_append("w", window, 1_000).await.unwrap();
        assert_eq!(first.count, 1);

        let second = cache.window_trim_and_append("w", window, 30_000).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.oldest_ms, Some(1_000));

        // 1_000 falls out of the 60s window at t=62_000
        let third = cache.window_trim_and_append("w", window, 62_000).await.unwrap();
        assert_eq!(third.count, 2);
        assert_eq!(third.oldest_ms, Some(30_000));
    }

    #[test]
    fn test_glob_match() {
        assert!(MemoryCache::glob_match("search:*", "search:abc"));
        assert!(MemoryCache::glob_match("mat:*", "mat:1"));
        assert!(!MemoryCache::glob_match("search:*", "suggest:abc"));
        assert!(MemoryCache::glob_match("exact", "exact"));
        assert!(!MemoryCache::glob_match("exact", "exact2"));
    }
}
