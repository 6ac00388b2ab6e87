//! Key-value store backend abstraction
//!
//! The distributed cache backends talk to "a shared key-value store" through
//! this trait; deployments hand the engine a client for their store. The
//! in-memory implementation backs the non-distributed cache variants and
//! doubles as the store used by tests.

use crate::error::{PalisadeError, Result};
use ahash::RandomState;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimal key-value contract the caches are built on.
///
/// `set_if_not_exists` must be atomic in the backing store; the decision
/// cache uses it for advisory single-writer semantics on marker keys.
/// Backend failures surface as `CacheStore` errors and are degraded to
/// cache misses by the callers, never propagated into evaluation.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Returns true if the key was absent and has been written.
    fn set_if_not_exists(&self, key: &str, value: &str) -> Result<bool>;
    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    fn multi_set(&self, entries: &[(String, String)]) -> Result<()>;
    /// Returns the number of keys actually removed.
    fn delete(&self, keys: &[String]) -> Result<usize>;
    /// Keys matching a glob pattern where `*` matches any run of characters.
    fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    fn flush_all(&self) -> Result<()>;
}

struct StoreEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Process-local store with lazy TTL expiry.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, StoreEntry, RandomState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.write().insert(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        if ch == '*' {
            regex.push_str(".*");
        } else {
            regex.push_str(&regex::escape(&ch.to_string()));
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| PalisadeError::CacheStore(anyhow::anyhow!(e)))
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
            }
        }
        // Expired: purge under the write lock.
        self.entries.write().remove(key);
        Ok(None)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, value, None);
        Ok(())
    }

    fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.insert(key, value, Some(ttl));
        Ok(())
    }

    fn set_if_not_exists(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let now = Instant::now();
        let occupied = entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false);
        if occupied {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn multi_set(&self, entries: &[(String, String)]) -> Result<()> {
        for (key, value) in entries {
            self.insert(key, value, None);
        }
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.entries.write();
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = glob_to_regex(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn flush_all(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_get_delete() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        assert_eq!(store.delete(&["k".to_string()]).unwrap(), 1);
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_set_if_not_exists() {
        let store = InMemoryStore::new();
        assert!(store.set_if_not_exists("k", "first").unwrap());
        assert!(!store.set_if_not_exists("k", "second").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn test_expiry() {
        let store = InMemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_millis(20))
            .unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_keys_pattern() {
        let store = InMemoryStore::new();
        store.set("rc:zone-a:aa:01", "x").unwrap();
        store.set("rc:zone-a:bb:02", "x").unwrap();
        store.set("sc:zone-a:aa:01", "x").unwrap();

        let mut matched = store.keys("rc:zone-a:*").unwrap();
        matched.sort();
        assert_eq!(matched, vec!["rc:zone-a:aa:01", "rc:zone-a:bb:02"]);

        assert_eq!(store.keys("rc:zone-b:*").unwrap().len(), 0);
    }

    #[test]
    fn test_pattern_special_characters_are_literal() {
        let store = InMemoryStore::new();
        store.set("a.b", "x").unwrap();
        store.set("aXb", "y").unwrap();

        // '.' must not act as a regex wildcard.
        assert_eq!(store.keys("a.b").unwrap(), vec!["a.b"]);
    }

    #[test]
    fn test_multi_get_multi_set() {
        let store = InMemoryStore::new();
        store
            .multi_set(&[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ])
            .unwrap();

        let values = store
            .multi_get(&["a".to_string(), "missing".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("2".to_string())]
        );
    }

    #[test]
    fn test_flush_all() {
        let store = InMemoryStore::new();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.flush_all().unwrap();
        assert!(store.is_empty());
    }
}
