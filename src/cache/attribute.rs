//! Attribute caches
//!
//! Short-TTL caches of resolved attribute sets per `(zone, identifier)`.
//! Resource and subject caches use distinct key namespaces so identifiers
//! can never alias across kinds. Caching is a transparent accelerator: a
//! backend failure degrades to a miss or a dropped write, never an error.

use crate::attribute::Attribute;
use crate::cache::store::KeyValueStore;
use ahash::RandomState;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// A resolved attribute set as held by the cache. TTL is enforced by the
/// backend, not stored in the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAttributes {
    pub attributes: HashSet<Attribute>,
}

impl CachedAttributes {
    pub fn new(attributes: HashSet<Attribute>) -> Self {
        CachedAttributes { attributes }
    }
}

/// Which entity kind a cache instance serves; decides the key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Resource,
    Subject,
}

impl AttributeKind {
    fn prefix(self) -> &'static str {
        match self {
            AttributeKind::Resource => "attr:res",
            AttributeKind::Subject => "attr:sub",
        }
    }
}

/// Zone-scoped cache key; the kind prefix keeps a resource and a subject
/// with the same external identifier from ever aliasing.
pub fn attribute_cache_key(kind: AttributeKind, zone: &str, identifier: &str) -> String {
    format!("{}:{}:{}", kind.prefix(), zone, identifier)
}

pub trait AttributeCache: Send + Sync {
    fn get(&self, zone: &str, identifier: &str) -> Option<CachedAttributes>;
    fn set(&self, zone: &str, identifier: &str, value: CachedAttributes);
    fn flush_all(&self);
}

/// Pass-through used when caching is turned off for this attribute kind.
#[derive(Default)]
pub struct DisabledAttributeCache;

impl DisabledAttributeCache {
    pub fn new() -> Self {
        DisabledAttributeCache
    }
}

impl AttributeCache for DisabledAttributeCache {
    fn get(&self, _zone: &str, _identifier: &str) -> Option<CachedAttributes> {
        None
    }

    fn set(&self, _zone: &str, _identifier: &str, _value: CachedAttributes) {}

    fn flush_all(&self) {}
}

/// Process-local cache; entries passively expire a fixed interval after the
/// last write (not the last read).
pub struct InMemoryAttributeCache {
    kind: AttributeKind,
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, CachedAttributes), RandomState>>,
}

impl InMemoryAttributeCache {
    pub fn new(kind: AttributeKind, ttl: Duration) -> Self {
        InMemoryAttributeCache {
            kind,
            ttl,
            entries: RwLock::new(HashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl AttributeCache for InMemoryAttributeCache {
    fn get(&self, zone: &str, identifier: &str) -> Option<CachedAttributes> {
        let key = attribute_cache_key(self.kind, zone, identifier);
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                None => return None,
                Some((written_at, value)) if written_at.elapsed() < self.ttl => {
                    return Some(value.clone())
                }
                Some(_) => {}
            }
        }
        self.entries.write().remove(&key);
        None
    }

    fn set(&self, zone: &str, identifier: &str, value: CachedAttributes) {
        let key = attribute_cache_key(self.kind, zone, identifier);
        self.entries.write().insert(key, (Instant::now(), value));
    }

    fn flush_all(&self) {
        self.entries.write().clear();
    }
}

/// Cache over a shared key-value store; values are portable JSON and the
/// store enforces the TTL.
pub struct DistributedAttributeCache {
    kind: AttributeKind,
    store: Arc<dyn KeyValueStore>,
    max_interval: Duration,
}

impl DistributedAttributeCache {
    pub fn new(kind: AttributeKind, store: Arc<dyn KeyValueStore>, max_interval_minutes: u64) -> Self {
        DistributedAttributeCache {
            kind,
            store,
            max_interval: Duration::from_secs(max_interval_minutes * 60),
        }
    }
}

impl AttributeCache for DistributedAttributeCache {
    fn get(&self, zone: &str, identifier: &str) -> Option<CachedAttributes> {
        let key = attribute_cache_key(self.kind, zone, identifier);
        let value = match self.store.get(&key) {
            Ok(value) => value?,
            Err(e) => {
                warn!(key = %key, error = %e, "attribute cache read failed; treating as miss");
                return None;
            }
        };
        if value.is_empty() {
            return None;
        }
        // An undecodable value is a miss, never an error.
        match serde_json::from_str(&value) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable attribute cache value; treating as miss");
                None
            }
        }
    }

    fn set(&self, zone: &str, identifier: &str, value: CachedAttributes) {
        let key = attribute_cache_key(self.kind, zone, identifier);
        let serialized = match serde_json::to_string(&value) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize attribute cache value");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set_with_expiry(&key, &serialized, self.max_interval)
        {
            warn!(key = %key, error = %e, "attribute cache write failed; dropping");
        }
    }

    fn flush_all(&self) {
        // Only this cache's namespace; the store may be shared with other
        // caches.
        let pattern = format!("{}:*", self.kind.prefix());
        match self.store.keys(&pattern) {
            Ok(keys) => {
                if let Err(e) = self.store.delete(&keys) {
                    warn!(error = %e, "attribute cache flush failed");
                }
            }
            Err(e) => warn!(error = %e, "attribute cache flush scan failed"),
        }
    }
}
