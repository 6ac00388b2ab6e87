//! Compiled-condition cache
//!
//! Keyed by exact source text. Entries are removed only by explicit
//! eviction when a policy set is replaced or deleted, never by TTL: a stale
//! compiled condition would silently change authorization outcomes.

use crate::condition::ast::CompiledCondition;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub trait CompiledConditionCache: Send + Sync {
    fn get(&self, source: &str) -> Option<Arc<CompiledCondition>>;
    fn put(&self, source: &str, compiled: Arc<CompiledCondition>);
    fn remove(&self, source: &str);
}

/// Unbounded concurrent map of compiled conditions.
#[derive(Default)]
pub struct InMemoryConditionCache {
    conditions: RwLock<HashMap<String, Arc<CompiledCondition>, RandomState>>,
}

impl InMemoryConditionCache {
    pub fn new() -> Self {
        InMemoryConditionCache::default()
    }

    pub fn len(&self) -> usize {
        self.conditions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.read().is_empty()
    }
}

impl CompiledConditionCache for InMemoryConditionCache {
    fn get(&self, source: &str) -> Option<Arc<CompiledCondition>> {
        self.conditions.read().get(source).cloned()
    }

    fn put(&self, source: &str, compiled: Arc<CompiledCondition>) {
        self.conditions
            .write()
            .insert(source.to_string(), compiled);
    }

    fn remove(&self, source: &str) {
        self.conditions.write().remove(source);
    }
}

/// Always-miss cache used when condition caching is turned off.
#[derive(Default)]
pub struct DisabledConditionCache;

impl DisabledConditionCache {
    pub fn new() -> Self {
        DisabledConditionCache
    }
}

impl CompiledConditionCache for DisabledConditionCache {
    fn get(&self, _source: &str) -> Option<Arc<CompiledCondition>> {
        None
    }

    fn put(&self, _source: &str, _compiled: Arc<CompiledCondition>) {}

    fn remove(&self, _source: &str) {}
}
