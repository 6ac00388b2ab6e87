//! Engine configuration and wiring
//!
//! Cache enablement and backend choice are configuration decisions made
//! once at startup. `EngineConfig` is TOML-loadable; `EngineBuilder` turns a
//! config plus the deployment's attribute readers (and key-value store, for
//! distributed backends) into a ready [`PolicyEvaluationService`].

use crate::cache::{
    AttributeCache, AttributeKind, DecisionCache, DisabledAttributeCache, DisabledDecisionCache,
    DistributedAttributeCache, DistributedDecisionCache, InMemoryAttributeCache,
    InMemoryDecisionCache, KeyValueStore,
};
use crate::condition::{CompiledConditionCache, DisabledConditionCache, InMemoryConditionCache};
use crate::error::{PalisadeError, Result};
use crate::evaluation::{CombiningAlgorithm, PolicyEvaluationService};
use crate::matcher::{
    CachingResourceAttributeReader, CachingSubjectAttributeReader, ResourceAttributeReader,
    SubjectAttributeReader,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Which implementation backs an enabled cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackend {
    #[default]
    InMemory,
    Distributed,
}

/// Configuration of one attribute cache (resource or subject; the two are
/// independent).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AttributeCacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    /// In-memory backend: idle interval after the last write, in seconds.
    pub ttl_seconds: u64,
    /// Distributed backend: store-enforced TTL, in minutes.
    pub max_interval_minutes: u64,
}

impl Default for AttributeCacheConfig {
    fn default() -> Self {
        AttributeCacheConfig {
            enabled: true,
            backend: CacheBackend::InMemory,
            ttl_seconds: 180,
            max_interval_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DecisionCacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    /// Distributed backend: TTL applied to evaluation entries, in minutes.
    pub evaluation_ttl_minutes: u64,
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        DecisionCacheConfig {
            enabled: true,
            backend: CacheBackend::InMemory,
            evaluation_ttl_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    pub resource_attribute_cache: AttributeCacheConfig,
    pub subject_attribute_cache: AttributeCacheConfig,
    pub decision_cache: DecisionCacheConfig,
    pub condition_cache_enabled: bool,
    pub combining_algorithm: CombiningAlgorithm,
    pub template_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            resource_attribute_cache: AttributeCacheConfig::default(),
            subject_attribute_cache: AttributeCacheConfig::default(),
            decision_cache: DecisionCacheConfig::default(),
            condition_cache_enabled: true,
            combining_algorithm: CombiningAlgorithm::default(),
            template_cache_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PalisadeError::InvalidConfig(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PalisadeError::InvalidConfig(e.to_string()))?;
        Self::from_toml_str(&raw)
    }
}

/// Wires readers, caches and the evaluation service together.
pub struct EngineBuilder {
    config: EngineConfig,
    resource_reader: Option<Arc<dyn ResourceAttributeReader>>,
    subject_reader: Option<Arc<dyn SubjectAttributeReader>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            resource_reader: None,
            subject_reader: None,
            store: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resource_reader(mut self, reader: Arc<dyn ResourceAttributeReader>) -> Self {
        self.resource_reader = Some(reader);
        self
    }

    pub fn subject_reader(mut self, reader: Arc<dyn SubjectAttributeReader>) -> Self {
        self.subject_reader = Some(reader);
        self
    }

    /// Key-value store client required by any `distributed` backend.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<PolicyEvaluationService> {
        let resource_reader = self
            .resource_reader
            .ok_or_else(|| PalisadeError::InvalidConfig("resource reader must be set".into()))?;
        let subject_reader = self
            .subject_reader
            .ok_or_else(|| PalisadeError::InvalidConfig("subject reader must be set".into()))?;

        let resource_cache = attribute_cache(
            AttributeKind::Resource,
            &self.config.resource_attribute_cache,
            self.store.as_ref(),
        )?;
        let resource_reader: Arc<dyn ResourceAttributeReader> = Arc::new(
            CachingResourceAttributeReader::new(resource_reader, resource_cache),
        );

        let subject_cache = attribute_cache(
            AttributeKind::Subject,
            &self.config.subject_attribute_cache,
            self.store.as_ref(),
        )?;
        let subject_reader: Arc<dyn SubjectAttributeReader> = Arc::new(
            CachingSubjectAttributeReader::new(subject_reader, subject_cache),
        );

        let decision_cache: Arc<dyn DecisionCache> = if !self.config.decision_cache.enabled {
            Arc::new(DisabledDecisionCache::new())
        } else {
            match self.config.decision_cache.backend {
                CacheBackend::InMemory => Arc::new(InMemoryDecisionCache::new()),
                CacheBackend::Distributed => Arc::new(DistributedDecisionCache::new(
                    require_store(self.store.as_ref(), "decision cache")?,
                    self.config.decision_cache.evaluation_ttl_minutes,
                )),
            }
        };

        let condition_cache: Arc<dyn CompiledConditionCache> = if self.config.condition_cache_enabled
        {
            Arc::new(InMemoryConditionCache::new())
        } else {
            Arc::new(DisabledConditionCache::new())
        };

        info!(
            combining = ?self.config.combining_algorithm,
            decision_cache_enabled = self.config.decision_cache.enabled,
            "building policy evaluation service"
        );

        Ok(PolicyEvaluationService::new(
            resource_reader,
            subject_reader,
            condition_cache,
            decision_cache,
            self.config.combining_algorithm,
        )
        .with_template_capacity(self.config.template_cache_capacity))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder::new()
    }
}

fn attribute_cache(
    kind: AttributeKind,
    config: &AttributeCacheConfig,
    store: Option<&Arc<dyn KeyValueStore>>,
) -> Result<Arc<dyn AttributeCache>> {
    if !config.enabled {
        return Ok(Arc::new(DisabledAttributeCache::new()));
    }
    let cache: Arc<dyn AttributeCache> = match config.backend {
        CacheBackend::InMemory => Arc::new(InMemoryAttributeCache::new(
            kind,
            Duration::from_secs(config.ttl_seconds),
        )),
        CacheBackend::Distributed => Arc::new(DistributedAttributeCache::new(
            kind,
            require_store(store, "attribute cache")?,
            config.max_interval_minutes,
        )),
    };
    Ok(cache)
}

fn require_store(
    store: Option<&Arc<dyn KeyValueStore>>,
    consumer: &str,
) -> Result<Arc<dyn KeyValueStore>> {
    store.cloned().ok_or_else(|| {
        PalisadeError::InvalidConfig(format!(
            "{} is configured as distributed but no key-value store was provided",
            consumer
        ))
    })
}
