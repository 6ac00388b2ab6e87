//! Decision caches with targeted invalidation
//!
//! A cached evaluation entry is written together with one change-marker key
//! per dependency: the policy set it was evaluated under, the subject, the
//! request resource URI and every resource URI reached through attribute-URI
//! indirection. Each marker embeds the entity hash and the evaluation
//! fingerprint, so `reset_for_*` can scan one marker pattern and delete
//! exactly the dependent evaluation entries without flushing anything else.
//!
//! Cache availability never decides evaluation: every backend failure is
//! logged and degraded to a miss or a dropped write.

use crate::cache::key::{
    evaluation_key, key_class, marker_fingerprint, policy_set_marker_key,
    policy_set_marker_pattern, request_fingerprint, resource_marker_key, resource_marker_pattern,
    subject_marker_key, subject_marker_pattern,
};
use crate::cache::store::{InMemoryStore, KeyValueStore};
use crate::error::{PalisadeError, Result};
use crate::evaluation::EvaluationResult;
use crate::matcher::MatchCandidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identifies one evaluation request for cache lookup.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub zone: &'a str,
    pub policy_set_id: &'a str,
    pub candidate: &'a MatchCandidate,
}

impl DecisionRequest<'_> {
    pub fn fingerprint(&self) -> String {
        request_fingerprint(self.zone, self.policy_set_id, self.candidate)
    }
}

/// The stored form of a cached evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    pub result: EvaluationResult,
    pub cached_at: DateTime<Utc>,
}

pub trait DecisionCache: Send + Sync {
    fn get(&self, request: &DecisionRequest) -> Option<EvaluationResult>;
    fn put(&self, request: &DecisionRequest, result: &EvaluationResult);

    /// Drop every cached evaluation computed under this policy set.
    fn reset_for_policy_set(&self, zone: &str, policy_set_id: &str);

    /// Drop every cached evaluation whose computation could have depended
    /// on this resource (by request URI or resolved URI).
    fn reset_for_resource(&self, zone: &str, resource_id: &str);
    fn reset_for_resources(&self, zone: &str, resource_ids: &[String]);

    fn reset_for_subject(&self, zone: &str, subject_id: &str);
    fn reset_for_subjects(&self, zone: &str, subject_ids: &[String]);

    fn flush_all(&self);
}

/// Shared get/put/reset logic over any key-value store.
struct DecisionCacheCore {
    store: Arc<dyn KeyValueStore>,
    /// TTL applied to evaluation entries so missed invalidations self-heal.
    evaluation_ttl: Option<Duration>,
    /// The in-memory backend rejects writes outside the four key classes;
    /// the distributed backend trusts the key builder.
    validate_keys: bool,
}

impl DecisionCacheCore {
    fn validate_key(&self, key: &str) -> Result<()> {
        if key_class(key).is_none() {
            return Err(PalisadeError::InvalidCacheKey(key.to_string()));
        }
        Ok(())
    }

    fn get(&self, request: &DecisionRequest) -> Option<EvaluationResult> {
        let key = evaluation_key(request.zone, &request.fingerprint());
        let value = match self.store.get(&key) {
            Ok(value) => value?,
            Err(e) => {
                warn!(key = %key, error = %e, "decision cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<CachedDecision>(&value) {
            Ok(cached) => Some(cached.result),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable decision cache value; treating as miss");
                None
            }
        }
    }

    fn put(&self, request: &DecisionRequest, result: &EvaluationResult) {
        let fingerprint = request.fingerprint();
        let entry_key = evaluation_key(request.zone, &fingerprint);

        let serialized = match serde_json::to_string(&CachedDecision {
            result: result.clone(),
            cached_at: Utc::now(),
        }) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key = %entry_key, error = %e, "failed to serialize decision");
                return;
            }
        };

        // One marker per dependency; the evaluation depends on its policy
        // set, its subject, the request resource and every indirected
        // resource it touched.
        let mut dependent_resources: HashSet<&str> = result
            .resolved_resource_uris
            .iter()
            .map(String::as_str)
            .collect();
        dependent_resources.insert(&request.candidate.resource_uri);

        let mut markers: Vec<(String, String)> = vec![
            (
                policy_set_marker_key(request.zone, request.policy_set_id, &fingerprint),
                request.policy_set_id.to_string(),
            ),
            (
                subject_marker_key(
                    request.zone,
                    &request.candidate.subject_identifier,
                    &fingerprint,
                ),
                request.candidate.subject_identifier.clone(),
            ),
        ];
        for resource in dependent_resources {
            markers.push((
                resource_marker_key(request.zone, resource, &fingerprint),
                resource.to_string(),
            ));
        }

        if self.validate_keys {
            // Keys come from this module's builders; a mismatch is a broken
            // key builder and must fail fast, not miscategorize.
            self.validate_key(&entry_key)
                .expect("decision key builder produced an invalid evaluation key");
            for (marker, _) in &markers {
                self.validate_key(marker)
                    .expect("decision key builder produced an invalid marker key");
            }
        }

        for (marker, entity) in &markers {
            if let Err(e) = self.store.set_if_not_exists(marker, entity) {
                warn!(key = %marker, error = %e, "marker write failed; dropping");
            }
        }

        let written = match self.evaluation_ttl {
            Some(ttl) => self.store.set_with_expiry(&entry_key, &serialized, ttl),
            None => self.store.set(&entry_key, &serialized),
        };
        if let Err(e) = written {
            warn!(key = %entry_key, error = %e, "decision cache write failed; dropping");
        }
    }

    /// Delete the evaluation entries linked from every marker matching
    /// `pattern`, plus the markers themselves.
    fn reset_markers(&self, pattern: &str) {
        let markers = match self.store.keys(pattern) {
            Ok(markers) => markers,
            Err(e) => {
                warn!(pattern, error = %e, "marker scan failed; skipping invalidation");
                return;
            }
        };
        if markers.is_empty() {
            return;
        }

        let mut doomed = Vec::with_capacity(markers.len() * 2);
        for marker in &markers {
            if let (Some(zone), Some(fingerprint)) =
                (marker.split(':').nth(1), marker_fingerprint(marker))
            {
                doomed.push(evaluation_key(zone, fingerprint));
            }
        }
        doomed.extend(markers);

        match self.store.delete(&doomed) {
            Ok(removed) => debug!(pattern, removed, "invalidated cached decisions"),
            Err(e) => warn!(pattern, error = %e, "marker delete failed"),
        }
    }

    fn flush_all(&self) {
        if let Err(e) = self.store.flush_all() {
            warn!(error = %e, "decision cache flush failed");
        }
    }
}

/// Process-local decision cache. Rejects writes whose key matches none of
/// the recognized formats.
pub struct InMemoryDecisionCache {
    core: DecisionCacheCore,
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        InMemoryDecisionCache {
            core: DecisionCacheCore {
                store: Arc::new(InMemoryStore::new()),
                evaluation_ttl: None,
                validate_keys: true,
            },
        }
    }

    /// Flat-keyspace write, validated against the four key classes.
    ///
    /// # Errors
    ///
    /// `InvalidCacheKey` when the key matches none of the recognized
    /// formats.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.core.validate_key(key)?;
        self.core.store.set(key, value)
    }

    /// Flat-keyspace read.
    pub fn get_value(&self, key: &str) -> Option<String> {
        self.core.store.get(key).ok().flatten()
    }

    /// Keys currently present under a glob pattern.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        self.core.store.keys(pattern).unwrap_or_default()
    }
}

impl Default for InMemoryDecisionCache {
    fn default() -> Self {
        InMemoryDecisionCache::new()
    }
}

impl DecisionCache for InMemoryDecisionCache {
    fn get(&self, request: &DecisionRequest) -> Option<EvaluationResult> {
        self.core.get(request)
    }

    fn put(&self, request: &DecisionRequest, result: &EvaluationResult) {
        self.core.put(request, result);
    }

    fn reset_for_policy_set(&self, zone: &str, policy_set_id: &str) {
        self.core
            .reset_markers(&policy_set_marker_pattern(zone, policy_set_id));
    }

    fn reset_for_resource(&self, zone: &str, resource_id: &str) {
        self.core
            .reset_markers(&resource_marker_pattern(zone, resource_id));
    }

    fn reset_for_resources(&self, zone: &str, resource_ids: &[String]) {
        for resource_id in resource_ids {
            self.reset_for_resource(zone, resource_id);
        }
    }

    fn reset_for_subject(&self, zone: &str, subject_id: &str) {
        self.core
            .reset_markers(&subject_marker_pattern(zone, subject_id));
    }

    fn reset_for_subjects(&self, zone: &str, subject_ids: &[String]) {
        for subject_id in subject_ids {
            self.reset_for_subject(zone, subject_id);
        }
    }

    fn flush_all(&self) {
        self.core.flush_all();
    }
}

/// Decision cache over a shared key-value store. Evaluation entries carry a
/// TTL so that even a missed invalidation self-heals.
pub struct DistributedDecisionCache {
    core: DecisionCacheCore,
}

impl DistributedDecisionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, evaluation_ttl_minutes: u64) -> Self {
        DistributedDecisionCache {
            core: DecisionCacheCore {
                store,
                evaluation_ttl: Some(Duration::from_secs(evaluation_ttl_minutes * 60)),
                validate_keys: false,
            },
        }
    }
}

impl DecisionCache for DistributedDecisionCache {
    fn get(&self, request: &DecisionRequest) -> Option<EvaluationResult> {
        self.core.get(request)
    }

    fn put(&self, request: &DecisionRequest, result: &EvaluationResult) {
        self.core.put(request, result);
    }

    fn reset_for_policy_set(&self, zone: &str, policy_set_id: &str) {
        self.core
            .reset_markers(&policy_set_marker_pattern(zone, policy_set_id));
    }

    fn reset_for_resource(&self, zone: &str, resource_id: &str) {
        self.core
            .reset_markers(&resource_marker_pattern(zone, resource_id));
    }

    fn reset_for_resources(&self, zone: &str, resource_ids: &[String]) {
        for resource_id in resource_ids {
            self.reset_for_resource(zone, resource_id);
        }
    }

    fn reset_for_subject(&self, zone: &str, subject_id: &str) {
        self.core
            .reset_markers(&subject_marker_pattern(zone, subject_id));
    }

    fn reset_for_subjects(&self, zone: &str, subject_ids: &[String]) {
        for subject_id in subject_ids {
            self.reset_for_subject(zone, subject_id);
        }
    }

    fn flush_all(&self) {
        self.core.flush_all();
    }
}

/// No-op cache used when result caching is turned off. Caching is a
/// transparent accelerator, never a correctness dependency.
#[derive(Default)]
pub struct DisabledDecisionCache;

impl DisabledDecisionCache {
    pub fn new() -> Self {
        DisabledDecisionCache
    }
}

impl DecisionCache for DisabledDecisionCache {
    fn get(&self, _request: &DecisionRequest) -> Option<EvaluationResult> {
        None
    }

    fn put(&self, _request: &DecisionRequest, _result: &EvaluationResult) {}

    fn reset_for_policy_set(&self, _zone: &str, _policy_set_id: &str) {}

    fn reset_for_resource(&self, _zone: &str, _resource_id: &str) {}

    fn reset_for_resources(&self, _zone: &str, _resource_ids: &[String]) {}

    fn reset_for_subject(&self, _zone: &str, _subject_id: &str) {}

    fn reset_for_subjects(&self, _zone: &str, _subject_ids: &[String]) {}

    fn flush_all(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Decision;

    fn candidate(uri: &str, subject: &str) -> MatchCandidate {
        MatchCandidate::new("GET", uri, subject)
    }

    fn result(resolved: &[&str]) -> EvaluationResult {
        EvaluationResult {
            decision: Decision::Permit,
            matched_policy: Some("p1".to_string()),
            resolved_resource_uris: resolved.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_put_then_get() {
        let cache = InMemoryDecisionCache::new();
        let candidate = candidate("/sites/boston", "bob");
        let request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &candidate,
        };

        assert!(cache.get(&request).is_none());
        cache.put(&request, &result(&[]));

        let cached = cache.get(&request).unwrap();
        assert_eq!(cached.decision, Decision::Permit);
    }

    #[test]
    fn test_invalid_key_rejected_by_in_memory_set() {
        let cache = InMemoryDecisionCache::new();
        for key in ["bogus", "ev:zone-a:nothex", "xx:z:0123456789abcdef"] {
            assert!(
                matches!(
                    cache.set(key, "value"),
                    Err(PalisadeError::InvalidCacheKey(_))
                ),
                "key {:?}",
                key
            );
        }

        let valid = evaluation_key("zone-a", &crate::cache::key::entity_hash("x"));
        assert!(cache.set(&valid, "value").is_ok());
    }

    #[test]
    fn test_reset_for_resource_removes_only_dependents() {
        let cache = InMemoryDecisionCache::new();

        let boston = candidate("/sites/boston", "bob");
        let chicago = candidate("/sites/chicago", "bob");
        let boston_request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &boston,
        };
        let chicago_request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &chicago,
        };

        cache.put(&boston_request, &result(&[]));
        cache.put(&chicago_request, &result(&[]));

        cache.reset_for_resource("zone-a", "/sites/boston");

        assert!(cache.get(&boston_request).is_none());
        assert!(cache.get(&chicago_request).is_some());
    }

    #[test]
    fn test_reset_for_resolved_uri_dependency() {
        // The evaluation was for a device URI, but attribute indirection
        // resolved a site; a change to the site must invalidate it.
        let cache = InMemoryDecisionCache::new();
        let device = candidate("/devices/d42", "bob");
        let request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &device,
        };

        cache.put(&request, &result(&["sanramon"]));
        assert!(cache.get(&request).is_some());

        cache.reset_for_resource("zone-a", "sanramon");
        assert!(cache.get(&request).is_none());
    }

    #[test]
    fn test_reset_for_subject() {
        let cache = InMemoryDecisionCache::new();
        let bob = candidate("/sites/boston", "bob");
        let alice = candidate("/sites/boston", "alice");
        let bob_request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &bob,
        };
        let alice_request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &alice,
        };

        cache.put(&bob_request, &result(&[]));
        cache.put(&alice_request, &result(&[]));

        cache.reset_for_subjects("zone-a", &["bob".to_string()]);
        assert!(cache.get(&bob_request).is_none());
        assert!(cache.get(&alice_request).is_some());
    }

    #[test]
    fn test_reset_for_policy_set() {
        let cache = InMemoryDecisionCache::new();
        let c = candidate("/sites/boston", "bob");
        let default_set = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &c,
        };
        let other_set = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "other",
            candidate: &c,
        };

        cache.put(&default_set, &result(&[]));
        cache.put(&other_set, &result(&[]));

        cache.reset_for_policy_set("zone-a", "default");
        assert!(cache.get(&default_set).is_none());
        assert!(cache.get(&other_set).is_some());
    }

    #[test]
    fn test_zone_isolation() {
        let cache = InMemoryDecisionCache::new();
        let c = candidate("/sites/boston", "bob");
        let zone_a = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &c,
        };
        let zone_b = DecisionRequest {
            zone: "zone-b",
            policy_set_id: "default",
            candidate: &c,
        };

        cache.put(&zone_a, &result(&[]));
        cache.put(&zone_b, &result(&[]));

        cache.reset_for_resource("zone-a", "/sites/boston");
        assert!(cache.get(&zone_a).is_none());
        assert!(cache.get(&zone_b).is_some());
    }

    #[test]
    fn test_distributed_ttl_self_heals() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedDecisionCache {
            core: DecisionCacheCore {
                store,
                evaluation_ttl: Some(Duration::from_millis(20)),
                validate_keys: false,
            },
        };

        let c = candidate("/sites/boston", "bob");
        let request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &c,
        };
        cache.put(&request, &result(&[]));
        assert!(cache.get(&request).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&request).is_none());
    }

    #[test]
    fn test_disabled_cache_is_no_op() {
        let cache = DisabledDecisionCache::new();
        let c = candidate("/sites/boston", "bob");
        let request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &c,
        };
        cache.put(&request, &result(&[]));
        assert!(cache.get(&request).is_none());
        cache.reset_for_resource("zone-a", "/sites/boston");
        cache.flush_all();
    }

    #[test]
    fn test_flush_all() {
        let cache = InMemoryDecisionCache::new();
        let c = candidate("/sites/boston", "bob");
        let request = DecisionRequest {
            zone: "zone-a",
            policy_set_id: "default",
            candidate: &c,
        };
        cache.put(&request, &result(&[]));
        cache.flush_all();
        assert!(cache.get(&request).is_none());
    }
}
