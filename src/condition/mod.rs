//! Sandboxed condition scripting
//!
//! Tenant-authored boolean predicates, compiled into reusable expression
//! trees and evaluated against bound `resource`/`subject` handlers. The
//! sandbox is a closed grammar plus a parse-time whitelist/blacklist: there
//! is no filesystem, process, reflection or dynamic-evaluation surface to
//! reach, and nothing relies on catching runtime escapes.

mod ast;
mod cache;
mod eval;
mod handler;
mod parser;
mod token;
mod value;

pub use ast::{CompareOp, CompiledCondition, Expr};
pub use cache::{CompiledConditionCache, DisabledConditionCache, InMemoryConditionCache};
pub use eval::{Bindings, EvalFailure};
pub use handler::{
    AttributeMatcher, ConditionAssertionFailure, HandlerGroup, HandlerRef, ResourceHandler,
    SubjectHandler,
};
pub use parser::{parse, MAX_NESTING_DEPTH, MAX_SOURCE_LENGTH};

use crate::error::Result;
use crate::policy::PolicySet;
use std::sync::Arc;
use tracing::debug;

/// Compiles condition scripts through the compiled-condition cache.
///
/// Identical source text compiles once; policy-set replacement evicts the
/// set's sources so revoked conditions cannot be revived from cache.
pub struct ConditionCompiler {
    cache: Arc<dyn CompiledConditionCache>,
}

impl ConditionCompiler {
    pub fn new(cache: Arc<dyn CompiledConditionCache>) -> Self {
        ConditionCompiler { cache }
    }

    /// Compile `source`, consulting the cache before parsing.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledCondition>> {
        if let Some(compiled) = self.cache.get(source) {
            return Ok(compiled);
        }
        let compiled = Arc::new(parser::parse(source)?);
        self.cache.put(source, compiled.clone());
        Ok(compiled)
    }

    /// Compile every condition of a policy set, fail-closed.
    ///
    /// Any invalid condition rejects the whole set; nothing is executed.
    pub fn compile_policy_set(&self, policy_set: &PolicySet) -> Result<()> {
        for policy in &policy_set.policies {
            for condition in &policy.conditions {
                self.compile(&condition.condition)?;
            }
        }
        Ok(())
    }

    /// Evict the compiled conditions of a policy set that is being replaced
    /// or removed.
    pub fn evict_policy_set(&self, policy_set: &PolicySet) {
        for policy in &policy_set.policies {
            for condition in &policy.conditions {
                self.cache.remove(&condition.condition);
            }
        }
        debug!(
            policy_set = policy_set.name.as_deref().unwrap_or("<unnamed>"),
            "evicted compiled conditions"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Condition, Effect, Policy};

    fn set_with_conditions(sources: &[&str]) -> PolicySet {
        let mut policy = Policy::new(Effect::Permit);
        for source in sources {
            policy = policy.with_condition(Condition::new(*source));
        }
        PolicySet::new(vec![policy])
    }

    #[test]
    fn test_compile_uses_cache() {
        let cache = Arc::new(InMemoryConditionCache::new());
        let compiler = ConditionCompiler::new(cache.clone());

        let first = compiler.compile("true").unwrap();
        let second = compiler.compile("true").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_policy_set_validation_fails_closed() {
        let cache = Arc::new(InMemoryConditionCache::new());
        let compiler = ConditionCompiler::new(cache);

        let valid = set_with_conditions(&["true", "resource != subject"]);
        assert!(compiler.compile_policy_set(&valid).is_ok());

        let invalid = set_with_conditions(&["true", "System.exit(0)"]);
        assert!(compiler.compile_policy_set(&invalid).is_err());
    }

    #[test]
    fn test_eviction_removes_only_the_sets_sources() {
        let cache = Arc::new(InMemoryConditionCache::new());
        let compiler = ConditionCompiler::new(cache.clone());

        let replaced = set_with_conditions(&["resource != subject"]);
        let kept = set_with_conditions(&["true"]);
        compiler.compile_policy_set(&replaced).unwrap();
        compiler.compile_policy_set(&kept).unwrap();
        assert_eq!(cache.len(), 2);

        compiler.evict_policy_set(&replaced);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("true").is_some());
        assert!(cache.get("resource != subject").is_none());
    }
}
