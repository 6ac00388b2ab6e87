//! Palisade — Multi-Tenant ABAC Decision Engine
//!
//! Palisade decides whether a request — an action on a resource by a
//! subject — is permitted under a tenant zone's policy set. It is the policy
//! decision subsystem of a larger access-control service: HTTP surfaces,
//! persistence and token validation live elsewhere and talk to this crate
//! through a handful of traits.
//!
//! ## Features
//!
//! - **Target matching** with comma-separated action lists, URI templates
//!   (`/sites/{site_id}`) and required attribute types
//! - **Attribute resolution** combining stored/adapter attributes,
//!   request-supplied supplemental attributes and per-policy attribute-URI
//!   indirection, memoized per evaluation request
//! - **Sandboxed conditions**: tenant-authored boolean expressions compiled
//!   by a closed-grammar parser with a parse-time whitelist — no process,
//!   filesystem, reflection or dynamic-evaluation surface
//! - **Decision cache** with targeted invalidation: a change to one
//!   resource, subject or policy set deletes exactly the dependent cached
//!   decisions
//! - **Attribute cache** with disabled / in-memory / distributed backends
//!   selected once at startup
//!
//! ## Quick Start
//!
//! ```rust
//! use palisade::{
//!     Attribute, Effect, EngineBuilder, EvaluationRequest, MatchCandidate, Policy, Result,
//! };
//! use palisade::matcher::{ResourceAttributeReader, SubjectAttributeReader};
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! struct NoStoredAttributes;
//!
//! impl ResourceAttributeReader for NoStoredAttributes {
//!     fn attributes(&self, _zone: &str, _uri: &str) -> Result<HashSet<Attribute>> {
//!         Ok(HashSet::new())
//!     }
//! }
//!
//! impl SubjectAttributeReader for NoStoredAttributes {
//!     fn attributes_by_scope(
//!         &self,
//!         _zone: &str,
//!         _subject: &str,
//!         _scopes: Option<&HashSet<Attribute>>,
//!     ) -> Result<HashSet<Attribute>> {
//!         Ok(HashSet::new())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let reader = Arc::new(NoStoredAttributes);
//! let engine = EngineBuilder::new()
//!     .resource_reader(reader.clone())
//!     .subject_reader(reader)
//!     .build()?;
//!
//! let request = EvaluationRequest {
//!     zone: "zone-a".to_string(),
//!     policy_set_id: "default".to_string(),
//!     candidate: MatchCandidate::new("GET", "/sites/boston", "bob"),
//! };
//! let policies = vec![Policy::named("open", Effect::Permit)];
//!
//! let result = engine.evaluate(&request, &policies)?;
//! println!("decision: {:?}", result.decision);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Evaluation is request-scoped and stateless between requests: every
//! evaluation constructs its own matcher and resolvers, so memoization never
//! crosses requests or zones. The caches are the only shared state and are
//! safe for concurrent use; their unavailability degrades evaluation to
//! "always resolve fresh", never to an error.

pub mod attribute;
pub mod cache;
pub mod condition;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod matcher;
pub mod policy;
pub mod template;

// Re-export commonly used types
pub use attribute::{Attribute, AttributeType};
pub use cache::{
    AttributeCache, CachedAttributes, DecisionCache, DecisionRequest, InMemoryStore,
    KeyValueStore,
};
pub use condition::{Bindings, CompiledCondition, ConditionCompiler, ResourceHandler, SubjectHandler};
pub use config::{CacheBackend, EngineBuilder, EngineConfig};
pub use error::{ConditionParseError, PalisadeError, Result};
pub use evaluation::{
    CombiningAlgorithm, Decision, EvaluationRequest, EvaluationResult, PolicyEvaluationService,
};
pub use matcher::{MatchCandidate, MatchResult, MatchedPolicy, PolicyMatcher};
pub use policy::{
    Condition, Effect, Policy, PolicySet, ResourceTarget, SubjectTarget, Target,
};
pub use template::{TemplateCache, UriTemplate};

/// Palisade version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
