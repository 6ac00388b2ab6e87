//! Cache layer
//!
//! Two independent caches share this module: the short-TTL attribute cache
//! and the decision cache with targeted invalidation. Each is a trait with
//! disabled, in-memory and distributed implementations; backend selection is
//! a configuration decision made once at startup, never per call.

pub mod key;

mod attribute;
mod decision;
mod store;

pub use attribute::{
    attribute_cache_key, AttributeCache, AttributeKind, CachedAttributes,
    DisabledAttributeCache, DistributedAttributeCache, InMemoryAttributeCache,
};
pub use decision::{
    CachedDecision, DecisionCache, DecisionRequest, DisabledDecisionCache,
    DistributedDecisionCache, InMemoryDecisionCache,
};
pub use store::{InMemoryStore, KeyValueStore};
