//! Per-request attribute resolution
//!
//! Resolvers combine three attribute sources: the attribute reader (local
//! store or remote adapter), supplemental attributes supplied inline with
//! the evaluation request, and per-policy attribute-URI indirection. A fresh
//! resolver pair is constructed for every evaluation request, so memoization
//! never leaks across requests or zones.

use crate::attribute::Attribute;
use crate::cache::{AttributeCache, CachedAttributes};
use crate::error::Result;
use crate::policy::Policy;
use crate::template::TemplateCache;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Path variable an attribute URI template must declare to redirect
/// attribute lookup, e.g. `/assets/{attribute_uri}`.
pub const ATTRIBUTE_URI_VARIABLE: &str = "attribute_uri";

/// Read-only access to a zone's persisted resource attributes, including
/// attributes inherited along a hierarchy. May be backed by local storage or
/// a remote adapter; a failed fetch must surface as an error, never as an
/// empty set.
pub trait ResourceAttributeReader: Send + Sync {
    fn attributes(&self, zone: &str, resource_uri: &str) -> Result<HashSet<Attribute>>;
}

/// Read-only access to a zone's persisted subject attributes.
///
/// `scopes`, when present, restricts which externally granted attributes are
/// visible to the calling request.
pub trait SubjectAttributeReader: Send + Sync {
    fn attributes_by_scope(
        &self,
        zone: &str,
        subject_id: &str,
        scopes: Option<&HashSet<Attribute>>,
    ) -> Result<HashSet<Attribute>>;
}

/// Outcome of resolving resource attributes for one policy.
#[derive(Debug, Clone)]
pub struct ResourceResolution {
    /// Reader attributes for the resolved URI, unioned with the request's
    /// supplemental resource attributes.
    pub attributes: HashSet<Attribute>,
    /// The URI whose attributes were queried: the request URI, or the value
    /// extracted through the policy's attribute URI template.
    pub resolved_uri: String,
    /// True when the policy declared an attribute URI template and the
    /// `attribute_uri` variable was extracted from the request URI.
    pub attribute_uri_template_found: bool,
}

/// Resolves resource attributes for the policies of one evaluation pass.
///
/// Results are memoized per distinct resolved URI; two policies with
/// different attribute URI templates can resolve different underlying URIs
/// within the same request. The memo map tolerates concurrent fills —
/// a duplicate fetch on a race is acceptable, corruption is not.
pub struct ResourceAttributeResolver<'a> {
    reader: &'a dyn ResourceAttributeReader,
    templates: &'a TemplateCache,
    zone: &'a str,
    request_uri: &'a str,
    supplemental: &'a HashSet<Attribute>,
    memo: RwLock<HashMap<String, HashSet<Attribute>, RandomState>>,
}

impl<'a> ResourceAttributeResolver<'a> {
    pub fn new(
        reader: &'a dyn ResourceAttributeReader,
        templates: &'a TemplateCache,
        zone: &'a str,
        request_uri: &'a str,
        supplemental: &'a HashSet<Attribute>,
    ) -> Self {
        ResourceAttributeResolver {
            reader,
            templates,
            zone,
            request_uri,
            supplemental,
            memo: RwLock::new(HashMap::default()),
        }
    }

    /// Resolve the attribute set this policy should be matched against.
    pub fn resolve(&self, policy: &Policy) -> Result<ResourceResolution> {
        let (resolved_uri, attribute_uri_template_found) = self.resolve_uri(policy)?;

        if let Some(attributes) = self.memo.read().get(&resolved_uri) {
            return Ok(ResourceResolution {
                attributes: attributes.clone(),
                resolved_uri,
                attribute_uri_template_found,
            });
        }

        let mut attributes = self.reader.attributes(self.zone, &resolved_uri)?;
        attributes.extend(self.supplemental.iter().cloned());

        // Keep whichever fill won the race so every policy in this pass
        // sees the same set for a given URI.
        let attributes = self
            .memo
            .write()
            .entry(resolved_uri.clone())
            .or_insert(attributes)
            .clone();

        Ok(ResourceResolution {
            attributes,
            resolved_uri,
            attribute_uri_template_found,
        })
    }

    /// The URI to query for this policy: the `attribute_uri` template
    /// variable when the policy declares an indirection template and it
    /// matches, otherwise the request URI verbatim.
    fn resolve_uri(&self, policy: &Policy) -> Result<(String, bool)> {
        let template = policy
            .target
            .as_ref()
            .and_then(|t| t.resource.as_ref())
            .and_then(|r| r.attribute_uri_template());

        let Some(template) = template else {
            return Ok((self.request_uri.to_string(), false));
        };

        let parsed = self.templates.get_or_parse(template)?;
        match parsed.variable(self.request_uri, ATTRIBUTE_URI_VARIABLE) {
            Some(uri) => Ok((uri, true)),
            None => {
                debug!(
                    template,
                    request_uri = self.request_uri,
                    "attribute URI template did not match request URI"
                );
                Ok((self.request_uri.to_string(), false))
            }
        }
    }
}

/// Resolves subject attributes for one evaluation pass, memoized by subject
/// identifier.
pub struct SubjectAttributeResolver<'a> {
    reader: &'a dyn SubjectAttributeReader,
    zone: &'a str,
    subject_id: &'a str,
    supplemental: &'a HashSet<Attribute>,
    memo: RwLock<HashMap<String, HashSet<Attribute>, RandomState>>,
}

impl<'a> SubjectAttributeResolver<'a> {
    pub fn new(
        reader: &'a dyn SubjectAttributeReader,
        zone: &'a str,
        subject_id: &'a str,
        supplemental: &'a HashSet<Attribute>,
    ) -> Self {
        SubjectAttributeResolver {
            reader,
            zone,
            subject_id,
            supplemental,
            memo: RwLock::new(HashMap::default()),
        }
    }

    pub fn resolve(&self, scopes: Option<&HashSet<Attribute>>) -> Result<HashSet<Attribute>> {
        if let Some(attributes) = self.memo.read().get(self.subject_id) {
            return Ok(attributes.clone());
        }

        let mut attributes = self
            .reader
            .attributes_by_scope(self.zone, self.subject_id, scopes)?;
        attributes.extend(self.supplemental.iter().cloned());

        let attributes = self
            .memo
            .write()
            .entry(self.subject_id.to_string())
            .or_insert(attributes)
            .clone();
        Ok(attributes)
    }
}

/// Attribute cache placed in front of a resource reader.
///
/// Cache outcomes never decide evaluation: a backend failure degrades to a
/// reader fetch, and only successful reader fetches are written back.
pub struct CachingResourceAttributeReader {
    inner: Arc<dyn ResourceAttributeReader>,
    cache: Arc<dyn AttributeCache>,
}

impl CachingResourceAttributeReader {
    pub fn new(inner: Arc<dyn ResourceAttributeReader>, cache: Arc<dyn AttributeCache>) -> Self {
        CachingResourceAttributeReader { inner, cache }
    }
}

impl ResourceAttributeReader for CachingResourceAttributeReader {
    fn attributes(&self, zone: &str, resource_uri: &str) -> Result<HashSet<Attribute>> {
        if let Some(cached) = self.cache.get(zone, resource_uri) {
            debug!(zone, resource_uri, "resource attribute cache hit");
            return Ok(cached.attributes);
        }
        let attributes = self.inner.attributes(zone, resource_uri)?;
        self.cache
            .set(zone, resource_uri, CachedAttributes::new(attributes.clone()));
        Ok(attributes)
    }
}

/// Attribute cache placed in front of a subject reader.
///
/// Scoped lookups bypass the cache entirely: a scope-filtered set must not
/// shadow the subject's full attribute set for later unscoped requests.
pub struct CachingSubjectAttributeReader {
    inner: Arc<dyn SubjectAttributeReader>,
    cache: Arc<dyn AttributeCache>,
}

impl CachingSubjectAttributeReader {
    pub fn new(inner: Arc<dyn SubjectAttributeReader>, cache: Arc<dyn AttributeCache>) -> Self {
        CachingSubjectAttributeReader { inner, cache }
    }
}

impl SubjectAttributeReader for CachingSubjectAttributeReader {
    fn attributes_by_scope(
        &self,
        zone: &str,
        subject_id: &str,
        scopes: Option<&HashSet<Attribute>>,
    ) -> Result<HashSet<Attribute>> {
        if scopes.is_some() {
            return self.inner.attributes_by_scope(zone, subject_id, scopes);
        }
        if let Some(cached) = self.cache.get(zone, subject_id) {
            debug!(zone, subject_id, "subject attribute cache hit");
            return Ok(cached.attributes);
        }
        let attributes = self.inner.attributes_by_scope(zone, subject_id, None)?;
        self.cache
            .set(zone, subject_id, CachedAttributes::new(attributes.clone()));
        Ok(attributes)
    }
}
