//! Policy matching
//!
//! Given a match candidate and a zone's ordered policy list, the matcher
//! returns the policies whose target matches, each paired with the attribute
//! sets resolved while matching it. Attribute resolution is lazy and
//! memoized within one matcher invocation; a matcher instance lives for a
//! single evaluation request.

mod resolver;

pub use resolver::{
    CachingResourceAttributeReader, CachingSubjectAttributeReader, ResourceAttributeReader,
    ResourceAttributeResolver, ResourceResolution, SubjectAttributeReader,
    SubjectAttributeResolver, ATTRIBUTE_URI_VARIABLE,
};

use crate::attribute::{contains_type, Attribute, AttributeType};
use crate::error::{PalisadeError, Result};
use crate::policy::Policy;
use crate::template::TemplateCache;
use std::collections::HashSet;
use tracing::debug;

/// The normalized input to matching: one action on one resource by one
/// subject, with optional supplemental attributes supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct MatchCandidate {
    pub action: String,
    pub resource_uri: String,
    pub subject_identifier: String,
    /// Optional scope restriction on externally granted subject attributes.
    pub subject_scopes: Option<HashSet<Attribute>>,
    pub supplemental_resource_attributes: HashSet<Attribute>,
    pub supplemental_subject_attributes: HashSet<Attribute>,
}

impl MatchCandidate {
    pub fn new(
        action: impl Into<String>,
        resource_uri: impl Into<String>,
        subject_identifier: impl Into<String>,
    ) -> Self {
        MatchCandidate {
            action: action.into(),
            resource_uri: resource_uri.into(),
            subject_identifier: subject_identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_resource_attributes(mut self, attributes: HashSet<Attribute>) -> Self {
        self.supplemental_resource_attributes = attributes;
        self
    }

    pub fn with_subject_attributes(mut self, attributes: HashSet<Attribute>) -> Self {
        self.supplemental_subject_attributes = attributes;
        self
    }

    pub fn with_subject_scopes(mut self, scopes: HashSet<Attribute>) -> Self {
        self.subject_scopes = Some(scopes);
        self
    }
}

/// A policy whose target matched, with the attributes resolved while
/// evaluating it. Attribute sets may differ between matched policies because
/// of per-policy attribute-URI indirection.
#[derive(Debug, Clone)]
pub struct MatchedPolicy {
    pub policy: Policy,
    pub resource_attributes: HashSet<Attribute>,
    pub subject_attributes: HashSet<Attribute>,
    /// The URI whose attributes were queried for this policy.
    pub resolved_resource_uri: String,
}

/// Matching outcome plus the resource URIs reached through attribute-URI
/// indirection. Callers use the latter to key decision-cache invalidation on
/// the resolved URI rather than the raw request URI.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched_policies: Vec<MatchedPolicy>,
    pub resolved_resource_uris: HashSet<String>,
}

/// Matches one candidate against a policy list. Construct a fresh matcher
/// per evaluation request.
pub struct PolicyMatcher<'a> {
    candidate: &'a MatchCandidate,
    templates: &'a TemplateCache,
    resource_resolver: ResourceAttributeResolver<'a>,
    subject_resolver: SubjectAttributeResolver<'a>,
}

impl<'a> PolicyMatcher<'a> {
    pub fn new(
        zone: &'a str,
        candidate: &'a MatchCandidate,
        resource_reader: &'a dyn ResourceAttributeReader,
        subject_reader: &'a dyn SubjectAttributeReader,
        templates: &'a TemplateCache,
    ) -> Self {
        let resource_resolver = ResourceAttributeResolver::new(
            resource_reader,
            templates,
            zone,
            &candidate.resource_uri,
            &candidate.supplemental_resource_attributes,
        );
        let subject_resolver = SubjectAttributeResolver::new(
            subject_reader,
            zone,
            &candidate.subject_identifier,
            &candidate.supplemental_subject_attributes,
        );
        PolicyMatcher {
            candidate,
            templates,
            resource_resolver,
            subject_resolver,
        }
    }

    /// The matched policies, in policy-list order.
    pub fn match_policies(&self, policies: &[Policy]) -> Result<Vec<MatchedPolicy>> {
        Ok(self.match_for_result(policies)?.matched_policies)
    }

    /// The matched policies plus every resource URI reached through
    /// attribute-URI indirection while matching.
    pub fn match_for_result(&self, policies: &[Policy]) -> Result<MatchResult> {
        let mut result = MatchResult::default();
        for policy in policies {
            if let Some(matched) = self.match_policy(policy, &mut result.resolved_resource_uris)? {
                result.matched_policies.push(matched);
            }
        }
        debug!(
            action = %self.candidate.action,
            resource_uri = %self.candidate.resource_uri,
            subject = %self.candidate.subject_identifier,
            matched = result.matched_policies.len(),
            total = policies.len(),
            "policy matching complete"
        );
        Ok(result)
    }

    fn match_policy(
        &self,
        policy: &Policy,
        resolved_uris: &mut HashSet<String>,
    ) -> Result<Option<MatchedPolicy>> {
        // Action gate first: no attribute resolution for policies that
        // cannot apply to this action.
        if let Some(target) = &policy.target {
            if !target.matches_action(&self.candidate.action) {
                return Ok(None);
            }
        }

        let subject_attributes = self
            .subject_resolver
            .resolve(self.candidate.subject_scopes.as_ref())?;
        if let Some(subject_target) = policy.target.as_ref().and_then(|t| t.subject.as_ref()) {
            if !self.required_types_present(
                policy,
                &subject_target.attributes,
                &subject_attributes,
                "subject",
            )? {
                return Ok(None);
            }
        }

        let resource_target = policy.target.as_ref().and_then(|t| t.resource.as_ref());
        let resolution = match resource_target {
            Some(resource_target) => {
                let template = self.templates.get_or_parse(&resource_target.uri_template)?;
                if !template.matches(&self.candidate.resource_uri) {
                    return Ok(None);
                }

                let resolution = self.resource_resolver.resolve(policy)?;
                if resource_target.attribute_uri_template().is_some()
                    && !resolution.attribute_uri_template_found
                {
                    // The policy asked to be matched against indirected
                    // attributes it cannot reach from this request URI.
                    return Ok(None);
                }
                if resolution.attribute_uri_template_found {
                    resolved_uris.insert(resolution.resolved_uri.clone());
                }

                if !self.required_types_present(
                    policy,
                    &resource_target.attributes,
                    &resolution.attributes,
                    "resource",
                )? {
                    return Ok(None);
                }
                resolution
            }
            None => self.resource_resolver.resolve(policy)?,
        };

        Ok(Some(MatchedPolicy {
            policy: policy.clone(),
            resource_attributes: resolution.attributes,
            subject_attributes,
            resolved_resource_uri: resolution.resolved_uri,
        }))
    }

    /// Every required `(issuer, name)` must be present by type. An empty
    /// issuer or name on a required attribute is malformed policy data and
    /// propagates rather than being swallowed as a non-match.
    fn required_types_present(
        &self,
        policy: &Policy,
        required: &[AttributeType],
        resolved: &HashSet<Attribute>,
        kind: &str,
    ) -> Result<bool> {
        for attribute_type in required {
            if !attribute_type.is_well_formed() {
                return Err(PalisadeError::MalformedPolicyTarget {
                    policy: policy.display_name().to_string(),
                    detail: format!("{} attribute {} is missing issuer or name", kind, attribute_type),
                });
            }
            if !contains_type(resolved, attribute_type) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
