//! Evaluation orchestration
//!
//! Ties the primitives together for one evaluation request: decision-cache
//! lookup, policy matching, per-policy condition evaluation, explicit effect
//! combining, and decision caching with dependency markers. Matchers and
//! resolvers are constructed fresh per request; the service itself is shared
//! and carries only the caches.

use crate::cache::{DecisionCache, DecisionRequest};
use crate::condition::{
    Bindings, CompiledConditionCache, ConditionCompiler, ResourceHandler, SubjectHandler,
};
use crate::error::{PalisadeError, Result};
use crate::matcher::{
    MatchCandidate, MatchedPolicy, PolicyMatcher, ResourceAttributeReader, SubjectAttributeReader,
};
use crate::policy::{Effect, Policy, PolicySet};
use crate::template::TemplateCache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    /// No policy matched, or no matched policy's conditions held.
    NotApplicable,
    /// A condition failed at runtime (non-boolean result, unbound variable).
    /// Deliberately neither permit nor deny; never cached.
    Indeterminate,
}

/// How the effects of multiple applicable policies combine into one
/// decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    /// Policy order is authoritative: the first matched policy whose
    /// conditions all hold determines the effect.
    #[default]
    FirstApplicable,
    /// Any applicable deny wins over any number of permits.
    DenyOverrides,
}

/// One evaluation request: a candidate evaluated under a zone's policy set.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub zone: String,
    pub policy_set_id: String,
    pub candidate: MatchCandidate,
}

/// The evaluation outcome handed back to callers and held by the decision
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    /// Name of the policy that determined the decision, when one did.
    pub matched_policy: Option<String>,
    /// Resource URIs reached through attribute-URI indirection; dependencies
    /// for targeted invalidation.
    #[serde(default)]
    pub resolved_resource_uris: HashSet<String>,
}

/// Shared evaluation facade for all zones.
pub struct PolicyEvaluationService {
    resource_reader: Arc<dyn ResourceAttributeReader>,
    subject_reader: Arc<dyn SubjectAttributeReader>,
    templates: TemplateCache,
    compiler: ConditionCompiler,
    decision_cache: Arc<dyn DecisionCache>,
    combining: CombiningAlgorithm,
}

impl PolicyEvaluationService {
    pub fn new(
        resource_reader: Arc<dyn ResourceAttributeReader>,
        subject_reader: Arc<dyn SubjectAttributeReader>,
        condition_cache: Arc<dyn CompiledConditionCache>,
        decision_cache: Arc<dyn DecisionCache>,
        combining: CombiningAlgorithm,
    ) -> Self {
        PolicyEvaluationService {
            resource_reader,
            subject_reader,
            templates: TemplateCache::default(),
            compiler: ConditionCompiler::new(condition_cache),
            decision_cache,
            combining,
        }
    }

    pub fn with_template_capacity(mut self, capacity: usize) -> Self {
        self.templates = TemplateCache::new(capacity);
        self
    }

    /// Evaluate one request under the zone's ordered policies.
    ///
    /// Consults the decision cache first; on a miss, matches and evaluates
    /// conditions, then caches any determinate outcome together with its
    /// dependency markers.
    pub fn evaluate(
        &self,
        request: &EvaluationRequest,
        policies: &[Policy],
    ) -> Result<EvaluationResult> {
        let decision_request = DecisionRequest {
            zone: &request.zone,
            policy_set_id: &request.policy_set_id,
            candidate: &request.candidate,
        };
        if let Some(cached) = self.decision_cache.get(&decision_request) {
            debug!(zone = %request.zone, "decision cache hit");
            return Ok(cached);
        }

        let matcher = PolicyMatcher::new(
            &request.zone,
            &request.candidate,
            self.resource_reader.as_ref(),
            self.subject_reader.as_ref(),
            &self.templates,
        );
        let match_result = matcher.match_for_result(policies)?;

        let (decision, matched_policy) =
            self.combine(&request.candidate, &match_result.matched_policies)?;
        let result = EvaluationResult {
            decision,
            matched_policy,
            resolved_resource_uris: match_result.resolved_resource_uris,
        };

        if decision != Decision::Indeterminate {
            self.decision_cache.put(&decision_request, &result);
        }
        Ok(result)
    }

    /// Validate a policy set before activation, fail-closed: every target
    /// URI template must parse, every required attribute type must carry an
    /// issuer and a name, and every condition must compile. Compiled
    /// conditions land in the condition cache for later evaluation.
    pub fn validate_policy_set(&self, policy_set: &PolicySet) -> Result<()> {
        for policy in &policy_set.policies {
            let Some(target) = &policy.target else {
                continue;
            };
            if let Some(resource) = &target.resource {
                self.templates.get_or_parse(&resource.uri_template)?;
                if let Some(attribute_template) = resource.attribute_uri_template() {
                    self.templates.get_or_parse(attribute_template)?;
                }
                self.require_well_formed(policy, &resource.attributes, "resource")?;
            }
            if let Some(subject) = &target.subject {
                self.require_well_formed(policy, &subject.attributes, "subject")?;
            }
        }
        self.compiler.compile_policy_set(policy_set)?;
        info!(
            policy_set = policy_set.name.as_deref().unwrap_or("<unnamed>"),
            policies = policy_set.policies.len(),
            "policy set validated"
        );
        Ok(())
    }

    /// Invalidate everything derived from a policy set that is being
    /// replaced or removed: its compiled conditions and every cached
    /// decision computed under it.
    pub fn invalidate_policy_set(&self, zone: &str, policy_set_id: &str, policy_set: &PolicySet) {
        self.compiler.evict_policy_set(policy_set);
        self.decision_cache.reset_for_policy_set(zone, policy_set_id);
    }

    /// Invalidation hooks for the resource/subject administration
    /// subsystems; see [`DecisionCache`].
    pub fn reset_for_resource(&self, zone: &str, resource_id: &str) {
        self.decision_cache.reset_for_resource(zone, resource_id);
    }

    pub fn reset_for_resources(&self, zone: &str, resource_ids: &[String]) {
        self.decision_cache.reset_for_resources(zone, resource_ids);
    }

    pub fn reset_for_subject(&self, zone: &str, subject_id: &str) {
        self.decision_cache.reset_for_subject(zone, subject_id);
    }

    pub fn reset_for_subjects(&self, zone: &str, subject_ids: &[String]) {
        self.decision_cache.reset_for_subjects(zone, subject_ids);
    }

    fn require_well_formed(
        &self,
        policy: &Policy,
        attributes: &[crate::attribute::AttributeType],
        kind: &str,
    ) -> Result<()> {
        for attribute_type in attributes {
            if !attribute_type.is_well_formed() {
                return Err(PalisadeError::MalformedPolicyTarget {
                    policy: policy.display_name().to_string(),
                    detail: format!("{} attribute {} is missing issuer or name", kind, attribute_type),
                });
            }
        }
        Ok(())
    }

    fn combine(
        &self,
        candidate: &MatchCandidate,
        matched: &[MatchedPolicy],
    ) -> Result<(Decision, Option<String>)> {
        match self.combining {
            CombiningAlgorithm::FirstApplicable => {
                for matched_policy in matched {
                    match self.policy_applies(candidate, matched_policy) {
                        Ok(true) => {
                            return Ok((
                                effect_decision(matched_policy.policy.effect),
                                matched_policy.policy.name.clone(),
                            ))
                        }
                        Ok(false) => continue,
                        Err(e) => {
                            warn!(
                                policy = matched_policy.policy.display_name(),
                                error = %e,
                                "condition evaluation error; decision is indeterminate"
                            );
                            return Ok((
                                Decision::Indeterminate,
                                matched_policy.policy.name.clone(),
                            ));
                        }
                    }
                }
                Ok((Decision::NotApplicable, None))
            }
            CombiningAlgorithm::DenyOverrides => {
                let mut permit: Option<String> = None;
                for matched_policy in matched {
                    match self.policy_applies(candidate, matched_policy) {
                        Ok(true) => match matched_policy.policy.effect {
                            Effect::Deny => {
                                return Ok((
                                    Decision::Deny,
                                    matched_policy.policy.name.clone(),
                                ))
                            }
                            Effect::Permit => {
                                permit.get_or_insert_with(|| {
                                    matched_policy
                                        .policy
                                        .name
                                        .clone()
                                        .unwrap_or_default()
                                });
                            }
                        },
                        Ok(false) => continue,
                        Err(e) => {
                            // A failed condition here could have been a
                            // deny; the whole decision is indeterminate.
                            warn!(
                                policy = matched_policy.policy.display_name(),
                                error = %e,
                                "condition evaluation error; decision is indeterminate"
                            );
                            return Ok((
                                Decision::Indeterminate,
                                matched_policy.policy.name.clone(),
                            ));
                        }
                    }
                }
                match permit {
                    Some(name) => Ok((
                        Decision::Permit,
                        if name.is_empty() { None } else { Some(name) },
                    )),
                    None => Ok((Decision::NotApplicable, None)),
                }
            }
        }
    }

    /// A policy applies when all of its conditions evaluate `true`. A hard
    /// condition error (non-boolean result, unbound variable, compile
    /// failure that escaped validation) propagates.
    fn policy_applies(
        &self,
        candidate: &MatchCandidate,
        matched_policy: &MatchedPolicy,
    ) -> Result<bool> {
        if matched_policy.policy.conditions.is_empty() {
            return Ok(true);
        }

        let bindings = self.bindings_for(candidate, matched_policy)?;
        for condition in &matched_policy.policy.conditions {
            let compiled = self.compiler.compile(&condition.condition)?;
            if !compiled.execute(&bindings)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn bindings_for(
        &self,
        candidate: &MatchCandidate,
        matched_policy: &MatchedPolicy,
    ) -> Result<Bindings> {
        let uri_template = match matched_policy
            .policy
            .target
            .as_ref()
            .and_then(|t| t.resource.as_ref())
        {
            Some(resource) => Some(self.templates.get_or_parse(&resource.uri_template)?),
            None => None,
        };

        // uriVariable extracts from the request URI against the policy's
        // own template; indirection changes where attributes come from, not
        // the URI the template is read against.
        let resource = ResourceHandler::new(
            "resource",
            &matched_policy.resource_attributes,
            candidate.resource_uri.clone(),
            uri_template,
        );
        let subject = SubjectHandler::new("subject", &matched_policy.subject_attributes);
        Ok(Bindings::standard(resource, subject))
    }
}

fn effect_decision(effect: Effect) -> Decision {
    match effect {
        Effect::Permit => Decision::Permit,
        Effect::Deny => Decision::Deny,
    }
}
