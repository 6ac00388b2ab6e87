//! Domain handlers exposed to condition scripts
//!
//! A handler indexes the attribute set it was bound with by
//! `(issuer, name)` and exposes the assertion-style predicates condition
//! scripts are written against. The original "throws to signal false" idiom
//! becomes an explicit assertion `Result`; only the condition execution
//! boundary converts a failed assertion into `false`.

use crate::attribute::{index_by_type, Attribute, AttributeType};
use crate::template::UriTemplate;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A failed `has`/`haveSame` assertion. Caught by the condition execution
/// boundary and coerced to `false` there, never propagated as a system
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionAssertionFailure {
    pub message: String,
}

impl ConditionAssertionFailure {
    fn new(message: String) -> Self {
        ConditionAssertionFailure { message }
    }
}

impl fmt::Display for ConditionAssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// The resource bound into a condition script.
#[derive(Debug)]
pub struct ResourceHandler {
    name: String,
    attributes: HashMap<AttributeType, BTreeSet<String>>,
    resource_uri: String,
    uri_template: Option<Arc<UriTemplate>>,
}

impl ResourceHandler {
    /// `resource_uri` is the resolved URI this handler's attributes were
    /// fetched for; `uri_template` is the matching policy's resource URI
    /// template, used for `uriVariable`.
    pub fn new(
        name: impl Into<String>,
        attributes: &HashSet<Attribute>,
        resource_uri: impl Into<String>,
        uri_template: Option<Arc<UriTemplate>>,
    ) -> Self {
        ResourceHandler {
            name: name.into(),
            attributes: index_by_type(attributes),
            resource_uri: resource_uri.into(),
            uri_template,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value set carried for `(issuer, name)`, empty when absent.
    pub fn attribute_values(&self, issuer: &str, name: &str) -> BTreeSet<String> {
        self.attributes
            .get(&AttributeType::new(issuer, name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_type(&self, attribute_type: &AttributeType) -> bool {
        self.attributes.contains_key(attribute_type)
    }

    /// Assertion-style presence check: non-failure is "true".
    pub fn assert_has(
        &self,
        issuer: &str,
        name: &str,
    ) -> Result<(), ConditionAssertionFailure> {
        assert_handler_has(&self.name, &self.attributes, issuer, name)
    }

    /// Extract a path variable from the resolved resource URI using the
    /// policy's URI template. Returns `""` when the template, the URI or
    /// the variable is unavailable.
    pub fn uri_variable(&self, variable: &str) -> String {
        let Some(template) = &self.uri_template else {
            return String::new();
        };
        if self.resource_uri.is_empty() {
            return String::new();
        }
        template
            .variable(&self.resource_uri, variable)
            .unwrap_or_default()
    }
}

/// The subject bound into a condition script.
#[derive(Debug)]
pub struct SubjectHandler {
    name: String,
    attributes: HashMap<AttributeType, BTreeSet<String>>,
}

impl SubjectHandler {
    pub fn new(name: impl Into<String>, attributes: &HashSet<Attribute>) -> Self {
        SubjectHandler {
            name: name.into(),
            attributes: index_by_type(attributes),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute_values(&self, issuer: &str, name: &str) -> BTreeSet<String> {
        self.attributes
            .get(&AttributeType::new(issuer, name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_type(&self, attribute_type: &AttributeType) -> bool {
        self.attributes.contains_key(attribute_type)
    }

    pub fn assert_has(
        &self,
        issuer: &str,
        name: &str,
    ) -> Result<(), ConditionAssertionFailure> {
        assert_handler_has(&self.name, &self.attributes, issuer, name)
    }
}

fn assert_handler_has(
    handler: &str,
    attributes: &HashMap<AttributeType, BTreeSet<String>>,
    issuer: &str,
    name: &str,
) -> Result<(), ConditionAssertionFailure> {
    let attribute_type = AttributeType::new(issuer, name);
    if attributes.contains_key(&attribute_type) {
        Ok(())
    } else {
        Err(ConditionAssertionFailure::new(format!(
            "handler '{}' does not have attribute {}",
            handler, attribute_type
        )))
    }
}

/// Either handler kind, as composed into a group by `and`.
#[derive(Debug, Clone)]
pub enum HandlerRef {
    Resource(Arc<ResourceHandler>),
    Subject(Arc<SubjectHandler>),
}

impl HandlerRef {
    pub fn name(&self) -> &str {
        match self {
            HandlerRef::Resource(h) => h.name(),
            HandlerRef::Subject(h) => h.name(),
        }
    }

    fn has_type(&self, attribute_type: &AttributeType) -> bool {
        match self {
            HandlerRef::Resource(h) => h.has_type(attribute_type),
            HandlerRef::Subject(h) => h.has_type(attribute_type),
        }
    }

    fn values(&self, issuer: &str, name: &str) -> BTreeSet<String> {
        match self {
            HandlerRef::Resource(h) => h.attribute_values(issuer, name),
            HandlerRef::Subject(h) => h.attribute_values(issuer, name),
        }
    }
}

/// An ordered group of handlers built by chaining `and`.
#[derive(Debug, Clone)]
pub struct HandlerGroup {
    handlers: Vec<HandlerRef>,
}

impl HandlerGroup {
    pub fn pair(first: HandlerRef, second: HandlerRef) -> Self {
        HandlerGroup {
            handlers: vec![first, second],
        }
    }

    pub fn and(mut self, handler: HandlerRef) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Assert that every handler in the group carries `(issuer, name)` and
    /// that the value sets intersect sequentially: each handler's set is
    /// intersected against the running accumulator, and the first failure
    /// names the handlers accumulated so far.
    pub fn assert_have_same(
        &self,
        issuer: &str,
        name: &str,
    ) -> Result<(), ConditionAssertionFailure> {
        let attribute_type = AttributeType::new(issuer, name);
        let mut handlers = self.handlers.iter();

        let Some(first) = handlers.next() else {
            return Ok(());
        };
        if !first.has_type(&attribute_type) {
            return Err(ConditionAssertionFailure::new(format!(
                "handler '{}' does not have attribute {}",
                first.name(),
                attribute_type
            )));
        }

        let mut accumulated = first.values(issuer, name);
        let mut names = vec![first.name().to_string()];

        for handler in handlers {
            if !handler.has_type(&attribute_type) {
                return Err(ConditionAssertionFailure::new(format!(
                    "handler '{}' does not have attribute {}",
                    handler.name(),
                    attribute_type
                )));
            }
            let values = handler.values(issuer, name);
            accumulated = accumulated.intersection(&values).cloned().collect();
            if accumulated.is_empty() {
                return Err(ConditionAssertionFailure::new(format!(
                    "handlers [{}] share no value for attribute {} with '{}'",
                    names.join(", "),
                    attribute_type,
                    handler.name()
                )));
            }
            names.push(handler.name().to_string());
        }

        Ok(())
    }
}

/// The `match` helper: plain set predicates with no assertion semantics.
pub struct AttributeMatcher;

impl AttributeMatcher {
    /// True iff the two sets have a non-empty intersection.
    pub fn any(first: &BTreeSet<String>, second: &BTreeSet<String>) -> bool {
        first.intersection(second).next().is_some()
    }

    /// True iff `value` is a member of `set`.
    pub fn single(set: &BTreeSet<String>, value: &str) -> bool {
        set.contains(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str, &str)]) -> HashSet<Attribute> {
        pairs
            .iter()
            .map(|(i, n, v)| Attribute::new(*i, *n, *v))
            .collect()
    }

    #[test]
    fn test_attribute_values_by_type() {
        let handler = ResourceHandler::new(
            "resource",
            &attrs(&[
                ("issuer1", "region", "east"),
                ("issuer1", "region", "west"),
                ("issuer1", "site", "boston"),
            ]),
            "/sites/boston",
            None,
        );

        let regions = handler.attribute_values("issuer1", "region");
        assert_eq!(regions.len(), 2);
        assert!(regions.contains("east"));
        assert!(handler.attribute_values("issuer1", "floor").is_empty());
    }

    #[test]
    fn test_assert_has() {
        let handler = SubjectHandler::new("subject", &attrs(&[("issuer1", "group", "ops")]));
        assert!(handler.assert_has("issuer1", "group").is_ok());

        let failure = handler.assert_has("issuer1", "site").unwrap_err();
        assert!(failure.message.contains("subject"));
        assert!(failure.message.contains("site"));
    }

    #[test]
    fn test_uri_variable_extraction() {
        let template =
            Arc::new(UriTemplate::parse("site/{site_id}/department/{department_id}").unwrap());
        let handler = ResourceHandler::new(
            "resource",
            &HashSet::new(),
            "/site/boston/department/sales",
            Some(template),
        );

        assert_eq!(handler.uri_variable("site_id"), "boston");
        assert_eq!(handler.uri_variable("department_id"), "sales");
        assert_eq!(handler.uri_variable("floor_id"), "");
    }

    #[test]
    fn test_uri_variable_unavailable() {
        let no_template =
            ResourceHandler::new("resource", &HashSet::new(), "/site/boston", None);
        assert_eq!(no_template.uri_variable("site_id"), "");

        let template = Arc::new(UriTemplate::parse("site/{site_id}").unwrap());
        let mismatched = ResourceHandler::new(
            "resource",
            &HashSet::new(),
            "/department/sales",
            Some(template),
        );
        assert_eq!(mismatched.uri_variable("site_id"), "");
    }

    #[test]
    fn test_have_same_with_intersection() {
        let resource = Arc::new(ResourceHandler::new(
            "resource",
            &attrs(&[("issuer1", "site", "boston"), ("issuer1", "site", "ny")]),
            "",
            None,
        ));
        let subject = Arc::new(SubjectHandler::new(
            "subject",
            &attrs(&[("issuer1", "site", "boston")]),
        ));

        let group = HandlerGroup::pair(
            HandlerRef::Resource(resource),
            HandlerRef::Subject(subject),
        );
        assert!(group.assert_have_same("issuer1", "site").is_ok());
    }

    #[test]
    fn test_have_same_disjoint_fails() {
        let resource = Arc::new(ResourceHandler::new(
            "resource",
            &attrs(&[("issuer1", "site", "boston")]),
            "",
            None,
        ));
        let subject = Arc::new(SubjectHandler::new(
            "subject",
            &attrs(&[("issuer1", "site", "chicago")]),
        ));

        let group = HandlerGroup::pair(
            HandlerRef::Resource(resource),
            HandlerRef::Subject(subject),
        );
        let failure = group.assert_have_same("issuer1", "site").unwrap_err();
        assert!(failure.message.contains("resource"));
        assert!(failure.message.contains("subject"));
    }

    #[test]
    fn test_have_same_missing_type_fails() {
        let resource = Arc::new(ResourceHandler::new(
            "resource",
            &attrs(&[("issuer1", "site", "boston")]),
            "",
            None,
        ));
        let subject = Arc::new(SubjectHandler::new("subject", &HashSet::new()));

        let group = HandlerGroup::pair(
            HandlerRef::Resource(resource),
            HandlerRef::Subject(subject),
        );
        assert!(group.assert_have_same("issuer1", "site").is_err());
    }

    #[test]
    fn test_have_same_sequential_accumulator() {
        // Three handlers: pairwise intersections exist between neighbors,
        // but the running accumulator empties at the third handler.
        let a = Arc::new(SubjectHandler::new(
            "a",
            &attrs(&[("i", "t", "1"), ("i", "t", "2")]),
        ));
        let b = Arc::new(SubjectHandler::new(
            "b",
            &attrs(&[("i", "t", "2"), ("i", "t", "3")]),
        ));
        let c = Arc::new(SubjectHandler::new(
            "c",
            &attrs(&[("i", "t", "3"), ("i", "t", "1")]),
        ));

        let group = HandlerGroup::pair(HandlerRef::Subject(a), HandlerRef::Subject(b))
            .and(HandlerRef::Subject(c));
        let failure = group.assert_have_same("i", "t").unwrap_err();
        assert!(failure.message.contains("[a, b]"));
    }

    #[test]
    fn test_matcher_any_and_single() {
        let first: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let second: BTreeSet<String> = ["b", "c"].iter().map(|s| s.to_string()).collect();
        let third: BTreeSet<String> = ["x"].iter().map(|s| s.to_string()).collect();

        assert!(AttributeMatcher::any(&first, &second));
        assert!(!AttributeMatcher::any(&first, &third));
        assert!(AttributeMatcher::single(&first, "a"));
        assert!(!AttributeMatcher::single(&first, "z"));
    }
}
