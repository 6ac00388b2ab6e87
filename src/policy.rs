//! Policy document structure
//!
//! A policy pairs a target (the action/resource/subject shape it applies to)
//! with zero or more sandboxed boolean conditions and an effect. Policies are
//! authored per zone and arrive here already deserialized and schema-checked
//! by the policy administration layer; this module owns only the matching
//! semantics of the document shape.

use crate::attribute::AttributeType;
use serde::{Deserialize, Serialize};

/// Effect a matched and satisfied policy contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Permit the request
    Permit,
    /// Deny the request
    Deny,
}

/// A named boolean condition in the sandboxed scripting language.
///
/// Bound at evaluation time to `resource`, `subject` and `match`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub condition: String,
}

impl Condition {
    pub fn new(condition: impl Into<String>) -> Self {
        Condition {
            name: None,
            condition: condition.into(),
        }
    }
}

/// The resource shape a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTarget {
    /// URI template the request resource URI must match,
    /// e.g. `/sites/{site_id}`.
    pub uri_template: String,

    /// Optional indirection: a template that extracts the `attribute_uri`
    /// variable from the request URI; the extracted value is the URI whose
    /// attributes are actually queried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_uri_template: Option<String>,

    /// Attribute types that must be present on the resolved resource.
    #[serde(default)]
    pub attributes: Vec<AttributeType>,
}

impl ResourceTarget {
    pub fn new(uri_template: impl Into<String>) -> Self {
        ResourceTarget {
            uri_template: uri_template.into(),
            attribute_uri_template: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute_uri_template(mut self, template: impl Into<String>) -> Self {
        self.attribute_uri_template = Some(template.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<AttributeType>) -> Self {
        self.attributes = attributes;
        self
    }

    /// A declared-but-blank indirection template means no indirection.
    pub fn attribute_uri_template(&self) -> Option<&str> {
        self.attribute_uri_template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// The subject shape a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTarget {
    /// Attribute types that must be present on the resolved subject.
    #[serde(default)]
    pub attributes: Vec<AttributeType>,
}

impl SubjectTarget {
    pub fn new(attributes: Vec<AttributeType>) -> Self {
        SubjectTarget { attributes }
    }
}

/// The action/resource/subject shape a policy applies to.
///
/// Every component is optional; an absent component matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Comma-separated action tokens (e.g. `"GET, POST"`), or absent for
    /// any action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectTarget>,
}

impl Target {
    /// The normalized action list: tokens trimmed, empties dropped.
    ///
    /// Returns `None` when there is no action constraint, including when the
    /// declared list normalizes to nothing but whitespace and commas.
    pub fn allowed_actions(&self) -> Option<Vec<&str>> {
        let raw = self.action.as_deref()?;
        let actions: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();
        if actions.is_empty() {
            None
        } else {
            Some(actions)
        }
    }

    /// True if the candidate action satisfies the action constraint.
    pub fn matches_action(&self, action: &str) -> bool {
        match self.allowed_actions() {
            None => true,
            Some(actions) => actions.contains(&action),
        }
    }
}

/// A single access-control policy: target + conditions + effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Absent target matches every request (conditions still apply).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    pub effect: Effect,
}

impl Policy {
    pub fn new(effect: Effect) -> Self {
        Policy {
            name: None,
            target: None,
            conditions: Vec::new(),
            effect,
        }
    }

    pub fn named(name: impl Into<String>, effect: Effect) -> Self {
        Policy {
            name: Some(name.into()),
            target: None,
            conditions: Vec::new(),
            effect,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Display name used in errors and logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed policy>")
    }
}

/// The ordered policy list of one zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new(policies: Vec<Policy>) -> Self {
        PolicySet {
            name: None,
            policies,
        }
    }
}
