//! Attributes describing resources and subjects
//!
//! An attribute is an `(issuer, name, value)` fact attached to a resource or
//! a subject. Matching never looks at values: a policy target requires
//! attribute *types*, and a type is the `(issuer, name)` pair.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// A single attribute fact. Immutable once constructed.
///
/// Set membership uses the full triple, so a resource may carry several
/// values for the same `(issuer, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub issuer: String,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(
        issuer: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Attribute {
            issuer: issuer.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// The `(issuer, name)` key this attribute is indexed by.
    pub fn attribute_type(&self) -> AttributeType {
        AttributeType::new(self.issuer.clone(), self.name.clone())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.issuer, self.name, self.value)
    }
}

/// The matching identity of an attribute: issuer plus name, value ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeType {
    pub issuer: String,
    pub name: String,
}

impl AttributeType {
    pub fn new(issuer: impl Into<String>, name: impl Into<String>) -> Self {
        AttributeType {
            issuer: issuer.into(),
            name: name.into(),
        }
    }

    /// A required target attribute with an empty issuer or name is
    /// malformed policy data, not a non-match.
    pub fn is_well_formed(&self) -> bool {
        !self.issuer.is_empty() && !self.name.is_empty()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.issuer, self.name)
    }
}

/// Index an attribute set by type.
///
/// Each `(issuer, name)` maps to the set of values carried for it; the
/// ordered value sets keep handler output deterministic.
pub fn index_by_type(attributes: &HashSet<Attribute>) -> HashMap<AttributeType, BTreeSet<String>> {
    let mut index: HashMap<AttributeType, BTreeSet<String>> = HashMap::new();
    for attribute in attributes {
        index
            .entry(attribute.attribute_type())
            .or_default()
            .insert(attribute.value.clone());
    }
    index
}

/// True if the set carries at least one attribute of the given type.
pub fn contains_type(attributes: &HashSet<Attribute>, attribute_type: &AttributeType) -> bool {
    attributes.iter().any(|a| {
        a.issuer == attribute_type.issuer && a.name == attribute_type.name
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_membership_uses_value() {
        let mut set = HashSet::new();
        set.insert(Attribute::new("https://acme.example", "group", "sales"));
        set.insert(Attribute::new("https://acme.example", "group", "research"));

        assert_eq!(set.len(), 2);
        assert!(contains_type(
            &set,
            &AttributeType::new("https://acme.example", "group")
        ));
        assert!(!contains_type(
            &set,
            &AttributeType::new("https://acme.example", "site")
        ));
    }

    #[test]
    fn test_index_by_type_collects_values() {
        let mut set = HashSet::new();
        set.insert(Attribute::new("issuer1", "group", "sales"));
        set.insert(Attribute::new("issuer1", "group", "research"));
        set.insert(Attribute::new("issuer1", "site", "boston"));

        let index = index_by_type(&set);
        assert_eq!(index.len(), 2);

        let groups = &index[&AttributeType::new("issuer1", "group")];
        assert_eq!(groups.len(), 2);
        assert!(groups.contains("sales"));
        assert!(groups.contains("research"));
    }

    #[test]
    fn test_well_formed_type() {
        assert!(AttributeType::new("issuer1", "group").is_well_formed());
        assert!(!AttributeType::new("", "group").is_well_formed());
        assert!(!AttributeType::new("issuer1", "").is_well_formed());
    }

    #[test]
    fn test_attribute_json_roundtrip() {
        let attribute = Attribute::new("https://acme.example", "region", "testregion");
        let json = serde_json::to_string(&attribute).unwrap();
        let parsed: Attribute = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, attribute);
    }
}
