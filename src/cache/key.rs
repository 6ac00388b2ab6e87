//! Decision-cache key formats
//!
//! One flat keystore holds four disjoint key classes:
//!
//! - `ev:{zone}:{fingerprint}` — evaluation-result entries
//! - `rc:{zone}:{entity}:{fingerprint}` — resource-changed markers
//! - `sc:{zone}:{entity}:{fingerprint}` — subject-changed markers
//! - `ps:{zone}:{entity}:{fingerprint}` — policy-set-changed markers
//!
//! `entity` and `fingerprint` are 16-hex-digit xxh3 hashes, so identifiers
//! containing `:` or `/` can never break the key grammar. A marker key links
//! one dependency of one cached evaluation; invalidation scans markers by
//! pattern and never parses values.

use crate::attribute::Attribute;
use crate::matcher::MatchCandidate;
use std::collections::{BTreeSet, HashSet};
use xxhash_rust::xxh3::xxh3_64;

const EVALUATION_PREFIX: &str = "ev";
const RESOURCE_PREFIX: &str = "rc";
const SUBJECT_PREFIX: &str = "sc";
const POLICY_SET_PREFIX: &str = "ps";

/// The key class a well-formed key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    EvaluationResult,
    ResourceChanged,
    SubjectChanged,
    PolicySetChanged,
}

/// 16-hex-digit xxh3 hash of an entity identifier.
pub fn entity_hash(identifier: &str) -> String {
    format!("{:016x}", xxh3_64(identifier.as_bytes()))
}

/// Fingerprint of one evaluation request, stable under attribute ordering.
pub fn request_fingerprint(zone: &str, policy_set_id: &str, candidate: &MatchCandidate) -> String {
    // Canonical form: positional request fields, then each attribute set
    // sorted, with US/RS delimiters between fields.
    let mut canonical = String::new();
    for field in [
        zone,
        policy_set_id,
        candidate.action.as_str(),
        candidate.resource_uri.as_str(),
        candidate.subject_identifier.as_str(),
    ] {
        canonical.push_str(field);
        canonical.push('\u{1f}');
    }

    let mut push_attributes = |label: &str, attributes: Option<&HashSet<Attribute>>| {
        canonical.push_str(label);
        canonical.push('\u{1f}');
        if let Some(attributes) = attributes {
            let sorted: BTreeSet<String> = attributes
                .iter()
                .map(|a| format!("{}\u{1e}{}\u{1e}{}", a.issuer, a.name, a.value))
                .collect();
            for attribute in sorted {
                canonical.push_str(&attribute);
                canonical.push('\u{1f}');
            }
        }
    };
    push_attributes("r", Some(&candidate.supplemental_resource_attributes));
    push_attributes("s", Some(&candidate.supplemental_subject_attributes));
    push_attributes("o", candidate.subject_scopes.as_ref());

    format!("{:016x}", xxh3_64(canonical.as_bytes()))
}

pub fn evaluation_key(zone: &str, fingerprint: &str) -> String {
    format!("{}:{}:{}", EVALUATION_PREFIX, zone, fingerprint)
}

pub fn resource_marker_key(zone: &str, resource_id: &str, fingerprint: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        RESOURCE_PREFIX,
        zone,
        entity_hash(resource_id),
        fingerprint
    )
}

pub fn subject_marker_key(zone: &str, subject_id: &str, fingerprint: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        SUBJECT_PREFIX,
        zone,
        entity_hash(subject_id),
        fingerprint
    )
}

pub fn policy_set_marker_key(zone: &str, policy_set_id: &str, fingerprint: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        POLICY_SET_PREFIX,
        zone,
        entity_hash(policy_set_id),
        fingerprint
    )
}

pub fn resource_marker_pattern(zone: &str, resource_id: &str) -> String {
    format!("{}:{}:{}:*", RESOURCE_PREFIX, zone, entity_hash(resource_id))
}

pub fn subject_marker_pattern(zone: &str, subject_id: &str) -> String {
    format!("{}:{}:{}:*", SUBJECT_PREFIX, zone, entity_hash(subject_id))
}

pub fn policy_set_marker_pattern(zone: &str, policy_set_id: &str) -> String {
    format!(
        "{}:{}:{}:*",
        POLICY_SET_PREFIX,
        zone,
        entity_hash(policy_set_id)
    )
}

/// The trailing fingerprint of a marker key.
pub fn marker_fingerprint(marker_key: &str) -> Option<&str> {
    marker_key.rsplit(':').next().filter(|fp| is_hash(fp))
}

/// Classify a key, or `None` when it matches no recognized format.
pub fn key_class(key: &str) -> Option<KeyClass> {
    let segments: Vec<&str> = key.split(':').collect();
    match segments.as_slice() {
        [EVALUATION_PREFIX, zone, fingerprint] if is_zone(zone) && is_hash(fingerprint) => {
            Some(KeyClass::EvaluationResult)
        }
        [prefix, zone, entity, fingerprint]
            if is_zone(zone) && is_hash(entity) && is_hash(fingerprint) =>
        {
            match *prefix {
                RESOURCE_PREFIX => Some(KeyClass::ResourceChanged),
                SUBJECT_PREFIX => Some(KeyClass::SubjectChanged),
                POLICY_SET_PREFIX => Some(KeyClass::PolicySetChanged),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_zone(zone: &str) -> bool {
    !zone.is_empty()
}

fn is_hash(segment: &str) -> bool {
    segment.len() == 16 && segment.chars().all(|c| c.is_ascii_hexdigit())
}
