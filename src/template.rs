//! URI template matching and variable extraction
//!
//! Templates use `{variable}` path segments, e.g.
//! `/sites/{site_id}/department/{department_id}`. Matching is canonical: a
//! variable matches exactly one non-empty path segment, every literal
//! segment must match exactly, and both sides are normalized to a leading
//! slash with no trailing slash before comparison.

use crate::error::{PalisadeError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A parsed URI template.
///
/// Compiled once into an anchored regex with one named capture group per
/// `{variable}`; reuse through [`TemplateCache`] keeps the compile off the
/// evaluation hot path.
#[derive(Debug)]
pub struct UriTemplate {
    source: String,
    regex: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Parse a template string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUriTemplate` on unbalanced braces, an empty or
    /// non-identifier variable name, or a duplicated variable name.
    pub fn parse(template: &str) -> Result<Self> {
        let normalized = normalize(template);

        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut chars = normalized.chars();
        let mut literal = String::new();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    pattern.push_str(&regex::escape(&literal));
                    literal.clear();

                    let mut name = String::new();
                    let mut closed = false;
                    for ch in chars.by_ref() {
                        if ch == '}' {
                            closed = true;
                            break;
                        }
                        name.push(ch);
                    }
                    if !closed {
                        return Err(invalid(template, "unbalanced '{'"));
                    }
                    if !is_valid_variable_name(&name) {
                        return Err(invalid(
                            template,
                            &format!("invalid variable name '{}'", name),
                        ));
                    }
                    if variables.iter().any(|v| v == &name) {
                        return Err(invalid(
                            template,
                            &format!("duplicate variable name '{}'", name),
                        ));
                    }
                    pattern.push_str(&format!("(?P<{}>[^/]+)", name));
                    variables.push(name);
                }
                '}' => return Err(invalid(template, "unbalanced '}'")),
                _ => literal.push(ch),
            }
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| invalid(template, &e.to_string()))?;

        Ok(UriTemplate {
            source: template.to_string(),
            regex,
            variables,
        })
    }

    /// The template text this was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names in template order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// True if the URI matches this template.
    pub fn matches(&self, uri: &str) -> bool {
        self.regex.is_match(&normalize(uri))
    }

    /// All variable bindings, or `None` when the URI does not match.
    pub fn match_variables(&self, uri: &str) -> Option<HashMap<String, String>> {
        let normalized = normalize(uri);
        let captures = self.regex.captures(&normalized)?;
        let mut bindings = HashMap::new();
        for name in &self.variables {
            if let Some(value) = captures.name(name) {
                bindings.insert(name.clone(), value.as_str().to_string());
            }
        }
        Some(bindings)
    }

    /// A single variable binding, or `None` when the URI does not match or
    /// the template has no such variable.
    pub fn variable(&self, uri: &str, name: &str) -> Option<String> {
        let normalized = normalize(uri);
        let captures = self.regex.captures(&normalized)?;
        captures.name(name).map(|m| m.as_str().to_string())
    }
}

/// Normalize a path: leading slash, no trailing slash, empty becomes `/`.
fn normalize(path: &str) -> String {
    let path = path.trim().trim_start_matches('/').trim_end_matches('/');
    if path.is_empty() {
        return "/".to_string();
    }
    format!("/{}", path)
}

fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(template: &str, reason: &str) -> PalisadeError {
    PalisadeError::InvalidUriTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}

/// Bounded cache of parsed templates, keyed by template text.
///
/// Shared across evaluation requests; policies reuse a small number of
/// templates so the hot set stays resident.
pub struct TemplateCache {
    cache: Mutex<LruCache<String, Arc<UriTemplate>>>,
}

impl TemplateCache {
    pub fn new(capacity: usize) -> Self {
        TemplateCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    /// Fetch the parsed template, compiling and inserting on miss.
    pub fn get_or_parse(&self, template: &str) -> Result<Arc<UriTemplate>> {
        if let Some(parsed) = self.cache.lock().get(template) {
            return Ok(parsed.clone());
        }
        let parsed = Arc::new(UriTemplate::parse(template)?);
        self.cache
            .lock()
            .put(template.to_string(), parsed.clone());
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        TemplateCache::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let template = UriTemplate::parse("/sites/boston").unwrap();
        assert!(template.matches("/sites/boston"));
        assert!(!template.matches("/sites/chicago"));
        assert!(!template.matches("/sites/boston/floors"));
    }

    #[test]
    fn test_variable_extraction() {
        let template =
            UriTemplate::parse("site/{site_id}/department/{department_id}").unwrap();
        let uri = "/site/boston/department/sales";

        assert!(template.matches(uri));
        assert_eq!(template.variable(uri, "site_id").as_deref(), Some("boston"));
        assert_eq!(
            template.variable(uri, "department_id").as_deref(),
            Some("sales")
        );
        assert_eq!(template.variable(uri, "floor_id"), None);
    }

    #[test]
    fn test_variable_matches_single_nonempty_segment() {
        let template = UriTemplate::parse("/sites/{site_id}").unwrap();
        assert!(template.matches("/sites/boston"));
        assert!(!template.matches("/sites/"));
        assert!(!template.matches("/sites/boston/extra"));
    }

    #[test]
    fn test_mismatch_yields_no_variables() {
        let template = UriTemplate::parse("/sites/{site_id}").unwrap();
        assert_eq!(template.match_variables("/alarms/boston"), None);
        assert_eq!(template.variable("/alarms/boston", "site_id"), None);
    }

    #[test]
    fn test_normalization() {
        let template = UriTemplate::parse("sites/{site_id}/").unwrap();
        assert!(template.matches("/sites/boston"));
        assert!(template.matches("sites/boston/"));
    }

    #[test]
    fn test_invalid_templates() {
        assert!(UriTemplate::parse("/sites/{site_id").is_err());
        assert!(UriTemplate::parse("/sites/site_id}").is_err());
        assert!(UriTemplate::parse("/sites/{}").is_err());
        assert!(UriTemplate::parse("/sites/{bad name}").is_err());
        assert!(UriTemplate::parse("/{x}/{x}").is_err());
    }

    #[test]
    fn test_template_cache_reuses_parse() {
        let cache = TemplateCache::new(4);
        let first = cache.get_or_parse("/sites/{site_id}").unwrap();
        let second = cache.get_or_parse("/sites/{site_id}").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_template_cache_propagates_parse_errors() {
        let cache = TemplateCache::new(4);
        assert!(cache.get_or_parse("/sites/{").is_err());
        assert!(cache.is_empty());
    }
}
