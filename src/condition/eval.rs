//! Condition expression evaluation
//!
//! Pure tree-walking evaluation over [`Value`]s. Domain assertion failures
//! travel as `EvalFailure::Assertion` and are distinct from type failures:
//! only the former is coerced to `false`, and only at the execution boundary
//! in [`CompiledCondition::execute`](crate::condition::CompiledCondition::execute).

use crate::condition::ast::{CompareOp, Expr};
use crate::condition::handler::{
    AttributeMatcher, HandlerGroup, HandlerRef, ResourceHandler, SubjectHandler,
};
use crate::condition::value::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Why evaluation stopped without producing a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalFailure {
    /// A `has`/`haveSame` assertion did not hold. Control flow, not an
    /// error: the execution boundary converts this to `false`.
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),

    #[error("method '{method}' expects {expected} argument(s), got {got}")]
    Arity {
        method: String,
        expected: &'static str,
        got: usize,
    },
}

/// Named values bound into one condition execution.
#[derive(Default)]
pub struct Bindings {
    values: HashMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// The standard binding set: `resource`, `subject` and `match`.
    pub fn standard(resource: ResourceHandler, subject: SubjectHandler) -> Self {
        Bindings::new()
            .bind("resource", Value::Resource(Arc::new(resource)))
            .bind("subject", Value::Subject(Arc::new(subject)))
            .bind("match", Value::Matcher)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<Value, EvalFailure> {
    match expr {
        Expr::Bool(value) => Ok(Value::Bool(*value)),
        Expr::Int(value) => Ok(Value::Int(*value)),
        Expr::Str(value) => Ok(Value::Str(value.clone())),

        Expr::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalFailure::UnboundVariable(name.clone())),

        Expr::Not(inner) => {
            let value = evaluate(inner, bindings)?;
            Ok(Value::Bool(!expect_bool(value, "operand of '!'")?))
        }

        Expr::And(lhs, rhs) => {
            // Short-circuit: the right side is not evaluated when the left
            // side is already false.
            let left = expect_bool(evaluate(lhs, bindings)?, "operand of '&&'")?;
            if !left {
                return Ok(Value::Bool(false));
            }
            let right = expect_bool(evaluate(rhs, bindings)?, "operand of '&&'")?;
            Ok(Value::Bool(right))
        }

        Expr::Or(lhs, rhs) => {
            let left = expect_bool(evaluate(lhs, bindings)?, "operand of '||'")?;
            if left {
                return Ok(Value::Bool(true));
            }
            let right = expect_bool(evaluate(rhs, bindings)?, "operand of '||'")?;
            Ok(Value::Bool(right))
        }

        Expr::Compare { op, lhs, rhs } => {
            let left = evaluate(lhs, bindings)?;
            let right = evaluate(rhs, bindings)?;
            compare(*op, left, right)
        }

        Expr::MethodCall {
            receiver,
            method,
            args,
        } => {
            let receiver = evaluate(receiver, bindings)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(receiver, method, args)
        }
    }
}

fn compare(op: CompareOp, left: Value, right: Value) -> Result<Value, EvalFailure> {
    match op {
        CompareOp::Eq => Ok(Value::Bool(left == right)),
        CompareOp::Ne => Ok(Value::Bool(left != right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => {
                    return Err(EvalFailure::Type(format!(
                        "cannot order {} against {}",
                        left.type_name(),
                        right.type_name()
                    )))
                }
            };
            let result = match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn call_method(receiver: Value, method: &str, args: Vec<Value>) -> Result<Value, EvalFailure> {
    match method {
        "attributes" => {
            let (issuer, name) = two_strings(method, args)?;
            match receiver {
                Value::Resource(h) => Ok(Value::Set(h.attribute_values(&issuer, &name))),
                Value::Subject(h) => Ok(Value::Set(h.attribute_values(&issuer, &name))),
                other => Err(not_supported(method, &other)),
            }
        }

        "has" => match args.len() {
            2 => {
                let (issuer, name) = two_strings(method, args)?;
                match receiver {
                    Value::Resource(h) => {
                        h.assert_has(&issuer, &name)
                            .map_err(|f| EvalFailure::Assertion(f.message))?;
                        Ok(Value::Bool(true))
                    }
                    Value::Subject(h) => {
                        h.assert_has(&issuer, &name)
                            .map_err(|f| EvalFailure::Assertion(f.message))?;
                        Ok(Value::Bool(true))
                    }
                    other => Err(not_supported(method, &other)),
                }
            }
            3 => {
                let [issuer, name, value] = take_args::<3>(method, args)?;
                let issuer = expect_str(issuer, method)?;
                let name = expect_str(name, method)?;
                let value = expect_str(value, method)?;
                let (handler_name, values) = match &receiver {
                    Value::Resource(h) => (h.name().to_string(), h.attribute_values(&issuer, &name)),
                    Value::Subject(h) => (h.name().to_string(), h.attribute_values(&issuer, &name)),
                    other => return Err(not_supported(method, other)),
                };
                if values.contains(&value) {
                    Ok(Value::Bool(true))
                } else {
                    Err(EvalFailure::Assertion(format!(
                        "handler '{}' does not have attribute ({}, {}) with value '{}'",
                        handler_name, issuer, name, value
                    )))
                }
            }
            got => Err(EvalFailure::Arity {
                method: method.to_string(),
                expected: "2 or 3",
                got,
            }),
        },

        "uriVariable" => {
            let variable = one_string(method, args)?;
            match receiver {
                Value::Resource(h) => Ok(Value::Str(h.uri_variable(&variable))),
                other => Err(not_supported(method, &other)),
            }
        }

        "and" => {
            let arg = one_arg(method, args)?;
            let addition = handler_ref(arg, method)?;
            match receiver {
                Value::Resource(h) => Ok(Value::Group(HandlerGroup::pair(
                    HandlerRef::Resource(h),
                    addition,
                ))),
                Value::Subject(h) => Ok(Value::Group(HandlerGroup::pair(
                    HandlerRef::Subject(h),
                    addition,
                ))),
                Value::Group(group) => Ok(Value::Group(group.and(addition))),
                other => Err(not_supported(method, &other)),
            }
        }

        "haveSame" => {
            let (issuer, name) = two_strings(method, args)?;
            match receiver {
                Value::Group(group) => {
                    group
                        .assert_have_same(&issuer, &name)
                        .map_err(|f| EvalFailure::Assertion(f.message))?;
                    // Chainable: the group flows on for further assertions.
                    Ok(Value::Group(group))
                }
                other => Err(not_supported(method, &other)),
            }
        }

        "result" => {
            no_args(method, &args)?;
            match receiver {
                // Reaching result() means every chained assertion held.
                Value::Group(_) => Ok(Value::Bool(true)),
                other => Err(not_supported(method, &other)),
            }
        }

        "any" => {
            let (first, second) = two_sets(method, args)?;
            match receiver {
                Value::Matcher => Ok(Value::Bool(AttributeMatcher::any(&first, &second))),
                other => Err(not_supported(method, &other)),
            }
        }

        "single" => {
            let [set, value] = take_args::<2>(method, args)?;
            let set = expect_set(set, method)?;
            let value = expect_str(value, method)?;
            match receiver {
                Value::Matcher => Ok(Value::Bool(AttributeMatcher::single(&set, &value))),
                other => Err(not_supported(method, &other)),
            }
        }

        "equals" => {
            let arg = one_arg(method, args)?;
            Ok(Value::Bool(receiver == arg))
        }

        "contains" => {
            let needle = one_string(method, args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Bool(s.contains(&needle))),
                Value::Set(set) => Ok(Value::Bool(set.contains(&needle))),
                other => Err(not_supported(method, &other)),
            }
        }

        "containsAll" => {
            let arg = one_arg(method, args)?;
            let subset = expect_set(arg, method)?;
            match receiver {
                Value::Set(set) => Ok(Value::Bool(subset.is_subset(&set))),
                other => Err(not_supported(method, &other)),
            }
        }

        "startsWith" => {
            let prefix = one_string(method, args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Bool(s.starts_with(&prefix))),
                other => Err(not_supported(method, &other)),
            }
        }

        "endsWith" => {
            let suffix = one_string(method, args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Bool(s.ends_with(&suffix))),
                other => Err(not_supported(method, &other)),
            }
        }

        "isEmpty" => {
            no_args(method, &args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Bool(s.is_empty())),
                Value::Set(set) => Ok(Value::Bool(set.is_empty())),
                other => Err(not_supported(method, &other)),
            }
        }

        "size" => {
            no_args(method, &args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Set(set) => Ok(Value::Int(set.len() as i64)),
                other => Err(not_supported(method, &other)),
            }
        }

        "toLowerCase" => {
            no_args(method, &args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                other => Err(not_supported(method, &other)),
            }
        }

        "toUpperCase" => {
            no_args(method, &args)?;
            match receiver {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(not_supported(method, &other)),
            }
        }

        // The parser's whitelist makes this unreachable for compiled
        // conditions; kept as a type error for directly constructed ASTs.
        other => Err(EvalFailure::Type(format!("unknown method '{}'", other))),
    }
}

fn not_supported(method: &str, receiver: &Value) -> EvalFailure {
    EvalFailure::Type(format!(
        "method '{}' is not supported on {}",
        method,
        receiver.type_name()
    ))
}

fn expect_bool(value: Value, context: &str) -> Result<bool, EvalFailure> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalFailure::Type(format!(
            "{} must be a boolean, got {}",
            context,
            other.type_name()
        ))),
    }
}

fn expect_str(value: Value, method: &str) -> Result<String, EvalFailure> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(EvalFailure::Type(format!(
            "argument of '{}' must be a string, got {}",
            method,
            other.type_name()
        ))),
    }
}

fn expect_set(value: Value, method: &str) -> Result<BTreeSet<String>, EvalFailure> {
    match value {
        Value::Set(set) => Ok(set),
        other => Err(EvalFailure::Type(format!(
            "argument of '{}' must be a set, got {}",
            method,
            other.type_name()
        ))),
    }
}

fn handler_ref(value: Value, method: &str) -> Result<HandlerRef, EvalFailure> {
    match value {
        Value::Resource(h) => Ok(HandlerRef::Resource(h)),
        Value::Subject(h) => Ok(HandlerRef::Subject(h)),
        other => Err(EvalFailure::Type(format!(
            "argument of '{}' must be a handler, got {}",
            method,
            other.type_name()
        ))),
    }
}

/// Exactly `N` arguments, or an arity failure.
fn take_args<const N: usize>(method: &str, args: Vec<Value>) -> Result<[Value; N], EvalFailure> {
    let expected = match N {
        0 => "0",
        1 => "1",
        2 => "2",
        _ => "3",
    };
    <[Value; N]>::try_from(args).map_err(|args| EvalFailure::Arity {
        method: method.to_string(),
        expected,
        got: args.len(),
    })
}

fn one_arg(method: &str, args: Vec<Value>) -> Result<Value, EvalFailure> {
    let [value] = take_args::<1>(method, args)?;
    Ok(value)
}

fn one_string(method: &str, args: Vec<Value>) -> Result<String, EvalFailure> {
    expect_str(one_arg(method, args)?, method)
}

fn two_strings(method: &str, args: Vec<Value>) -> Result<(String, String), EvalFailure> {
    let [first, second] = take_args::<2>(method, args)?;
    Ok((expect_str(first, method)?, expect_str(second, method)?))
}

fn two_sets(
    method: &str,
    args: Vec<Value>,
) -> Result<(BTreeSet<String>, BTreeSet<String>), EvalFailure> {
    let [first, second] = take_args::<2>(method, args)?;
    Ok((expect_set(first, method)?, expect_set(second, method)?))
}

fn no_args(method: &str, args: &[Value]) -> Result<(), EvalFailure> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(EvalFailure::Arity {
            method: method.to_string(),
            expected: "0",
            got: args.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::condition::parser::parse;
    use crate::error::PalisadeError;
    use crate::template::UriTemplate;
    use std::collections::HashSet;

    fn attrs(pairs: &[(&str, &str, &str)]) -> HashSet<Attribute> {
        pairs
            .iter()
            .map(|(i, n, v)| Attribute::new(*i, *n, *v))
            .collect()
    }

    fn empty_bindings() -> Bindings {
        Bindings::standard(
            ResourceHandler::new("resource", &HashSet::new(), "", None),
            SubjectHandler::new("subject", &HashSet::new()),
        )
    }

    fn run(source: &str, bindings: &Bindings) -> crate::error::Result<bool> {
        parse(source).unwrap().execute(bindings)
    }

    #[test]
    fn test_string_equals() {
        let bindings = empty_bindings();
        assert!(run("\"a\".equals(\"a\")", &bindings).unwrap());
        assert!(!run("\"a\".equals(\"b\")", &bindings).unwrap());
    }

    #[test]
    fn test_distinct_empty_handlers_are_not_equal() {
        let bindings = empty_bindings();
        assert!(run("resource != subject", &bindings).unwrap());
        assert!(!run("resource == subject", &bindings).unwrap());
    }

    #[test]
    fn test_attributes_contains() {
        let bindings = Bindings::standard(
            ResourceHandler::new(
                "resource",
                &attrs(&[("issuerId1", "region", "testregion")]),
                "/alarms/sites/sanramon",
                None,
            ),
            SubjectHandler::new("subject", &HashSet::new()),
        );
        assert!(run(
            "resource.attributes('issuerId1', 'region').contains('testregion')",
            &bindings
        )
        .unwrap());
        assert!(!run(
            "resource.attributes('issuerId1', 'region').contains('otherregion')",
            &bindings
        )
        .unwrap());
    }

    #[test]
    fn test_failed_assertion_is_false_not_error() {
        let bindings = empty_bindings();
        assert!(!run("resource.has('issuer1', 'region')", &bindings).unwrap());
    }

    #[test]
    fn test_passing_assertion_is_true() {
        let bindings = Bindings::standard(
            ResourceHandler::new(
                "resource",
                &attrs(&[("issuer1", "region", "west")]),
                "",
                None,
            ),
            SubjectHandler::new("subject", &HashSet::new()),
        );
        assert!(run("resource.has('issuer1', 'region')", &bindings).unwrap());
        assert!(run("resource.has('issuer1', 'region', 'west')", &bindings).unwrap());
        assert!(!run("resource.has('issuer1', 'region', 'east')", &bindings).unwrap());
    }

    #[test]
    fn test_have_same_chain() {
        let shared = attrs(&[("issuer1", "site", "boston")]);
        let bindings = Bindings::standard(
            ResourceHandler::new("resource", &shared, "", None),
            SubjectHandler::new("subject", &shared),
        );
        assert!(run(
            "resource.and(subject).haveSame('issuer1', 'site').result()",
            &bindings
        )
        .unwrap());
    }

    #[test]
    fn test_have_same_disjoint_is_false() {
        let bindings = Bindings::standard(
            ResourceHandler::new("resource", &attrs(&[("issuer1", "site", "boston")]), "", None),
            SubjectHandler::new("subject", &attrs(&[("issuer1", "site", "chicago")])),
        );
        assert!(!run(
            "resource.and(subject).haveSame('issuer1', 'site').result()",
            &bindings
        )
        .unwrap());
    }

    #[test]
    fn test_match_helpers() {
        let bindings = Bindings::standard(
            ResourceHandler::new("resource", &attrs(&[("i", "group", "ops")]), "", None),
            SubjectHandler::new("subject", &attrs(&[("i", "group", "ops")])),
        );
        assert!(run(
            "match.any(resource.attributes('i', 'group'), subject.attributes('i', 'group'))",
            &bindings
        )
        .unwrap());
        assert!(run(
            "match.single(subject.attributes('i', 'group'), 'ops')",
            &bindings
        )
        .unwrap());
        assert!(!run(
            "match.single(subject.attributes('i', 'group'), 'admins')",
            &bindings
        )
        .unwrap());
    }

    #[test]
    fn test_uri_variable_in_script() {
        let template = std::sync::Arc::new(UriTemplate::parse("/alarms/sites/{site}").unwrap());
        let bindings = Bindings::standard(
            ResourceHandler::new(
                "resource",
                &HashSet::new(),
                "/alarms/sites/sanramon",
                Some(template),
            ),
            SubjectHandler::new("subject", &HashSet::new()),
        );
        assert!(run("resource.uriVariable('site').equals('sanramon')", &bindings).unwrap());
        assert!(run("resource.uriVariable('floor').isEmpty()", &bindings).unwrap());
    }

    #[test]
    fn test_non_boolean_result_is_hard_error() {
        let bindings = Bindings::standard(
            ResourceHandler::new("resource", &attrs(&[("i", "n", "v")]), "", None),
            SubjectHandler::new("subject", &HashSet::new()),
        );
        let result = run("resource.attributes('i', 'n')", &bindings);
        assert!(matches!(
            result,
            Err(PalisadeError::NonBooleanCondition(_))
        ));
    }

    #[test]
    fn test_type_error_propagates() {
        let bindings = empty_bindings();
        let result = run("subject.uriVariable('site')", &bindings);
        assert!(matches!(result, Err(PalisadeError::ConditionEvaluation(_))));
    }

    #[test]
    fn test_unbound_variable_is_hard_error() {
        let bindings = Bindings::new();
        let result = run("resource == subject", &bindings);
        assert!(matches!(result, Err(PalisadeError::ConditionEvaluation(_))));
    }

    #[test]
    fn test_integer_and_string_ordering() {
        let bindings = empty_bindings();
        assert!(run("1 < 2 && 2 <= 2 && 3 > 2 && 3 >= 3", &bindings).unwrap());
        assert!(run("'abc' < 'abd'", &bindings).unwrap());
        assert!(run("!(1 > 2)", &bindings).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_assertion() {
        // The right-hand assertion would fail; && must not evaluate it.
        let bindings = empty_bindings();
        assert!(!run("false && resource.has('i', 'n')", &bindings).unwrap());
        assert!(run("true || resource.has('i', 'n')", &bindings).unwrap());
    }

    #[test]
    fn test_string_helpers() {
        let bindings = empty_bindings();
        assert!(run("'sanramon'.startsWith('san')", &bindings).unwrap());
        assert!(run("'sanramon'.endsWith('ramon')", &bindings).unwrap());
        assert!(run("'SanRamon'.toLowerCase().equals('sanramon')", &bindings).unwrap());
        assert!(run("'abc'.size() == 3", &bindings).unwrap());
    }

    #[test]
    fn test_set_helpers() {
        let bindings = Bindings::standard(
            ResourceHandler::new(
                "resource",
                &attrs(&[("i", "g", "a"), ("i", "g", "b")]),
                "",
                None,
            ),
            SubjectHandler::new("subject", &attrs(&[("i", "g", "a")])),
        );
        assert!(run(
            "resource.attributes('i', 'g').containsAll(subject.attributes('i', 'g'))",
            &bindings
        )
        .unwrap());
        assert!(run("resource.attributes('i', 'g').size() == 2", &bindings).unwrap());
    }
}
