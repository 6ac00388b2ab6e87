//! Runtime values of the condition language

use crate::condition::handler::{HandlerGroup, ResourceHandler, SubjectHandler};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Every value a condition expression can produce or pass around.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    /// A set of attribute values, as returned by `attributes(issuer, name)`.
    Set(BTreeSet<String>),
    Resource(Arc<ResourceHandler>),
    Subject(Arc<SubjectHandler>),
    Group(HandlerGroup),
    /// The `match` helper object.
    Matcher,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Set(_) => "set",
            Value::Resource(_) => "resource handler",
            Value::Subject(_) => "subject handler",
            Value::Group(_) => "handler group",
            Value::Matcher => "matcher",
        }
    }
}

/// Equality semantics of the `==`/`!=` operators.
///
/// Primitives and sets compare structurally. Handlers compare by identity,
/// not content: two distinct handlers are never equal, even when both are
/// empty, so `resource != subject` always holds for separately bound
/// handlers. Values of different kinds are never equal.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Resource(a), Value::Resource(b)) => Arc::ptr_eq(a, b),
            (Value::Subject(a), Value::Subject(b)) => Arc::ptr_eq(a, b),
            (Value::Matcher, Value::Matcher) => true,
            _ => false,
        }
    }
}
