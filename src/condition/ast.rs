//! Compiled condition representation

use crate::condition::eval::{evaluate, Bindings, EvalFailure};
use crate::condition::value::Value;
use crate::error::{PalisadeError, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Expression tree produced by the sandboxing parser.
///
/// Every reachable operation is listed here; there is no node for anything
/// the sandbox does not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Bool(bool),
    Int(i64),
    Str(String),
    /// One of the bound names (`resource`, `subject`, `match`).
    Var(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

/// A compiled, reusable condition. Compilation never executes the script;
/// execution is side-effect free and reusable across evaluations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCondition {
    source: String,
    expr: Expr,
}

impl CompiledCondition {
    pub(crate) fn new(source: String, expr: Expr) -> Self {
        CompiledCondition { source, expr }
    }

    /// The exact source text this condition was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the given bindings.
    ///
    /// The expression's final value must be a boolean; anything else is a
    /// hard evaluation error, never a silent `false`. A domain assertion
    /// failure (`has`, `haveSame`) raised inside the script is converted to
    /// `false` at exactly this boundary.
    pub fn execute(&self, bindings: &Bindings) -> Result<bool> {
        match evaluate(&self.expr, bindings) {
            Ok(Value::Bool(result)) => Ok(result),
            Ok(other) => Err(PalisadeError::NonBooleanCondition(
                other.type_name().to_string(),
            )),
            Err(EvalFailure::Assertion(message)) => {
                debug!(condition = %self.source, %message, "condition assertion failed");
                Ok(false)
            }
            Err(failure) => Err(PalisadeError::ConditionEvaluation(failure.to_string())),
        }
    }
}
