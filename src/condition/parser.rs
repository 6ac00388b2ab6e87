//! Sandboxing parser for condition scripts
//!
//! The sandbox is enforced here, at compile time, not by catching anything
//! at runtime. Three mechanisms compose:
//!
//! - the grammar itself: only boolean/int/string literals, the bound
//!   identifiers, comparisons, boolean operators and method calls exist;
//! - a closed method whitelist: a call to any method not listed fails to
//!   parse;
//! - an explicit blacklist that rejects process/runtime/reflection/IO
//!   identifiers and `execute`-style method names with a targeted error.
//!
//! Source length and expression nesting are bounded to keep hostile inputs
//! from exhausting the parser.

use crate::condition::ast::{CompareOp, CompiledCondition, Expr};
use crate::condition::token::{tokenize, Token};
use crate::error::ConditionParseError;

/// Upper bound on condition source length.
pub const MAX_SOURCE_LENGTH: usize = 2048;

/// Upper bound on expression nesting depth.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Receiver-less identifiers that name process, runtime, reflection or I/O
/// facilities in common scripting environments. None of them resolve here
/// anyway; rejecting them by name gives the policy author a sandbox error
/// instead of a generic unknown-identifier one.
const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "System",
    "Runtime",
    "Eval",
    "Process",
    "ProcessBuilder",
    "Thread",
    "File",
    "Files",
    "Path",
    "Paths",
    "Class",
    "ClassLoader",
    "Script",
    "Shell",
];

/// Method names that are rejected outright, whatever the receiver.
const FORBIDDEN_METHODS: &[&str] = &[
    "execute",
    "eval",
    "exec",
    "exit",
    "invoke",
    "getClass",
    "forName",
    "wait",
    "notify",
    "notifyAll",
    "run",
    "start",
    "load",
];

/// The complete callable surface of the language.
const ALLOWED_METHODS: &[&str] = &[
    "attributes",
    "has",
    "uriVariable",
    "and",
    "haveSame",
    "result",
    "any",
    "single",
    "equals",
    "contains",
    "containsAll",
    "startsWith",
    "endsWith",
    "isEmpty",
    "size",
    "toLowerCase",
    "toUpperCase",
];

/// Names bound at execution time without declaration.
const BOUND_IDENTIFIERS: &[&str] = &["resource", "subject", "match"];

/// Compile a condition script.
///
/// Fails on empty source, source over [`MAX_SOURCE_LENGTH`], nesting over
/// [`MAX_NESTING_DEPTH`], any syntax error, and any sandbox violation.
/// Successful compilation never executes the script.
pub fn parse(source: &str) -> Result<CompiledCondition, ConditionParseError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(ConditionParseError::Empty);
    }
    if source.len() > MAX_SOURCE_LENGTH {
        return Err(ConditionParseError::TooLong {
            max: MAX_SOURCE_LENGTH,
            length: source.len(),
        });
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(ConditionParseError::Syntax(format!(
            "unexpected trailing input at token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(CompiledCondition::new(source.to_string(), expr))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionParseError> {
        match self.advance() {
            Some(token) if *token == expected => Ok(()),
            Some(token) => Err(ConditionParseError::Syntax(format!(
                "expected {:?}, got {:?}",
                expected, token
            ))),
            None => Err(ConditionParseError::Syntax(format!(
                "expected {:?}, got end of input",
                expected
            ))),
        }
    }

    // expr ::= or_expr
    fn parse_expr(&mut self) -> Result<Expr, ConditionParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ConditionParseError::TooDeep {
                max: MAX_NESTING_DEPTH,
            });
        }
        let expr = self.parse_or();
        self.depth -= 1;
        expr
    }

    // or_expr ::= and_expr (|| and_expr)*
    fn parse_or(&mut self) -> Result<Expr, ConditionParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.current(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and_expr ::= equality (&& equality)*
    fn parse_and(&mut self) -> Result<Expr, ConditionParseError> {
        let mut left = self.parse_equality()?;
        while matches!(self.current(), Some(Token::And)) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // equality ::= relational ((== | !=) relational)*
    fn parse_equality(&mut self) -> Result<Expr, ConditionParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.current() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Compare {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    // relational ::= unary ((< | <= | > | >=) unary)*
    fn parse_relational(&mut self) -> Result<Expr, ConditionParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Compare {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    // unary ::= ! unary | postfix
    fn parse_unary(&mut self) -> Result<Expr, ConditionParseError> {
        if matches!(self.current(), Some(Token::Not)) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(expr)));
        }
        self.parse_postfix()
    }

    // postfix ::= primary (. method ( args ))*
    fn parse_postfix(&mut self) -> Result<Expr, ConditionParseError> {
        let mut expr = self.parse_primary()?;
        while matches!(self.current(), Some(Token::Dot)) {
            self.advance();
            let method = match self.advance() {
                Some(Token::Ident(name)) => name.clone(),
                other => {
                    return Err(ConditionParseError::Syntax(format!(
                        "expected method name after '.', got {:?}",
                        other
                    )))
                }
            };
            if FORBIDDEN_METHODS.contains(&method.as_str()) {
                return Err(ConditionParseError::ForbiddenMethod(method));
            }
            if !ALLOWED_METHODS.contains(&method.as_str()) {
                return Err(ConditionParseError::UnknownMethod(method));
            }
            self.expect(Token::LeftParen)?;
            let args = self.parse_args()?;
            expr = Expr::MethodCall {
                receiver: Box::new(expr),
                method,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ConditionParseError> {
        let mut args = Vec::new();
        if matches!(self.current(), Some(Token::RightParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RightParen) => break,
                other => {
                    return Err(ConditionParseError::Syntax(format!(
                        "expected ',' or ')' in argument list, got {:?}",
                        other
                    )))
                }
            }
        }
        Ok(args)
    }

    // primary ::= literal | identifier | ( expr )
    fn parse_primary(&mut self) -> Result<Expr, ConditionParseError> {
        match self.advance() {
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Int(value)) => Ok(Expr::Int(*value)),
            Some(Token::Str(value)) => Ok(Expr::Str(value.clone())),
            Some(Token::LeftParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if BOUND_IDENTIFIERS.contains(&name.as_str()) {
                    return Ok(Expr::Var(name));
                }
                if FORBIDDEN_IDENTIFIERS.contains(&name.as_str()) {
                    return Err(ConditionParseError::ForbiddenIdentifier(name));
                }
                Err(ConditionParseError::UnknownIdentifier(name))
            }
            other => Err(ConditionParseError::Syntax(format!(
                "expected expression, got {:?}",
                other
            ))),
        }
    }
}
