//! Tokenizer for the condition scripting language
//!
//! The token set is the whole surface of the language: literals, the three
//! bound identifiers, comparison and boolean operators, parentheses and
//! method-call punctuation. Any other character is a syntax error, which is
//! the first layer of the sandbox — statements, assignments, definitions and
//! imports have no token to be written with.

use crate::error::ConditionParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    True,
    False,
    LeftParen,
    RightParen,
    Dot,
    Comma,
    Eq,
    NotEq,
    And,
    Or,
    Not,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Keywords of general-purpose languages that have no place in a boolean
/// condition. Rejected with a targeted error rather than "unknown
/// identifier" so policy authors see the sandbox rule they hit.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "import", "def", "class", "new", "while", "for", "return", "package", "try", "catch",
    "throw", "assert",
];

pub fn tokenize(input: &str) -> Result<Vec<Token>, ConditionParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::LeftParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RightParen);
                chars.next();
            }
            '.' => {
                tokens.push(Token::Dot);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(ConditionParseError::Syntax(
                        "assignment is not permitted; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::And);
                } else {
                    return Err(ConditionParseError::Syntax(
                        "single '&' is not permitted; use '&&'".to_string(),
                    ));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::Or);
                } else {
                    return Err(ConditionParseError::Syntax(
                        "single '|' is not permitted; use '||'".to_string(),
                    ));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => break,
                        }
                    } else if c == quote {
                        closed = true;
                        break;
                    } else {
                        value.push(c);
                    }
                }
                if !closed {
                    return Err(ConditionParseError::Syntax(
                        "unterminated string literal".to_string(),
                    ));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits.parse::<i64>().map_err(|_| {
                    ConditionParseError::Syntax(format!("integer literal '{}' out of range", digits))
                })?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&i) = chars.peek() {
                    if i.is_ascii_alphanumeric() || i == '_' {
                        ident.push(i);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if FORBIDDEN_KEYWORDS.contains(&ident.as_str()) {
                    return Err(ConditionParseError::ForbiddenKeyword(ident));
                }
                let token = match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(ident),
                };
                tokens.push(token);
            }
            _ => {
                return Err(ConditionParseError::Syntax(format!(
                    "unexpected character '{}'",
                    ch
                )));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_method_call() {
        let tokens = tokenize("resource.attributes('issuer1', 'region')").unwrap();
        assert_eq!(tokens[0], Token::Ident("resource".to_string()));
        assert_eq!(tokens[1], Token::Dot);
        assert_eq!(tokens[2], Token::Ident("attributes".to_string()));
        assert_eq!(tokens[3], Token::LeftParen);
        assert_eq!(tokens[4], Token::Str("issuer1".to_string()));
        assert_eq!(tokens[5], Token::Comma);
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a == b && c != d || !e").unwrap();
        assert!(tokens.contains(&Token::Eq));
        assert!(tokens.contains(&Token::And));
        assert!(tokens.contains(&Token::NotEq));
        assert!(tokens.contains(&Token::Or));
        assert!(tokens.contains(&Token::Not));
    }

    #[test]
    fn test_both_quote_styles() {
        let single = tokenize("'hello'").unwrap();
        let double = tokenize("\"hello\"").unwrap();
        assert_eq!(single, double);
        assert_eq!(single[0], Token::Str("hello".to_string()));
    }

    #[test]
    fn test_escaped_quote() {
        let tokens = tokenize(r#"'it\'s'"#).unwrap();
        assert_eq!(tokens[0], Token::Str("it's".to_string()));
    }

    #[test]
    fn test_assignment_rejected() {
        assert!(matches!(
            tokenize("x = 1"),
            Err(ConditionParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_forbidden_keywords_rejected() {
        for source in ["import foo", "def f()", "class X", "new Thing()"] {
            assert!(
                matches!(tokenize(source), Err(ConditionParseError::ForbiddenKeyword(_))),
                "expected keyword rejection for {:?}",
                source
            );
        }
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("'oops"),
            Err(ConditionParseError::Syntax(_))
        ));
    }

    #[test]
    fn test_unexpected_character() {
        for source in ["a; b", "x + y", "a { }", "m[0]"] {
            assert!(tokenize(source).is_err(), "expected rejection for {:?}", source);
        }
    }
}
