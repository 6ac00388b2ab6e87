use thiserror::Error;

/// Reasons a condition script is rejected at compile time.
///
/// Every variant is a hard failure: an invalid condition blocks activation
/// of the policy set that carries it (fail-closed), it never evaluates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionParseError {
    #[error("condition script is empty")]
    Empty,

    #[error("condition script exceeds {max} characters (got {length})")]
    TooLong { max: usize, length: usize },

    #[error("condition script nesting exceeds depth {max}")]
    TooDeep { max: usize },

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("identifier '{0}' is not permitted in condition scripts")]
    ForbiddenIdentifier(String),

    #[error("unknown identifier '{0}' (only 'resource', 'subject' and 'match' are bound)")]
    UnknownIdentifier(String),

    #[error("method '{0}' is not permitted in condition scripts")]
    ForbiddenMethod(String),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("keyword '{0}' is not permitted in condition scripts")]
    ForbiddenKeyword(String),
}

#[derive(Error, Debug)]
pub enum PalisadeError {
    #[error("invalid condition: {0}")]
    ConditionParse(#[from] ConditionParseError),

    #[error("condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    #[error("condition result is not a boolean (got {0})")]
    NonBooleanCondition(String),

    #[error("failed to retrieve attributes for '{identifier}': {source}")]
    AttributeRetrieval {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid URI template '{template}': {reason}")]
    InvalidUriTemplate { template: String, reason: String },

    #[error("policy '{policy}' has a malformed target attribute: {detail}")]
    MalformedPolicyTarget { policy: String, detail: String },

    #[error("invalid cache key '{0}'")]
    InvalidCacheKey(String),

    #[error("cache store failure: {0}")]
    CacheStore(#[source] anyhow::Error),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PalisadeError>;
