//! Configuration errors raised while a query shape is built, normalized or rendered.
//!
//! Every failure of the engine is a programming mistake in the query shape, so
//! there is a single error type and nothing is retried.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    // containers
    #[error("no container has been added to the query yet")]
    NoContainer,
    #[error("unknown container alias '{alias}'")]
    UnknownContainer { alias: String },
    #[error("container alias '{alias}' is declared twice")]
    DuplicateContainer { alias: String },
    #[error("container alias omitted but the query has {count} containers")]
    AmbiguousContainer { count: usize },
    #[error("query has no root container")]
    MissingRoot,
    #[error("query declares two root containers: '{first}' and '{second}'")]
    MultipleRoots { first: String, second: String },
    #[error("root container '{alias}' must not have connect conditions")]
    RootHasConnect { alias: String },
    #[error("connect condition on '{alias}' references its own container")]
    SelfReferencingConnect { alias: String },
    #[error("cross join '{alias}' must not have connect conditions")]
    CrossJoinWithConnect { alias: String },
    #[error("join '{alias}' has no connect condition")]
    JoinWithoutConnect { alias: String },
    #[error("circular dependency between containers: {}", containers.join(", "))]
    CircularDependency { containers: Vec<String> },

    // builder structure
    #[error("and()/or() has no preceding condition")]
    CombinatorWithoutCondition,
    #[error("and()/or() called twice without a condition in between")]
    RepeatedCombinator,
    #[error("and()/or() is still waiting for a following condition")]
    DanglingCombinator,
    #[error("end_group() without an open group")]
    UnmatchedEndGroup,
    #[error("group closed before any condition was added to it")]
    EmptyGroup,
    #[error("{open} group(s) opened with begin_group() are never closed")]
    UnclosedGroup { open: usize },
    #[error("auto-parenthesization corrupted: {reason}")]
    AutoParenthesisCorrupted { reason: String },
    #[error("malformed condition encoding: {reason}")]
    MalformedEncoding { reason: String },
    #[error("{operation} is not supported by {kind} queries")]
    UnsupportedOperation { kind: String, operation: String },

    // operands and types
    #[error("operator {operator} cannot be used on '{field}': {reason}")]
    InvalidOperand {
        field: String,
        operator: String,
        reason: String,
    },
    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("field '{field}' is not nullable")]
    NullNotAllowed { field: String },
    #[error("operator {operator} is not valid for field-to-field comparisons")]
    InvalidFieldComparison { operator: String },
    #[error("case-insensitive {operator} is not valid on '{field}'")]
    InvalidCaseInsensitive { operator: String, field: String },
    #[error("parameter '{name}' is redeclared with a different type, nullability or direction")]
    ConflictingParameter { name: String },
    #[error("parameter '{name}' has no bound value")]
    UnboundParameter { name: String },

    // schema and script
    #[error("unknown field '{field}' on container '{container}'")]
    UnknownField { container: String, field: String },
    #[error("schema error: {0}")]
    Schema(String),
    #[error("script error: {0}")]
    Script(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::Schema(format!("invalid schema JSON: {error}"))
    }
}
