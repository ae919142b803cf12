use thiserror::Error;

/// Errors raised while compiling a JSON Schema into SQL.
///
/// Every variant except `InvalidLimit` is a schema-invalid condition: the
/// compile aborts with no partial state.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("unknown keyword: {0}")]
    UnknownKeyword(String),

    #[error("unknown format: {0}")]
    UnknownFormat(String),

    #[error("formatMaximum/formatMinimum requires a date, time or date-time format")]
    FormatComparisonWithoutFormat,

    #[error("invalid regular expression {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}
