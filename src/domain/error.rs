//! Engine error types.

/// A parse error with position information for expression parsing.
///
/// Carries the original input so callers always see the full expression
/// alongside the offending position.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message} in {input:?}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
    pub input: String,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\nparse error at position {position}: {message}",
            input = self.input,
            caret = caret,
            position = self.position,
            message = self.message
        )
    }
}

/// Top-level error type for barscript.
///
/// Everything except [`BarscriptError::BadTimestamp`] is raised at
/// parse/compile time, before any evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BarscriptError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown field {name:?}, expected one of {valid:?}")]
    UnknownField { name: String, valid: Vec<String> },

    #[error("unknown interval {name:?}, expected one of {valid:?}")]
    UnknownInterval { name: String, valid: Vec<String> },

    #[error("Unknown function {name:?}, did you mean one of {suggestions:?}?")]
    UnknownFunction {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("{function} can only be used with literal parameters")]
    NotLiteral { function: String },

    #[error("{function} expects {expected} arguments, got {got}")]
    BadArity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("{function} requires exactly one interval, got {intervals:?}")]
    IntervalConflict {
        function: String,
        intervals: Vec<String>,
    },

    #[error("{indicator} requires fields not present for {interval}: {fields:?}")]
    MissingFields {
        indicator: String,
        interval: String,
        fields: Vec<String>,
    },

    #[error("invalid session option {field}: {reason}")]
    BadSession { field: String, reason: String },

    #[error("unparseable timestamp {value:?}")]
    BadTimestamp { value: String },
}
