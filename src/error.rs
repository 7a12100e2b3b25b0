//! Error types for the Tomb compiler

use thiserror::Error;

/// Compiler errors
///
/// Every diagnostic that points at source text carries the 1-based line and
/// column where the offending construct begins. Any error aborts compilation
/// of the current top-level module; there is no partial-success mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed or unterminated token
    ///
    /// **Triggered by:** unterminated strings or `asm` blocks, characters
    /// outside the language's alphabet
    #[error("lex error at line {line}, column {column}: {message}")]
    Lex {
        /// Line number where the error occurred
        line: usize,
        /// Column number where the error occurred
        column: usize,
        /// Error description
        message: String,
    },

    /// Unexpected or missing token
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// Line number where the error occurred
        line: usize,
        /// Column number where the error occurred
        column: usize,
        /// Error description
        message: String,
    },

    /// Unknown identifier, library, event, or trigger name
    #[error("resolution error at line {line}, column {column}: {message}")]
    Resolution {
        /// Line number where the error occurred
        line: usize,
        /// Column number where the error occurred
        column: usize,
        /// Error description
        message: String,
    },

    /// Mismatched types in an assignment, condition, argument, binary
    /// operand, or return expression
    #[error("type error at line {line}, column {column}: {message}")]
    Type {
        /// Line number where the error occurred
        line: usize,
        /// Column number where the error occurred
        column: usize,
        /// Error description
        message: String,
    },

    /// Structurally invalid construct
    ///
    /// **Triggered by:** a bad constructor signature, `emit` outside a
    /// contract, a register alias collision, a member access on a
    /// non-collection variable, an invalid event description
    #[error("shape error at line {line}, column {column}: {message}")]
    Shape {
        /// Line number where the error occurred
        line: usize,
        /// Column number where the error occurred
        column: usize,
        /// Error description
        message: String,
    },

    /// Broken compiler invariant
    ///
    /// **Triggered by:** a register leak, a double free, pool exhaustion,
    /// an out-of-range rewind. These indicate a bug in the compiler itself,
    /// not in the compiled source.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a lex error at a source position
    pub fn lex(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Lex {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a syntax error at a source position
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a resolution error at a source position
    pub fn resolution(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Resolution {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a type error at a source position
    pub fn type_mismatch(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Type {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a shape error at a source position
    pub fn shape(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Shape {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Source line of the diagnostic, if it points at source text
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Lex { line, .. }
            | Error::Syntax { line, .. }
            | Error::Resolution { line, .. }
            | Error::Type { line, .. }
            | Error::Shape { line, .. } => Some(*line),
            Error::Internal(_) => None,
        }
    }
}

/// Result type for Tomb compiler operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_position() {
        let err = Error::type_mismatch(7, 3, "expected boolean condition");
        assert_eq!(
            err.to_string(),
            "type error at line 7, column 3: expected boolean condition"
        );
        assert_eq!(err.line(), Some(7));
    }

    #[test]
    fn test_internal_error_has_no_position() {
        let err = Error::internal("register r4 not deallocated");
        assert!(err.to_string().contains("register r4 not deallocated"));
        assert_eq!(err.line(), None);
    }
}
