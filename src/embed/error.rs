// Host-facing errors
// Every failure that crosses the embedding boundary is one of these

use super::value::ValueTag;
use crate::error::GarnetError;
use crate::vm::runtime::Runtime;
use crate::vm::value::Value as RawValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Invalid creation options
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The source did not compile
    #[error("{message} (line {line}, column {column})")]
    Compile {
        message: String,
        line: usize,
        column: usize,
    },

    /// An exception escaped the script
    #[error("{class}: {message}")]
    Runtime {
        class: String,
        message: String,
        backtrace: Vec<String>,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: ValueTag,
    },

    #[error("no host representation for {0} values")]
    UnsupportedType(ValueTag),

    /// The operation is not valid in the current state
    #[error("invalid state: {0}")]
    State(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        Error::State(message.into())
    }

    /// Snapshot an exception object that reached the host
    pub(crate) fn from_exception(runtime: &Runtime, exception: &RawValue) -> Self {
        Error::Runtime {
            class: runtime.class_of(exception).name.clone(),
            message: runtime.exception_message(exception),
            backtrace: runtime.exception_backtrace(exception),
        }
    }

    /// Exception class name when this is a runtime error
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Error::Runtime { class, .. } => Some(class),
            _ => None,
        }
    }
}

impl From<GarnetError> for Error {
    fn from(error: GarnetError) -> Self {
        Error::Compile {
            message: error.message,
            line: error.span.start.line,
            column: error.span.start.column,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GarnetError, Span};

    #[test]
    fn test_compile_error_keeps_position() {
        let diagnostic = GarnetError::syntax_error("unexpected 'end'", Span::single(3, 7, 20), "t.rb");
        let error = Error::from(diagnostic);
        assert_eq!(
            error,
            Error::Compile {
                message: "unexpected 'end'".to_string(),
                line: 3,
                column: 7,
            }
        );
        assert_eq!(error.to_string(), "unexpected 'end' (line 3, column 7)");
    }

    #[test]
    fn test_display_forms() {
        let error = Error::TypeMismatch {
            expected: "integer",
            found: ValueTag::Float,
        };
        assert_eq!(error.to_string(), "type mismatch: expected integer, found float");
        assert_eq!(
            Error::UnsupportedType(ValueTag::Proc).to_string(),
            "no host representation for proc values"
        );
    }
}
