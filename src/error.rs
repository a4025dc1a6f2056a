// Garnet Error Handling Module
// Diagnostic errors with line numbers, spans, and stack traces

use colored::*;
use std::fmt;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn from_positions(
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start: Position::new(start_line, start_col, 0),
            end: Position::new(end_line, end_col, 0),
        }
    }

    pub fn single(line: usize, column: usize, offset: usize) -> Self {
        let pos = Position::new(line, column, offset);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span covering `self` through `other`
    pub fn to(&self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

/// Exception classes known to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    StandardError,
    RuntimeError,
    ArgumentError,
    TypeError,
    NameError,
    NoMethodError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    RangeError,
    LocalJumpError,
    FrozenError,
    SystemStackError,
    /// A user-defined exception class, by name
    Custom(String),
}

impl ErrorKind {
    pub fn class_name(&self) -> &str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::StandardError => "StandardError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NameError => "NameError",
            ErrorKind::NoMethodError => "NoMethodError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::LocalJumpError => "LocalJumpError",
            ErrorKind::FrozenError => "FrozenError",
            ErrorKind::SystemStackError => "SystemStackError",
            ErrorKind::Custom(name) => name,
        }
    }

    pub fn from_class_name(name: &str) -> Self {
        match name {
            "SyntaxError" => ErrorKind::SyntaxError,
            "StandardError" => ErrorKind::StandardError,
            "RuntimeError" => ErrorKind::RuntimeError,
            "ArgumentError" => ErrorKind::ArgumentError,
            "TypeError" => ErrorKind::TypeError,
            "NameError" => ErrorKind::NameError,
            "NoMethodError" => ErrorKind::NoMethodError,
            "ZeroDivisionError" => ErrorKind::ZeroDivisionError,
            "IndexError" => ErrorKind::IndexError,
            "KeyError" => ErrorKind::KeyError,
            "RangeError" => ErrorKind::RangeError,
            "LocalJumpError" => ErrorKind::LocalJumpError,
            "FrozenError" => ErrorKind::FrozenError,
            "SystemStackError" => ErrorKind::SystemStackError,
            other => ErrorKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// A stack frame for error traces
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub function_name: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl StackFrame {
    pub fn new(
        function_name: impl Into<String>,
        file: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:in '{}'",
            self.file, self.line, self.function_name
        )
    }
}

/// Main diagnostic error type for the compiler pipeline and the VM
#[derive(Debug, Clone)]
pub struct GarnetError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub help: Option<String>,
    source_lines: Vec<String>,
}

impl GarnetError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.into(),
            help: None,
            source_lines: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    /// Format the error for terminal display
    pub fn format(&self) -> String {
        let mut output = String::new();

        // Header: file:line:column: message (Kind)
        let header = format!(
            "{}:{}:{}: {} ({})",
            self.file,
            self.span.start.line,
            self.span.start.column,
            self.message.white().bold(),
            self.kind.to_string().red().bold(),
        );
        output.push_str(&header);
        output.push('\n');

        if !self.source_lines.is_empty() {
            let error_line = self.span.start.line;
            let start_line = if error_line > 1 { error_line - 1 } else { 1 };
            let end_line = (error_line + 1).min(self.source_lines.len());

            output.push('\n');

            for line_num in start_line..=end_line {
                if line_num <= self.source_lines.len() {
                    let line_content = &self.source_lines[line_num - 1];
                    let line_num_str = format!("{:>4} |", line_num);

                    if line_num == error_line {
                        output.push_str(&format!("{} {}\n", line_num_str.red(), line_content));

                        let spaces = " ".repeat(6 + self.span.start.column.saturating_sub(1));
                        let caret_len = if self.span.end.line == self.span.start.line
                            && self.span.end.column > self.span.start.column
                        {
                            self.span.end.column - self.span.start.column + 1
                        } else {
                            1
                        };
                        let carets = "^".repeat(caret_len);
                        output.push_str(&format!("{}{}\n", spaces, carets.red().bold()));
                    } else {
                        output.push_str(&format!("{} {}\n", line_num_str.dimmed(), line_content));
                    }
                }
            }
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        output
    }
}

impl fmt::Display for GarnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GarnetError {}

/// Result type for compiler pipeline and VM operations
pub type GarnetResult<T> = Result<T, GarnetError>;

impl GarnetError {
    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            ErrorKind::ArgumentError,
            ErrorKind::ZeroDivisionError,
            ErrorKind::NoMethodError,
        ] {
            assert_eq!(ErrorKind::from_class_name(kind.class_name()), kind);
        }
        assert_eq!(
            ErrorKind::from_class_name("MyError"),
            ErrorKind::Custom("MyError".to_string())
        );
    }

    #[test]
    fn test_format_points_at_column() {
        colored::control::set_override(false);
        let err = GarnetError::syntax_error("unexpected ')'", Span::single(2, 3, 0), "t.rb")
            .with_source("a = 1\nb = )\n");
        let text = err.format();
        assert!(text.starts_with("t.rb:2:3: unexpected ')' (SyntaxError)"));
        assert!(text.contains("   2 | b = )"));
        assert!(text.contains("        ^"));
    }
}
