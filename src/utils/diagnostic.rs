//! Diagnostic records handed to downstream consumers

use serde::{Deserialize, Serialize};

use crate::utils::{Error, Span};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A diagnostic produced while lexing or parsing.
///
/// Line numbers are 1-based; converting to 0-based editor positions is
/// up to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub message: String,
    pub line_no: usize,
    pub start_col: usize,
    pub end_col: usize,
    pub end_line_no: usize,
    pub severity: Severity,
    #[serde(skip)]
    pub file_id: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Span, severity: Severity) -> Self {
        Self {
            message: message.into(),
            line_no: span.line,
            start_col: span.col,
            end_col: span.end_col,
            end_line_no: span.end_line,
            severity,
            file_id: span.file_id,
        }
    }

    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(message, span, Severity::Error)
    }

    pub fn span(&self) -> Span {
        Span::new(self.line_no, self.start_col, self.end_line_no, self.end_col, self.file_id)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl From<&Error> for Diagnostic {
    fn from(err: &Error) -> Self {
        Diagnostic::new(err.to_string(), err.span(), err.severity())
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Self {
        Diagnostic::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let diag = Diagnostic::error("Label foo not defined", Span::single_line(1, 5, 8, 0));
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["lineNo"], 1);
        assert_eq!(json["startCol"], 5);
        assert_eq!(json["endCol"], 8);
        assert_eq!(json["endLineNo"], 1);
        assert_eq!(json["severity"], "Error");
        assert!(json.get("fileId").is_none());
    }

    #[test]
    fn test_from_error_keeps_span() {
        let span = Span::single_line(4, 2, 9, 3);
        let diag = Diagnostic::from(Error::ExpectedIdent { span });
        assert_eq!(diag.span(), span);
        assert_eq!(diag.message, "Expected identifier");
    }
}
