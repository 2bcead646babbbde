//! Error handling for the Basic+ front end

use crate::utils::{Severity, Span};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Front end error.
///
/// Lexical and semantic errors are recorded and never interrupt their pass.
/// Syntax errors unwind to the statement loop, which records them and
/// resynchronises at the next statement separator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Lexer Errors ====================

    #[error("Unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("Unterminated block comment")]
    UnterminatedComment { span: Span },

    #[error("Malformed number: {text}")]
    MalformedNumber { text: String, span: Span },

    #[error("Malformed hex literal: {text}")]
    MalformedHex { text: String, span: Span },

    #[error("Invalid identifier: {name}")]
    InvalidIdentifier { name: String, span: Span },

    #[error("Unknown compiler directive: {name}")]
    UnknownDirective { name: String, span: Span },

    #[error("Unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },

    // ==================== Parser Errors ====================

    #[error("Unexpected token: expected {expected}, got {got}")]
    UnexpectedToken {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("Expected {0}")]
    Expected(String, Span),

    #[error("Expected identifier")]
    ExpectedIdent { span: Span },

    #[error("Expected expression")]
    ExpectedExpr { span: Span },

    #[error("Expected a new line or ';' after statement, got {got}")]
    ExpectedSeparator { got: String, span: Span },

    #[error("Missing '{terminator}' for {construct}")]
    MissingTerminator {
        construct: String,
        terminator: String,
        span: Span,
    },

    #[error("THEN or ELSE must contain at least one statement")]
    EmptyThenElse { span: Span },

    #[error("Too many indexes for {form} access: at most {max} allowed")]
    TooManyIndexes {
        form: &'static str,
        max: usize,
        span: Span,
    },

    #[error("{keyword} is only allowed inside a FOR or LOOP statement")]
    MisplacedLoopCondition { keyword: String, span: Span },

    #[error("NEXT {got} does not match FOR {expected}")]
    NextMismatch {
        expected: String,
        got: String,
        span: Span,
    },

    // ==================== Semantic Errors ====================

    #[error("{what} {name} is already defined")]
    DuplicateDefinition {
        what: &'static str,
        name: String,
        span: Span,
    },

    #[error("{what} {name} is already declared")]
    RedundantDeclaration {
        what: &'static str,
        name: String,
        span: Span,
    },

    #[error("Insert {name} is already included")]
    DuplicateInsert { name: String, span: Span },

    #[error("Label {name} not defined")]
    UndefinedLabel { name: String, span: Span },

    #[error("Function {name} has not been declared")]
    UndeclaredFunction { name: String, span: Span },

    #[error("Subroutine {name} has not been declared")]
    UndeclaredSubroutine { name: String, span: Span },

    #[error("{name} is already used as {existing} and cannot be declared as {wanted}")]
    InvalidRedeclaration {
        name: String,
        existing: &'static str,
        wanted: &'static str,
        span: Span,
    },

    #[error("System variable {name} cannot be redefined")]
    SystemVariableRedefinition { name: String, span: Span },
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Span {
        match self {
            Self::UnterminatedString { span }
            | Self::UnterminatedComment { span }
            | Self::MalformedNumber { span, .. }
            | Self::MalformedHex { span, .. }
            | Self::InvalidIdentifier { span, .. }
            | Self::UnknownDirective { span, .. }
            | Self::UnexpectedChar { span, .. }
            | Self::UnexpectedToken { span, .. }
            | Self::Expected(_, span)
            | Self::ExpectedIdent { span }
            | Self::ExpectedExpr { span }
            | Self::ExpectedSeparator { span, .. }
            | Self::MissingTerminator { span, .. }
            | Self::EmptyThenElse { span }
            | Self::TooManyIndexes { span, .. }
            | Self::MisplacedLoopCondition { span, .. }
            | Self::NextMismatch { span, .. }
            | Self::DuplicateDefinition { span, .. }
            | Self::RedundantDeclaration { span, .. }
            | Self::DuplicateInsert { span, .. }
            | Self::UndefinedLabel { span, .. }
            | Self::UndeclaredFunction { span, .. }
            | Self::UndeclaredSubroutine { span, .. }
            | Self::InvalidRedeclaration { span, .. }
            | Self::SystemVariableRedefinition { span, .. } => *span,
        }
    }

    /// Severity reported downstream for this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::RedundantDeclaration { .. } => Severity::Warning,
            Self::DuplicateInsert { .. } => Severity::Info,
            _ => Severity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_message() {
        let err = Error::UndefinedLabel { name: "foo".to_string(), span: Span::dummy() };
        assert_eq!(err.to_string(), "Label foo not defined");
        assert_eq!(err.severity(), Severity::Error);
    }

    #[test]
    fn test_soft_severities() {
        let warn = Error::RedundantDeclaration { what: "Function", name: "f".into(), span: Span::dummy() };
        let info = Error::DuplicateInsert { name: "logical".into(), span: Span::dummy() };
        assert_eq!(warn.severity(), Severity::Warning);
        assert_eq!(info.severity(), Severity::Info);
    }
}
