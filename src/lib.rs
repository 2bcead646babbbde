//! Basic+ front end
//!
//! Lexer, symbol table, error-recovering parser and two static analyses
//! (unreachable code, possibly unassigned variables) for Basic+ procedures.
//!
//! ```
//! let procedure = basicplus::parse("goto done\nx = 1\ndone:\nreturn\n");
//! assert!(procedure.diagnostics.is_empty());
//! assert_eq!(basicplus::analysis::unreachable_statements(&procedure).len(), 1);
//! ```

pub mod analysis;
pub mod feedback;
pub mod frontend;
pub mod lsp;
pub mod utils;

pub use frontend::ast::Procedure;
pub use utils::{Diagnostic, Error, Result, Severity, Span};

/// Parse a procedure from source text using file id 0
pub fn parse(source: &str) -> Procedure {
    parse_file(source, 0)
}

/// Parse a procedure, tagging every span with `file_id`
pub fn parse_file(source: &str, file_id: usize) -> Procedure {
    frontend::parse(source, file_id)
}
