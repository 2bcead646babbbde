//! Source location tracking

use serde::Serialize;

/// A span represents a range in the source code.
///
/// Lines are 1-based, columns are 0-based. `end_col` is exclusive and
/// refers to `end_line`, so a string continued over several lines still
/// has a well-formed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub end_line: usize,
    pub end_col: usize,
    /// File ID
    pub file_id: usize,
}

impl Span {
    /// Create a new span
    pub fn new(line: usize, col: usize, end_line: usize, end_col: usize, file_id: usize) -> Self {
        Self { line, col, end_line, end_col, file_id }
    }

    /// A span on a single line
    pub fn single_line(line: usize, col: usize, end_col: usize, file_id: usize) -> Self {
        Self::new(line, col, line, end_col, file_id)
    }

    /// Create a dummy span (for testing)
    pub fn dummy() -> Self {
        Self { line: 1, col: 0, end_line: 1, end_col: 0, file_id: 0 }
    }

    /// Merge two spans
    pub fn merge(&self, other: &Span) -> Span {
        let (line, col) = (self.line, self.col).min((other.line, other.col));
        let (end_line, end_col) = (self.end_line, self.end_col).max((other.end_line, other.end_col));
        Span { line, col, end_line, end_col, file_id: self.file_id }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_orders_by_position() {
        let a = Span::single_line(2, 4, 6, 0);
        let b = Span::new(1, 8, 3, 1, 0);
        let merged = a.merge(&b);
        assert_eq!((merged.line, merged.col), (1, 8));
        assert_eq!((merged.end_line, merged.end_col), (3, 1));
    }
}
