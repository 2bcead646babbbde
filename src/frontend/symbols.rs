//! Symbol table for Basic+
//!
//! Built incrementally while parsing one procedure. Symbols are keyed by
//! (kind, case-folded name) and never removed; every declaration or lookup
//! records a reference so positions can be mapped back to symbols.

use std::collections::HashMap;

use log::trace;

use crate::frontend::ast::Expr;
use crate::frontend::token::{Token, TokenKind};
use crate::utils::Span;

// ==================== Symbols ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Subroutine,
    Insert,
    Label,
    Variable,
    Equate,
    CommonLabel,
}

impl SymbolKind {
    pub fn describe(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Subroutine => "subroutine",
            SymbolKind::Insert => "insert",
            SymbolKind::Label => "label",
            SymbolKind::Variable => "variable",
            SymbolKind::Equate => "equate",
            SymbolKind::CommonLabel => "common label",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    Parameter,
    Local,
    Common,
    System,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableType {
    /// Declared with `dim`, `common` or a `mat` parameter
    Matrix { rows: Option<Expr>, cols: Option<Expr> },
    Dynamic,
}

/// Labels referenced by GOTO/GOSUB before their definition stay placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Declared,
    Placeholder,
}

/// Index of a symbol in its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(usize);

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    /// Name as first written
    pub name: String,
    /// Declaring token, or the first reference for implicit symbols
    pub token: Token,
    pub scope: Option<VariableScope>,
    pub ty: Option<VariableType>,
    pub equate_value: Option<Expr>,
    pub state: Resolution,
    /// Indexes into the table's reference list, in source order
    references: Vec<usize>,
}

impl Symbol {
    pub fn is_declared(&self) -> bool {
        self.state == Resolution::Declared
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self.ty, Some(VariableType::Matrix { .. }))
    }
}

/// One use site of a symbol
#[derive(Debug, Clone)]
pub struct SymbolReference {
    pub symbol: SymbolId,
    pub token: Token,
}

/// Saved table size for speculative parsing
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    symbols: usize,
    references: usize,
}

// ==================== Symbol Table ====================

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    keys: HashMap<(SymbolKind, String), SymbolId>,
    references: Vec<SymbolReference>,
    /// (line, column, file) of every character of every reference
    index: HashMap<(usize, usize, usize), usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, kind: SymbolKind, token: &Token, state: Resolution) -> Option<SymbolId> {
        if self.keys.contains_key(&(kind, token.folded())) {
            return None;
        }
        Some(self.create(kind, token, state))
    }

    /// Add a symbol whose key is known to be free
    fn create(&mut self, kind: SymbolKind, token: &Token, state: Resolution) -> SymbolId {
        let id = SymbolId(self.symbols.len());
        self.symbols.push(Symbol {
            id,
            kind,
            name: token.text.clone(),
            token: token.clone(),
            scope: None,
            ty: None,
            equate_value: None,
            state,
            references: Vec::new(),
        });
        self.keys.insert((kind, token.folded()), id);
        trace!("new {} symbol {}", kind.describe(), token.text);
        id
    }

    fn add_reference(&mut self, id: SymbolId, token: &Token) {
        let idx = self.references.len();
        self.references.push(SymbolReference { symbol: id, token: token.clone() });
        self.symbols[id.0].references.push(idx);
        let span = token.span;
        if span.line == span.end_line {
            for col in span.col..span.end_col.max(span.col + 1) {
                self.index.insert((span.line, col, span.file_id), idx);
            }
        } else {
            self.index.insert((span.line, span.col, span.file_id), idx);
        }
    }

    fn declare(&mut self, kind: SymbolKind, token: &Token) -> Option<SymbolId> {
        let id = self.insert(kind, token, Resolution::Declared)?;
        self.add_reference(id, token);
        Some(id)
    }

    fn find(&self, kind: SymbolKind, name: &str) -> Option<SymbolId> {
        self.keys.get(&(kind, name.to_lowercase())).copied()
    }

    fn reference(&mut self, kind: SymbolKind, token: &Token) -> Option<SymbolId> {
        let id = self.find(kind, &token.text)?;
        self.add_reference(id, token);
        Some(id)
    }

    // ==================== Declarations ====================

    /// Returns false if the function is already declared
    pub fn declare_function(&mut self, token: &Token) -> bool {
        self.declare(SymbolKind::Function, token).is_some()
    }

    pub fn declare_subroutine(&mut self, token: &Token) -> bool {
        self.declare(SymbolKind::Subroutine, token).is_some()
    }

    pub fn declare_insert(&mut self, token: &Token) -> bool {
        self.declare(SymbolKind::Insert, token).is_some()
    }

    pub fn declare_common_label(&mut self, token: &Token) -> bool {
        self.declare(SymbolKind::CommonLabel, token).is_some()
    }

    pub fn declare_equate(&mut self, token: &Token, value: Expr) -> bool {
        match self.declare(SymbolKind::Equate, token) {
            Some(id) => {
                self.symbols[id.0].equate_value = Some(value);
                true
            }
            None => false,
        }
    }

    fn declare_variable(&mut self, token: &Token, scope: VariableScope, ty: VariableType) -> bool {
        match self.declare(SymbolKind::Variable, token) {
            Some(id) => {
                let symbol = &mut self.symbols[id.0];
                symbol.scope = Some(scope);
                symbol.ty = Some(ty);
                true
            }
            None => false,
        }
    }

    pub fn declare_matrix(&mut self, token: &Token, rows: Expr, cols: Option<Expr>) -> bool {
        self.declare_variable(token, VariableScope::Local, VariableType::Matrix { rows: Some(rows), cols })
    }

    /// A common variable; `dims` makes it a matrix
    pub fn declare_common_variable(&mut self, token: &Token, dims: Option<(Expr, Option<Expr>)>) -> bool {
        let ty = match dims {
            Some((rows, cols)) => VariableType::Matrix { rows: Some(rows), cols },
            None => VariableType::Dynamic,
        };
        self.declare_variable(token, VariableScope::Common, ty)
    }

    pub fn declare_parameter(&mut self, token: &Token, matrix: bool) -> bool {
        let ty = if matrix {
            VariableType::Matrix { rows: None, cols: None }
        } else {
            VariableType::Dynamic
        };
        self.declare_variable(token, VariableScope::Parameter, ty)
    }

    /// Declare a label, promoting an earlier placeholder.
    /// Returns false if the label was already declared.
    pub fn declare_label(&mut self, token: &Token) -> bool {
        if let Some(id) = self.find(SymbolKind::Label, &token.text) {
            let symbol = &mut self.symbols[id.0];
            if symbol.is_declared() {
                return false;
            }
            symbol.state = Resolution::Declared;
            symbol.token = token.clone();
            self.add_reference(id, token);
            return true;
        }
        self.declare(SymbolKind::Label, token).is_some()
    }

    // ==================== References ====================

    /// Reference a variable, creating it implicitly on first use
    pub fn reference_variable(&mut self, token: &Token) -> SymbolId {
        if let Some(id) = self.reference(SymbolKind::Variable, token) {
            return id;
        }
        let scope = if token.kind == TokenKind::SystemVariable {
            VariableScope::System
        } else {
            VariableScope::Local
        };
        let id = self.create(SymbolKind::Variable, token, Resolution::Declared);
        let symbol = &mut self.symbols[id.0];
        symbol.scope = Some(scope);
        symbol.ty = Some(VariableType::Dynamic);
        self.add_reference(id, token);
        id
    }

    pub fn reference_equate(&mut self, token: &Token) -> Option<SymbolId> {
        self.reference(SymbolKind::Equate, token)
    }

    pub fn reference_function(&mut self, token: &Token) -> Option<SymbolId> {
        self.reference(SymbolKind::Function, token)
    }

    pub fn reference_subroutine(&mut self, token: &Token) -> Option<SymbolId> {
        self.reference(SymbolKind::Subroutine, token)
    }

    /// `call name(...)` registers the subroutine if it is unknown
    pub fn reference_or_declare_subroutine(&mut self, token: &Token) -> SymbolId {
        if let Some(id) = self.reference(SymbolKind::Subroutine, token) {
            return id;
        }
        let id = self.create(SymbolKind::Subroutine, token, Resolution::Declared);
        self.add_reference(id, token);
        id
    }

    /// Reference a label, leaving a placeholder if it is not declared yet
    pub fn reference_label(&mut self, token: &Token) -> SymbolId {
        if let Some(id) = self.reference(SymbolKind::Label, token) {
            return id;
        }
        let id = self.create(SymbolKind::Label, token, Resolution::Placeholder);
        self.add_reference(id, token);
        id
    }

    // ==================== Queries ====================

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn lookup(&self, kind: SymbolKind, name: &str) -> Option<&Symbol> {
        self.find(kind, name).map(|id| self.get(id))
    }

    pub fn contains(&self, kind: SymbolKind, name: &str) -> bool {
        self.find(kind, name).is_some()
    }

    pub fn is_matrix(&self, name: &str) -> bool {
        self.lookup(SymbolKind::Variable, name).map_or(false, Symbol::is_matrix)
    }

    pub fn is_parameter(&self, name: &str) -> bool {
        self.lookup(SymbolKind::Variable, name)
            .map_or(false, |s| s.scope == Some(VariableScope::Parameter))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn references_of(&self, id: SymbolId) -> impl Iterator<Item = &SymbolReference> {
        self.symbols[id.0].references.iter().map(move |&i| &self.references[i])
    }

    /// Reference covering the given position (1-based line, 0-based column)
    pub fn reference_at(&self, line: usize, col: usize, file_id: usize) -> Option<&SymbolReference> {
        self.index.get(&(line, col, file_id)).map(|&i| &self.references[i])
    }

    pub fn symbol_at(&self, line: usize, col: usize, file_id: usize) -> Option<&Symbol> {
        self.reference_at(line, col, file_id).map(|r| self.get(r.symbol))
    }

    /// Every reference to a label that was never declared
    pub fn unresolved_labels(&self) -> Vec<(String, Span)> {
        let mut out: Vec<(String, Span)> = self
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Label && !s.is_declared())
            .flat_map(|s| self.references_of(s.id).map(|r| (r.token.text.clone(), r.token.span)))
            .collect();
        out.sort_by_key(|(_, span)| (span.line, span.col));
        out
    }

    // ==================== Speculation ====================

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { symbols: self.symbols.len(), references: self.references.len() }
    }

    /// Forget every symbol and reference added since `checkpoint`
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint { symbols, references } = checkpoint;
        for symbol in self.symbols.drain(symbols..) {
            self.keys.remove(&(symbol.kind, symbol.name.to_lowercase()));
        }
        for symbol in &mut self.symbols {
            while symbol.references.last().map_or(false, |&i| i >= references) {
                symbol.references.pop();
            }
        }
        self.references.truncate(references);
        self.index.retain(|_, i| *i < references);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Span;

    fn tok(kind: TokenKind, text: &str, line: usize, col: usize) -> Token {
        Token::new(kind, text, Span::single_line(line, col, col + text.len(), 0))
    }

    fn ident(text: &str, line: usize, col: usize) -> Token {
        tok(TokenKind::Ident, text, line, col)
    }

    #[test]
    fn test_implicit_variables_are_case_insensitive() {
        let mut table = SymbolTable::new();
        let a = table.reference_variable(&ident("a", 1, 0));
        let a2 = table.reference_variable(&ident("A", 2, 0));
        assert_eq!(a, a2);
        let symbol = table.get(a);
        assert_eq!(symbol.scope, Some(VariableScope::Local));
        assert_eq!(symbol.ty, Some(VariableType::Dynamic));
        assert_eq!(table.references_of(a).count(), 2);
    }

    #[test]
    fn test_system_variable_scope() {
        let mut table = SymbolTable::new();
        let id = table.reference_variable(&tok(TokenKind::SystemVariable, "@FM", 1, 4));
        assert_eq!(table.get(id).scope, Some(VariableScope::System));
    }

    #[test]
    fn test_label_placeholder_promoted() {
        let mut table = SymbolTable::new();
        table.reference_label(&ident("foo", 1, 5));
        assert_eq!(table.unresolved_labels().len(), 1);

        assert!(table.declare_label(&ident("Foo", 3, 0)));
        let symbol = table.lookup(SymbolKind::Label, "FOO").unwrap();
        assert!(symbol.is_declared());
        assert_eq!(symbol.token.span.line, 3);
        assert_eq!(table.references_of(symbol.id).count(), 2);
        assert!(table.unresolved_labels().is_empty());

        assert!(!table.declare_label(&ident("foo", 5, 0)));
    }

    #[test]
    fn test_duplicate_declarations_signal_false() {
        let mut table = SymbolTable::new();
        assert!(table.declare_function(&ident("f", 1, 8)));
        assert!(!table.declare_function(&ident("F", 2, 8)));
        assert!(table.declare_matrix(&ident("m", 3, 4), Expr::Number { text: "10".into(), span: Span::dummy() }, None));
        assert!(table.is_matrix("M"));
        assert!(!table.declare_common_variable(&ident("m", 4, 7), None));
    }

    #[test]
    fn test_position_index() {
        let mut table = SymbolTable::new();
        table.reference_variable(&ident("total", 2, 4));
        assert_eq!(table.symbol_at(2, 4, 0).map(|s| s.name.as_str()), Some("total"));
        assert_eq!(table.symbol_at(2, 8, 0).map(|s| s.name.as_str()), Some("total"));
        assert!(table.symbol_at(2, 9, 0).is_none());
        assert!(table.symbol_at(2, 4, 1).is_none());
    }

    #[test]
    fn test_rollback_forgets_speculative_references() {
        let mut table = SymbolTable::new();
        table.reference_variable(&ident("x", 1, 0));
        let checkpoint = table.checkpoint();
        table.reference_variable(&ident("x", 1, 4));
        table.reference_variable(&ident("y", 1, 6));
        table.rollback(checkpoint);

        assert_eq!(table.len(), 1);
        assert!(!table.contains(SymbolKind::Variable, "y"));
        let x = table.lookup(SymbolKind::Variable, "x").unwrap();
        assert_eq!(table.references_of(x.id).count(), 1);
        assert!(table.symbol_at(1, 4, 0).is_none());
    }

    #[test]
    fn test_call_registers_subroutine() {
        let mut table = SymbolTable::new();
        assert!(table.reference_subroutine(&ident("Msg", 1, 5)).is_none());
        let id = table.reference_or_declare_subroutine(&ident("Msg", 1, 5));
        assert_eq!(table.reference_subroutine(&ident("msg", 2, 5)), Some(id));
    }
}
