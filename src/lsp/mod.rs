//! Language Server Protocol (LSP) Support
//!
//! Editor queries over parsed Basic+ documents: diagnostics, hover,
//! go-to-definition, references, outline, folding and completion.
//! Transport is left to the host; positions follow LSP conventions
//! (0-based lines and characters) and are converted at this boundary.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::analysis::{unassigned_variables, unreachable_statements};
use crate::frontend::ast::{Procedure, RegionKind};
use crate::frontend::parser::INTRINSICS;
use crate::frontend::symbols::{Symbol, SymbolKind, VariableScope, VariableType};
use crate::utils::{Severity, Span};

// ==================== LSP Message Types ====================

/// Represents a position in a text document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Represents a range in a text document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl From<Span> for Range {
    fn from(span: Span) -> Self {
        Range {
            start: Position { line: span.line.saturating_sub(1) as u32, character: span.col as u32 },
            end: Position { line: span.end_line.saturating_sub(1) as u32, character: span.end_col as u32 },
        }
    }
}

/// A text document and its latest parse
#[derive(Debug)]
pub struct TextDocument {
    pub uri: String,
    pub version: i32,
    pub procedure: Procedure,
}

// ==================== LSP Results ====================

/// Completion item for auto-complete
#[derive(Debug, Clone)]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionKind,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Function,
    Variable,
    Constant,
    Keyword,
    Label,
}

/// Hover information
#[derive(Debug, Clone)]
pub struct HoverInfo {
    pub contents: String,
    pub range: Option<Range>,
}

/// Go to definition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

/// Diagnostic message
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl From<Severity> for DiagnosticSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Error => DiagnosticSeverity::Error,
            Severity::Warning => DiagnosticSeverity::Warning,
            Severity::Info => DiagnosticSeverity::Information,
        }
    }
}

/// Document symbol for outline view
#[derive(Debug, Clone)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: DocumentSymbolKind,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSymbolKind {
    Function,
    Constant,
    Variable,
    Array,
    Module,
    Key,
}

/// Foldable line range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldingRange {
    pub start_line: u32,
    pub end_line: u32,
    pub kind: RegionKind,
}

const KEYWORDS: &[&str] = &[
    "begin case", "call", "case", "clearselect", "common", "compile", "convert", "debug", "declare",
    "delete", "dim", "do", "else", "end", "end case", "equ", "flush", "for", "function", "garbagecollect",
    "gosub", "goto", "if", "in", "initrnd", "locate", "lock", "loop", "mat", "matparse", "matread",
    "matwrite", "next", "null", "on", "open", "osbread", "osbwrite", "osclose", "osdelete", "osopen",
    "osread", "oswrite", "read", "readnext", "reado", "readu", "readv", "remove", "repeat", "return",
    "select", "setting", "step", "stop", "subroutine", "swap", "then", "to", "transfer", "unlock",
    "until", "using", "while", "write", "writeu", "writev",
];

fn describe(symbol: &Symbol) -> String {
    match symbol.kind {
        SymbolKind::Variable => {
            let scope = match symbol.scope {
                Some(VariableScope::Parameter) => "parameter",
                Some(VariableScope::Common) => "common",
                Some(VariableScope::System) => "system",
                _ => "local",
            };
            let ty = match symbol.ty {
                Some(VariableType::Matrix { .. }) => "matrix",
                _ => "variable",
            };
            format!("{} {} {}", scope, ty, symbol.name)
        }
        kind => format!("{} {}", kind.describe(), symbol.name),
    }
}

// ==================== Language Server ====================

/// Basic+ language server state
pub struct LanguageServer {
    /// Open documents
    documents: HashMap<String, TextDocument>,
    next_file_id: usize,
}

impl LanguageServer {
    /// Create a new language server
    pub fn new() -> Self {
        Self { documents: HashMap::new(), next_file_id: 0 }
    }

    fn parse_document(&mut self, uri: String, content: &str, version: i32) {
        let file_id = match self.documents.get(&uri) {
            Some(doc) => doc.procedure.file_id,
            None => {
                self.next_file_id += 1;
                self.next_file_id
            }
        };
        let procedure = crate::parse_file(content, file_id);
        debug!("{} v{}: {} diagnostics", uri, version, procedure.diagnostics.len());
        self.documents.insert(uri.clone(), TextDocument { uri, version, procedure });
    }

    /// Open a document
    pub fn open_document(&mut self, uri: String, content: String, version: i32) {
        self.parse_document(uri, &content, version);
    }

    /// Update a document; stale versions are ignored
    pub fn update_document(&mut self, uri: &str, content: String, version: i32) {
        match self.documents.get(uri) {
            Some(doc) if doc.version >= version => {}
            _ => self.parse_document(uri.to_string(), &content, version),
        }
    }

    /// Close a document
    pub fn close_document(&mut self, uri: &str) {
        self.documents.remove(uri);
    }

    pub fn document(&self, uri: &str) -> Option<&TextDocument> {
        self.documents.get(uri)
    }

    fn symbol_at(&self, uri: &str, position: Position) -> Option<(&Procedure, &Symbol)> {
        let procedure = &self.documents.get(uri)?.procedure;
        let symbol = procedure.symbols.symbol_at(
            position.line as usize + 1,
            position.character as usize,
            procedure.file_id,
        )?;
        Some((procedure, symbol))
    }

    /// Parse diagnostics plus analyser findings
    pub fn get_diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        let Some(doc) = self.documents.get(uri) else {
            return Vec::new();
        };
        let procedure = &doc.procedure;
        let mut out: Vec<Diagnostic> = procedure
            .diagnostics
            .iter()
            .map(|d| Diagnostic {
                range: d.span().into(),
                severity: d.severity.into(),
                code: None,
                message: d.message.clone(),
            })
            .collect();
        if procedure.has_errors() {
            return out;
        }
        out.extend(unreachable_statements(procedure).into_iter().map(|stmt| Diagnostic {
            range: stmt.span.into(),
            severity: DiagnosticSeverity::Hint,
            code: Some("unreachable".to_string()),
            message: "Unreachable code".to_string(),
        }));
        out.extend(unassigned_variables(procedure).into_iter().map(|finding| Diagnostic {
            range: finding.span.into(),
            severity: DiagnosticSeverity::Warning,
            code: Some("unassigned".to_string()),
            message: format!("Variable {} may not have been assigned", finding.name),
        }));
        out
    }

    /// Keywords, intrinsics and the document's own symbols
    pub fn get_completions(&self, uri: &str, _position: Position) -> Vec<CompletionItem> {
        let mut completions: Vec<CompletionItem> = KEYWORDS
            .iter()
            .map(|kw| CompletionItem { label: kw.to_string(), kind: CompletionKind::Keyword, detail: None })
            .collect();
        completions.extend(INTRINSICS.iter().map(|name| CompletionItem {
            label: name.to_string(),
            kind: CompletionKind::Function,
            detail: Some("intrinsic".to_string()),
        }));

        if let Some(doc) = self.documents.get(uri) {
            let mut seen = BTreeSet::new();
            for symbol in doc.procedure.symbols.iter() {
                let kind = match symbol.kind {
                    SymbolKind::Function | SymbolKind::Subroutine => CompletionKind::Function,
                    SymbolKind::Equate => CompletionKind::Constant,
                    SymbolKind::Label if symbol.is_declared() => CompletionKind::Label,
                    SymbolKind::Variable if symbol.scope != Some(VariableScope::System) => CompletionKind::Variable,
                    _ => continue,
                };
                if seen.insert((symbol.name.to_lowercase(), kind as u8)) {
                    completions.push(CompletionItem { label: symbol.name.clone(), kind, detail: Some(describe(symbol)) });
                }
            }
        }
        completions
    }

    /// Get hover info at position
    pub fn get_hover(&self, uri: &str, position: Position) -> Option<HoverInfo> {
        let (procedure, symbol) = self.symbol_at(uri, position)?;
        let reference = procedure.symbols.reference_at(
            position.line as usize + 1,
            position.character as usize,
            procedure.file_id,
        )?;
        let mut contents = describe(symbol);
        if symbol.kind == SymbolKind::Label && !symbol.is_declared() {
            contents.push_str(" (not defined)");
        }
        Some(HoverInfo { contents, range: Some(reference.token.span.into()) })
    }

    /// Go to definition
    pub fn goto_definition(&self, uri: &str, position: Position) -> Option<Location> {
        let (_, symbol) = self.symbol_at(uri, position)?;
        if !symbol.is_declared() {
            return None;
        }
        Some(Location { uri: uri.to_string(), range: symbol.token.span.into() })
    }

    /// Find references
    pub fn find_references(&self, uri: &str, position: Position) -> Vec<Location> {
        let Some((procedure, symbol)) = self.symbol_at(uri, position) else {
            return Vec::new();
        };
        procedure
            .symbols
            .references_of(symbol.id)
            .map(|r| Location { uri: uri.to_string(), range: r.token.span.into() })
            .collect()
    }

    /// Labels, declared routines, equates, matrices, commons and inserts
    pub fn get_document_symbols(&self, uri: &str) -> Vec<DocumentSymbol> {
        let Some(doc) = self.documents.get(uri) else {
            return Vec::new();
        };
        let mut out: Vec<DocumentSymbol> = doc
            .procedure
            .symbols
            .iter()
            .filter_map(|symbol| {
                let kind = match symbol.kind {
                    SymbolKind::Label if symbol.is_declared() => DocumentSymbolKind::Key,
                    SymbolKind::Function | SymbolKind::Subroutine => DocumentSymbolKind::Function,
                    SymbolKind::Equate => DocumentSymbolKind::Constant,
                    SymbolKind::Variable if symbol.is_matrix() => DocumentSymbolKind::Array,
                    SymbolKind::Variable if symbol.scope == Some(VariableScope::Common) => DocumentSymbolKind::Variable,
                    SymbolKind::CommonLabel | SymbolKind::Insert => DocumentSymbolKind::Module,
                    _ => return None,
                };
                Some(DocumentSymbol { name: symbol.name.clone(), kind, range: symbol.token.span.into() })
            })
            .collect();
        out.sort_by_key(|s| (s.range.start.line, s.range.start.character));
        out
    }

    /// Multi-line regions as folding ranges
    pub fn get_folding_ranges(&self, uri: &str) -> Vec<FoldingRange> {
        let Some(doc) = self.documents.get(uri) else {
            return Vec::new();
        };
        let mut out: Vec<FoldingRange> = doc
            .procedure
            .regions
            .iter()
            .filter(|r| r.span.end_line > r.span.line)
            .map(|r| FoldingRange {
                start_line: r.span.line.saturating_sub(1) as u32,
                end_line: r.span.end_line.saturating_sub(1) as u32,
                kind: r.kind,
            })
            .collect();
        out.sort_by_key(|r| (r.start_line, r.end_line));
        out
    }
}

impl Default for LanguageServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const URI: &str = "file:///ORDERS.txt";

    fn server(source: &str) -> LanguageServer {
        let mut server = LanguageServer::new();
        server.open_document(URI.to_string(), source.to_string(), 1);
        server
    }

    fn at(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_definition_of_forward_label() {
        let server = server("gosub Total\nreturn\ntotal:\n  x = 1\nreturn\n");
        let location = server.goto_definition(URI, at(0, 7)).unwrap();
        assert_eq!(location.range.start, at(2, 0));
        assert_eq!(server.find_references(URI, at(2, 1)).len(), 2);
    }

    #[test]
    fn test_hover_describes_variable() {
        let server = server("subroutine s(p)\nx = p\n");
        let hover = server.get_hover(URI, at(1, 4)).unwrap();
        assert_eq!(hover.contents, "parameter variable p");
        assert!(server.get_hover(URI, at(1, 2)).is_none());
    }

    #[test]
    fn test_diagnostics_include_findings() {
        let server = server("return\nx = y\n");
        let diags = server.get_diagnostics(URI);
        let codes: Vec<_> = diags.iter().map(|d| d.code.clone().unwrap_or_default()).collect();
        assert_eq!(codes, vec!["unreachable".to_string(), "unassigned".to_string()]);
        assert_eq!(diags[1].range.start, at(1, 4));
    }

    #[test]
    fn test_parse_errors_suppress_findings() {
        let server = server("goto nowhere\nx = y\n");
        let diags = server.get_diagnostics(URI);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
    }

    #[test]
    fn test_document_symbols_and_folding() {
        let server = server("equ max$ to 3\ndim m(2)\nif 1 then\n  gosub a\nend\na:\nreturn\n");
        let names: Vec<_> = server.get_document_symbols(URI).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["max$".to_string(), "m".to_string(), "a".to_string()]);
        let folds = server.get_folding_ranges(URI);
        assert_eq!(folds, vec![FoldingRange { start_line: 2, end_line: 4, kind: RegionKind::Then }]);
    }

    #[test]
    fn test_completions_include_document_symbols() {
        let server = server("declare function Calc\nx = Calc(1)\n");
        let items = server.get_completions(URI, at(1, 0));
        assert!(items.iter().any(|i| i.label == "Calc" && i.kind == CompletionKind::Function));
        assert!(items.iter().any(|i| i.label == "x" && i.kind == CompletionKind::Variable));
        assert!(items.iter().any(|i| i.label == "oconv"));
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut server = server("x = 1\n");
        server.update_document(URI, "goto missing\n".to_string(), 1);
        assert!(server.get_diagnostics(URI).is_empty());
        server.update_document(URI, "goto missing\n".to_string(), 2);
        assert_eq!(server.get_diagnostics(URI).len(), 1);
    }
}
