//! Parser for Basic+
//!
//! Recursive descent over the primary token stream. Every parse routine
//! returns `Result`; the statement loop is the only place an error becomes a
//! diagnostic, after which parsing resumes at the next statement separator.
//! The parser therefore always produces a `Procedure`, however broken the
//! input.
//!
//! Statement forms live in `parser_statements.rs`.

use log::debug;

use crate::frontend::ast::*;
use crate::frontend::lexer::{self, string_value};
use crate::frontend::symbols::{Checkpoint, SymbolKind, SymbolTable};
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Diagnostic, Error, Result, Span};

/// Built-in functions callable without a `declare function`
pub const INTRINSICS: &[&str] = &[
    "abs", "alpha", "ansi_unicode", "assigned", "atan", "bitand", "bitnot", "bitor", "bitxor",
    "char", "checksum", "col1", "col2", "convert", "cos", "count", "date", "dcount", "delete",
    "dquote", "exp", "extract", "field", "fieldstore", "fmt", "get_property", "iconv", "index",
    "indexc", "inlist", "insert", "int", "isevent", "lcase", "len", "lower", "mod", "not", "num",
    "oconv", "quote", "raise", "rem", "remove", "replace", "retstack", "rnd", "send_message",
    "seq", "serial", "set_property", "sin", "space", "sqrt", "squote", "str", "sum", "swap",
    "tan", "time", "timedate", "trim", "trimb", "trimf", "ucase", "unassigned", "unicode_ansi",
    "xlate",
];

pub fn is_intrinsic(name: &str) -> bool {
    INTRINSICS.contains(&name.to_lowercase().as_str())
}

/// Maximum indexes in `x<f, v, s>`
const MAX_ANGLE_INDEXES: usize = 3;
/// Maximum indexes in `x[start, len]` and `m(r, c)`
const MAX_SQUARE_INDEXES: usize = 2;

/// Parse a source text into a procedure
pub fn parse(source: &str, file_id: usize) -> Procedure {
    let lexed = lexer::tokenize(source, file_id);
    let all_tokens = lexed.all_tokens();
    let mut parser = Parser::new(lexed.tokens, file_id);
    for err in &lexed.errors {
        parser.diagnostics.push(Diagnostic::from(err));
    }
    parser.parse_procedure(source, all_tokens)
}

/// Where a statement list stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockEnd {
    /// Procedure body
    Eof,
    /// Multi-line then/else arm
    End,
    /// FOR body
    Next,
    /// LOOP body
    Repeat,
    /// `case` arm: the next `case` or `end case`
    CaseArm,
}

/// Parser position plus everything speculation may append to
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    pos: usize,
    symbols: Checkpoint,
    diagnostics: usize,
    regions: usize,
}

/// The parser
///
/// Also the parse context: the symbol table, diagnostics and regions are
/// created fresh for each parse and threaded through every routine.
pub struct Parser {
    pub(super) tokens: Vec<Token>,
    pub(super) pos: usize,
    eof: Token,
    pub(super) file_id: usize,
    pub(super) symbols: SymbolTable,
    pub(super) diagnostics: Vec<Diagnostic>,
    pub(super) regions: Vec<Region>,
    /// Nesting of FOR and LOOP bodies
    pub(super) loop_depth: usize,
    /// `>=` closing an index list: `>` consumed, `=` still to be read
    split: Option<(Token, Token)>,
}

impl Parser {
    /// Create a parser over a primary token stream
    pub fn new(tokens: Vec<Token>, file_id: usize) -> Self {
        let eof_span = tokens.last().map(|t| t.span).unwrap_or_else(Span::dummy);
        Self {
            tokens,
            pos: 0,
            eof: Token::eof(eof_span),
            file_id,
            symbols: SymbolTable::new(),
            diagnostics: Vec::new(),
            regions: Vec::new(),
            loop_depth: 0,
            split: None,
        }
    }

    // ==================== Helper Methods ====================

    pub(super) fn current(&self) -> &Token {
        if let Some((_, equal)) = &self.split {
            return equal;
        }
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    pub(super) fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    pub(super) fn peek(&self) -> Option<&Token> {
        let offset = if self.split.is_some() { 0 } else { 1 };
        self.tokens.get(self.pos + offset)
    }

    pub(super) fn peek_kind(&self) -> TokenKind {
        self.peek().map_or(TokenKind::Eof, |t| t.kind)
    }

    /// The last consumed token
    pub(super) fn previous(&self) -> &Token {
        if let Some((greater, _)) = &self.split {
            return greater;
        }
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .unwrap_or_else(|| self.current())
    }

    pub(super) fn advance(&mut self) -> Token {
        if let Some((_, equal)) = self.split.take() {
            return equal;
        }
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    pub(super) fn is_at_end(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    /// End of the current statement: separator, end of file, or `else`
    /// closing a single-line `then`
    pub(super) fn at_statement_end(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::Else
        )
    }

    pub(super) fn expect(&mut self, expected: TokenKind, what: &str) -> Result<Token> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(Error::UnexpectedToken {
                expected: what.to_string(),
                got: self.current().describe(),
                span: self.current().span,
            })
        }
    }

    pub(super) fn consume(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn expect_ident(&mut self) -> Result<Token> {
        if self.check(TokenKind::Ident) {
            Ok(self.advance())
        } else {
            Err(Error::ExpectedIdent { span: self.current().span })
        }
    }

    /// Span from `start` to the last consumed token
    pub(super) fn span_from(&self, start: Span) -> Span {
        start.merge(&self.previous().span)
    }

    /// Record a non-fatal error
    pub(super) fn report(&mut self, err: Error) {
        debug!("{}:{}: {}", err.span().line, err.span().col, err);
        self.diagnostics.push(Diagnostic::from(err));
    }

    fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Skip to the next statement separator and consume it
    pub(super) fn synchronize(&mut self) {
        while !matches!(self.current_kind(), TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof) {
            self.advance();
        }
        if !self.is_at_end() {
            self.advance();
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            pos: self.pos,
            symbols: self.symbols.checkpoint(),
            diagnostics: self.diagnostics.len(),
            regions: self.regions.len(),
        }
    }

    /// Snapshots are only taken on `<`, never inside a split `>=`
    fn restore(&mut self, snapshot: Snapshot) {
        self.pos = snapshot.pos;
        self.split = None;
        self.symbols.rollback(snapshot.symbols);
        self.diagnostics.truncate(snapshot.diagnostics);
        self.regions.truncate(snapshot.regions);
    }

    // ==================== Procedure ====================

    /// Parse the header and body into a procedure
    pub fn parse_procedure(mut self, source: &str, all_tokens: Vec<Token>) -> Procedure {
        let (name, kind, parameters) = self.parse_header();
        let statements = self.parse_block(BlockEnd::Eof);

        for (label, span) in self.symbols.unresolved_labels() {
            self.report(Error::UndefinedLabel { name: label, span });
        }
        let labels = LabelTable::build(&statements);
        debug!("parsed {} statements, {} labels, {} diagnostics", statements.len(), labels.len(), self.diagnostics.len());

        self.diagnostics.sort_by_key(|d| (d.line_no, d.start_col));
        Procedure {
            name,
            kind,
            parameters,
            statements,
            symbols: self.symbols,
            labels,
            diagnostics: self.diagnostics,
            regions: self.regions,
            tokens: all_tokens,
            source: source.to_string(),
            file_id: self.file_id,
        }
    }

    /// `[compile] function|subroutine|insert name[(params)]`
    ///
    /// A missing header yields an unnamed subroutine; a malformed one is
    /// reported and also degrades to a subroutine.
    fn parse_header(&mut self) -> (String, ProcedureKind, Vec<Parameter>) {
        self.skip_newlines();
        let compiled = self.check(TokenKind::Compile);
        let kind_index = if compiled { self.pos + 1 } else { self.pos };
        let kind = match self.tokens.get(kind_index).map(|t| t.kind) {
            Some(TokenKind::Function) => ProcedureKind::Function,
            Some(TokenKind::Subroutine) => ProcedureKind::Subroutine,
            Some(TokenKind::Insert) => ProcedureKind::Insert,
            _ if compiled => {
                self.advance();
                let err = Error::Expected("FUNCTION, SUBROUTINE or INSERT".into(), self.current().span);
                self.report(err);
                self.synchronize();
                return (String::new(), ProcedureKind::Subroutine, Vec::new());
            }
            _ => return (String::new(), ProcedureKind::Subroutine, Vec::new()),
        };
        self.pos = kind_index + 1;

        match self.parse_header_rest(kind) {
            Ok((name, parameters)) => (name, kind, parameters),
            Err(err) => {
                self.report(err);
                self.synchronize();
                (String::new(), ProcedureKind::Subroutine, Vec::new())
            }
        }
    }

    fn parse_header_rest(&mut self, kind: ProcedureKind) -> Result<(String, Vec<Parameter>)> {
        let name = self.expect_ident()?;
        match kind {
            ProcedureKind::Function => self.symbols.declare_function(&name),
            ProcedureKind::Subroutine => self.symbols.declare_subroutine(&name),
            ProcedureKind::Insert => self.symbols.declare_insert(&name),
        };

        let mut parameters = Vec::new();
        if self.consume(TokenKind::LParen) {
            while !self.check(TokenKind::RParen) {
                let matrix = self.consume(TokenKind::Mat);
                let token = self.expect_ident()?;
                if !self.symbols.declare_parameter(&token, matrix) {
                    self.report(Error::DuplicateDefinition { what: "Parameter", name: token.text.clone(), span: token.span });
                }
                parameters.push(Parameter {
                    name: Ident::new(token.text, IdentRole::Assignment, token.span),
                    matrix,
                });
                if !self.consume(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')'")?;
        }
        self.expect_separator()?;
        Ok((name.text, parameters))
    }

    // ==================== Blocks ====================

    fn at_block_end(&self, end: BlockEnd) -> bool {
        match end {
            BlockEnd::Eof => false,
            BlockEnd::End => self.check(TokenKind::End),
            BlockEnd::Next => self.check(TokenKind::Next),
            BlockEnd::Repeat => self.check(TokenKind::Repeat),
            BlockEnd::CaseArm => {
                self.check(TokenKind::Case) || (self.check(TokenKind::End) && self.peek_kind() == TokenKind::Case)
            }
        }
    }

    /// Parse statements until `end` or end of file; the terminator is not consumed
    pub(super) fn parse_block(&mut self, end: BlockEnd) -> Block {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.is_at_end() || self.at_block_end(end) {
                break;
            }
            let result = self.parse_statement().and_then(|stmt| {
                if !stmt.kind.is_separator_exempt() {
                    self.expect_separator()?;
                }
                Ok(stmt)
            });
            match result {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.report(err);
                    self.synchronize();
                }
            }
        }
        statements
    }

    /// Statements up to the end of the line, or `else` when `stop_at_else`
    fn parse_single_line_block(&mut self, stop_at_else: bool) -> Result<Block> {
        let mut statements = Vec::new();
        loop {
            match self.current_kind() {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::Else if stop_at_else => break,
                _ => {}
            }
            let stmt = self.parse_statement()?;
            let exempt = stmt.kind.is_separator_exempt();
            statements.push(stmt);
            match self.current_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::Else if stop_at_else => break,
                _ if exempt => {}
                _ => {
                    return Err(Error::ExpectedSeparator { got: self.current().describe(), span: self.current().span })
                }
            }
        }
        Ok(statements)
    }

    pub(super) fn expect_separator(&mut self) -> Result<()> {
        match self.current_kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => Err(Error::ExpectedSeparator { got: self.current().describe(), span: self.current().span }),
        }
    }

    /// Consume the terminator of a multi-line construct, or report it missing
    pub(super) fn close_block(&mut self, terminator: TokenKind, construct: &str, start: Span) -> Span {
        if self.check(terminator) {
            return self.advance().span;
        }
        let keyword = match terminator {
            TokenKind::Next => "NEXT",
            TokenKind::Repeat => "REPEAT",
            _ => "END",
        };
        self.report(Error::MissingTerminator {
            construct: construct.to_string(),
            terminator: keyword.to_string(),
            span: start,
        });
        self.previous().span
    }

    /// Optional `then` and `else` arms.
    ///
    /// With `optional` unset at least one arm must be present. Arms that are
    /// present must hold at least one statement between them.
    pub(super) fn parse_then_else(&mut self, optional: bool) -> Result<ThenElse> {
        let start = self.current().span;
        let mut branches = ThenElse::default();
        if self.check(TokenKind::Then) {
            let keyword = self.advance();
            branches.then_block = Some(self.parse_arm(RegionKind::Then, keyword.span)?);
        }
        if self.check(TokenKind::Else) {
            let keyword = self.advance();
            branches.else_block = Some(self.parse_arm(RegionKind::Else, keyword.span)?);
        }

        if branches.is_empty() {
            if optional {
                return Ok(branches);
            }
            return Err(Error::Expected("THEN or ELSE".into(), start));
        }
        let has_statement = |block: &Option<Block>| {
            block.as_ref().map_or(false, |b| b.iter().any(|s| s.kind != StatementKind::Empty))
        };
        if !has_statement(&branches.then_block) && !has_statement(&branches.else_block) {
            self.report(Error::EmptyThenElse { span: self.span_from(start) });
        }
        Ok(branches)
    }

    /// One arm: multi-line when the keyword ends its line, single-line otherwise
    fn parse_arm(&mut self, kind: RegionKind, start: Span) -> Result<Block> {
        let multi_line = match self.current_kind() {
            TokenKind::Newline => true,
            TokenKind::Semicolon => matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof),
            _ => false,
        };
        if !multi_line {
            return self.parse_single_line_block(kind == RegionKind::Then);
        }

        self.advance();
        let block = self.parse_block(BlockEnd::End);
        let construct = if kind == RegionKind::Then { "THEN" } else { "ELSE" };
        let end = self.close_block(TokenKind::End, construct, start);
        self.regions.push(Region { kind, span: start.merge(&end) });
        Ok(block)
    }

    // ==================== Expressions ====================

    /// Parse an expression
    pub(super) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_logical()
    }

    fn take_operator(&mut self) -> Result<BinOp> {
        let token = self.advance();
        BinOp::from_token(token.kind).ok_or(Error::ExpectedExpr { span: token.span })
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        let span = left.span().merge(&right.span());
        Expr::Binary { op, left: Box::new(left), right: Box::new(right), span }
    }

    /// `and`, `or`, `matches`
    fn parse_logical(&mut self) -> Result<Expr> {
        let mut left = self.parse_comparison()?;
        while self.current_kind().is_logical() {
            let op = self.take_operator()?;
            let right = self.parse_comparison()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_concat()?;
        while self.current_kind().is_comparison() {
            let op = self.take_operator()?;
            let right = self.parse_concat()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    /// `:` and `::`
    fn parse_concat(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while self.current_kind().is_concatenation() {
            let op = self.take_operator()?;
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        while self.current_kind().is_additive() {
            let op = self.take_operator()?;
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_power()?;
        while self.current_kind().is_multiplicative() {
            let op = self.take_operator()?;
            let right = self.parse_power()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let mut left = self.parse_primary()?;
        while self.consume(TokenKind::Caret) {
            let right = self.parse_primary()?;
            left = Self::binary(BinOp::Pow, left, right);
        }
        Ok(left)
    }

    pub(super) fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        let expr = match token.kind {
            TokenKind::Number | TokenKind::HexNumber => {
                self.advance();
                Expr::Number { text: token.text, span: token.span }
            }
            TokenKind::Str => {
                self.advance();
                Expr::Str { value: string_value(&token.text), span: token.span }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner
            }
            TokenKind::Minus => {
                self.advance();
                let expr = self.parse_primary()?;
                return Ok(Expr::Negate { span: token.span.merge(&expr.span()), expr: Box::new(expr) });
            }
            TokenKind::Plus => {
                self.advance();
                return self.parse_primary();
            }
            TokenKind::AtSign => {
                self.advance();
                if !self.check(TokenKind::LParen) {
                    return Err(Error::Expected("'(' after '@'".into(), self.current().span));
                }
                let name = Ident::new("@", IdentRole::FunctionName, token.span);
                self.parse_call(name)?
            }
            TokenKind::SystemVariable => {
                self.advance();
                self.symbols.reference_variable(&token);
                Expr::Variable(Ident::new(token.text, IdentRole::Reference, token.span))
            }
            TokenKind::Ident => self.parse_name()?,
            TokenKind::If if !self.is_function_keyword() => self.parse_conditional()?,
            kind if kind.is_keyword() && self.is_function_keyword() => {
                self.advance();
                self.symbols.reference_function(&token);
                let name = Ident::new(token.text, IdentRole::FunctionName, token.span);
                self.parse_call(name)?
            }
            kind if kind.is_contextual_keyword() => {
                self.advance();
                let mut token = token;
                token.kind = TokenKind::Ident;
                self.symbols.reference_variable(&token);
                Expr::Variable(Ident::new(token.text, IdentRole::Reference, token.span))
            }
            _ => return Err(Error::ExpectedExpr { span: token.span }),
        };
        self.parse_postfix(expr)
    }

    /// A keyword used as a function name: `delete(...)`, or `if(...)` when
    /// declared and not followed by whitespace
    fn is_function_keyword(&self) -> bool {
        let token = self.current();
        token.kind.may_name_function()
            && !token.function_disallowed
            && self.peek_kind() == TokenKind::LParen
            && (is_intrinsic(&token.text) || self.symbols.contains(SymbolKind::Function, &token.text))
    }

    /// Identifier in expression position: matrix element, call, equate or variable
    fn parse_name(&mut self) -> Result<Expr> {
        let token = self.advance();
        if self.check(TokenKind::LParen) {
            if self.symbols.is_matrix(&token.text) {
                self.symbols.reference_variable(&token);
                let name = Ident::new(token.text, IdentRole::Reference, token.span);
                return self.parse_matrix_index(name);
            }
            if self.symbols.reference_function(&token).is_none() && !is_intrinsic(&token.text) {
                self.report(Error::UndeclaredFunction { name: token.text.clone(), span: token.span });
            }
            let name = Ident::new(token.text, IdentRole::FunctionName, token.span);
            return self.parse_call(name);
        }
        if self.symbols.reference_equate(&token).is_none() {
            self.symbols.reference_variable(&token);
        }
        Ok(Expr::Variable(Ident::new(token.text, IdentRole::Reference, token.span)))
    }

    /// `(args)` following a function name
    pub(super) fn parse_call(&mut self, name: Ident) -> Result<Expr> {
        let args = self.parse_args()?;
        let span = self.span_from(name.span);
        Ok(Expr::Call { name, args, span })
    }

    /// Parenthesised, comma separated expressions
    pub(super) fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.consume(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    /// `(row[, col])` of a declared matrix
    fn parse_matrix_index(&mut self, name: Ident) -> Result<Expr> {
        let start = name.span;
        let mut indexes = self.parse_args()?.into_iter();
        let row = indexes.next().ok_or(Error::ExpectedExpr { span: self.previous().span })?;
        let col = indexes.next();
        if indexes.next().is_some() {
            self.report(Error::TooManyIndexes { form: "matrix", max: MAX_SQUARE_INDEXES, span: self.span_from(start) });
        }
        Ok(Expr::MatrixIndex { name, row: Box::new(row), col: col.map(Box::new), span: self.span_from(start) })
    }

    /// `if cond then a else b` as an expression
    fn parse_conditional(&mut self) -> Result<Expr> {
        let start = self.advance().span;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Then, "THEN")?;
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Else, "ELSE")?;
        let else_expr = self.parse_expr()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
            span: self.span_from(start),
        })
    }

    /// Index, substring and OLE member suffixes
    pub(super) fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            match self.current_kind() {
                TokenKind::Less if matches!(expr, Expr::Variable(_) | Expr::MatrixIndex { .. } | Expr::Call { .. }) => {
                    match self.try_angle_index(&expr) {
                        Some(indexes) => {
                            let span = self.span_from(expr.span());
                            expr = Expr::ArrayIndex { base: Box::new(expr), indexes, span };
                        }
                        None => break,
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let mut indexes = vec![self.parse_expr()?];
                    while self.consume(TokenKind::Comma) {
                        indexes.push(self.parse_expr()?);
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = self.span_from(expr.span());
                    if indexes.len() > MAX_SQUARE_INDEXES {
                        self.report(Error::TooManyIndexes { form: "substring", max: MAX_SQUARE_INDEXES, span });
                    }
                    expr = Expr::Substring { base: Box::new(expr), indexes, span };
                }
                TokenKind::Arrow => {
                    self.advance();
                    let token = self.advance();
                    if token.kind != TokenKind::Ident && !token.kind.is_keyword() {
                        return Err(Error::ExpectedIdent { span: token.span });
                    }
                    let member = Ident::new(token.text, IdentRole::FunctionName, token.span);
                    let args = if self.check(TokenKind::LParen) { Some(self.parse_args()?) } else { None };
                    let span = self.span_from(expr.span());
                    expr = Expr::Member { object: Box::new(expr), member, args, span };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Speculatively read `<i[, j[, k]]>`.
    ///
    /// Items are parsed below comparison level so `>` can only close the
    /// list. If no closing `>` follows, every effect of the attempt is
    /// undone and the `<` is left for the comparison level.
    fn try_angle_index(&mut self, base: &Expr) -> Option<Vec<Expr>> {
        let snapshot = self.snapshot();
        self.advance(); // <
        let mut indexes = Vec::new();
        let closed = loop {
            match self.parse_concat() {
                Ok(item) => indexes.push(item),
                Err(_) => break false,
            }
            if self.consume(TokenKind::Comma) {
                continue;
            }
            break self.consume(TokenKind::Greater) || self.split_greater_equal();
        };
        if !closed {
            self.restore(snapshot);
            return None;
        }
        if indexes.len() > MAX_ANGLE_INDEXES {
            let span = self.span_from(base.span());
            self.report(Error::TooManyIndexes { form: "array", max: MAX_ANGLE_INDEXES, span });
        }
        Some(indexes)
    }

    /// `x<1>=y` lexes `>=`; consume its `>` half when it closes an index
    /// list and leave the `=` half as the current token
    fn split_greater_equal(&mut self) -> bool {
        let token = self.current();
        if token.kind != TokenKind::GreaterEqual || token.text != ">=" {
            return false;
        }
        let span = token.span;
        let greater = Token::new(TokenKind::Greater, ">", Span::single_line(span.line, span.col, span.col + 1, span.file_id));
        let equal = Token::new(TokenKind::Equal, "=", Span::single_line(span.line, span.col + 1, span.end_col, span.file_id));
        self.pos += 1;
        self.split = Some((greater, equal));
        true
    }

    /// An assignable expression; its base identifier is tagged as assigned.
    /// OLE property targets keep their object as a read.
    pub(super) fn parse_target(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let mut expr = self.parse_primary()?;
        if matches!(expr, Expr::Member { .. }) {
            return Ok(expr);
        }
        match expr.base_ident_mut() {
            Some(ident) => ident.role = IdentRole::Assignment,
            None => return Err(Error::Expected("variable".into(), start)),
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Procedure {
        let proc = parse(source, 0);
        assert!(proc.diagnostics.is_empty(), "unexpected diagnostics: {:?}", proc.diagnostics);
        proc
    }

    fn first_value(proc: &Procedure) -> &Expr {
        match &proc.statements[0].kind {
            StatementKind::Assignment { value, .. } => value,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        let proc = parse("", 0);
        assert!(proc.statements.is_empty());
        assert!(proc.diagnostics.is_empty());
        assert_eq!(proc.kind, ProcedureKind::Subroutine);
    }

    #[test]
    fn test_header() {
        let proc = parse_ok("compile function Calc(a, mat b)\nreturn a\n");
        assert_eq!(proc.kind, ProcedureKind::Function);
        assert_eq!(proc.name, "Calc");
        assert_eq!(proc.parameters.len(), 2);
        assert!(proc.parameters[1].matrix);
        assert!(proc.symbols.is_parameter("A"));
        assert!(proc.symbols.is_matrix("b"));
    }

    #[test]
    fn test_malformed_header_degrades_to_subroutine() {
        let proc = parse("function (\nx = 1\n", 0);
        assert_eq!(proc.kind, ProcedureKind::Subroutine);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.statements.len(), 1);
    }

    #[test]
    fn test_precedence_ladder() {
        let proc = parse_ok("x = 1 + 2 * 3 : 'a' = 'b' and y\n");
        let Expr::Binary { op: BinOp::And, left, .. } = first_value(&proc) else {
            panic!("expected and at the top");
        };
        let Expr::Binary { op: BinOp::Eq, left, .. } = left.as_ref() else {
            panic!("expected comparison under and");
        };
        let Expr::Binary { op: BinOp::Concat, left, .. } = left.as_ref() else {
            panic!("expected concatenation under comparison");
        };
        assert!(matches!(left.as_ref(), Expr::Binary { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_angle_index_and_comparison() {
        let proc = parse_ok("x = rec<1, 2> < y\n");
        let Expr::Binary { op: BinOp::Lt, left, .. } = first_value(&proc) else {
            panic!("expected comparison");
        };
        assert!(matches!(left.as_ref(), Expr::ArrayIndex { indexes, .. } if indexes.len() == 2));
    }

    #[test]
    fn test_angle_backtracks_to_comparison() {
        let proc = parse_ok("if a < b then c = 1\n");
        let StatementKind::If { cond, .. } = &proc.statements[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(cond, Expr::Binary { op: BinOp::Lt, .. }));
    }

    #[test]
    fn test_index_followed_by_equal_sign() {
        let proc = parse_ok("if rec<1>='x' then y = 1\n");
        let StatementKind::If { cond, .. } = &proc.statements[0].kind else {
            panic!("expected if");
        };
        let Expr::Binary { op: BinOp::Eq, left, .. } = cond else {
            panic!("expected equality");
        };
        assert!(matches!(left.as_ref(), Expr::ArrayIndex { .. }));
        assert_eq!(left.span().end_col, 9);
    }

    #[test]
    fn test_split_leaves_token_buffer_untouched() {
        let lexed = lexer::tokenize("x = rec<1>=2\nrec<2>=3\n", 0);
        let count = lexed.tokens.len();
        let mut parser = Parser::new(lexed.tokens, 0);
        let statements = parser.parse_block(BlockEnd::Eof);
        assert_eq!(statements.len(), 2);
        assert!(parser.diagnostics.is_empty());
        assert!(matches!(statements[1].kind, StatementKind::Assignment { target: Expr::ArrayIndex { .. }, .. }));
        assert_eq!(parser.tokens.len(), count);
    }

    #[test]
    fn test_failed_speculation_leaves_no_trace() {
        let proc = parse("b = 1\nif a < b + foo(1) then x = 1\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.diagnostics[0].message, "Function foo has not been declared");
        let b = proc.symbols.lookup(SymbolKind::Variable, "b").unwrap();
        assert_eq!(proc.symbols.references_of(b.id).count(), 2);
    }

    #[test]
    fn test_too_many_indexes() {
        let proc = parse("x = a<1, 2, 3, 4>\ny = b[1, 2, 3]\n", 0);
        assert_eq!(proc.diagnostics.len(), 2);
        assert!(proc.diagnostics.iter().all(|d| d.message.starts_with("Too many indexes")));
        assert_eq!(proc.statements.len(), 2);
    }

    #[test]
    fn test_matrix_versus_function_call() {
        let proc = parse("dim m(10)\nx = m(1)\ny = len(x)\nz = foo(x)\n", 0);
        let value = |i: usize| match &proc.statements[i].kind {
            StatementKind::Assignment { value, .. } => value.clone(),
            other => panic!("expected assignment, got {:?}", other),
        };
        assert!(matches!(value(1), Expr::MatrixIndex { .. }));
        assert!(matches!(value(2), Expr::Call { .. }));
        assert!(matches!(value(3), Expr::Call { .. }));
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.diagnostics[0].message, "Function foo has not been declared");
    }

    #[test]
    fn test_keyword_function_names() {
        let proc = parse_ok("x = delete(rec, 1, 0, 0)\ny = if x then 1 else 2\n");
        assert!(matches!(first_value(&proc), Expr::Call { name, .. } if name.name == "delete"));
        let StatementKind::Assignment { value, .. } = &proc.statements[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Conditional { .. }));
    }

    #[test]
    fn test_declared_if_function_requires_adjacent_paren() {
        let proc = parse_ok("declare function if\nx = if(a)\ny = if (a) then 1 else 2\n");
        let StatementKind::Assignment { value, .. } = &proc.statements[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Call { .. }));
        let StatementKind::Assignment { value, .. } = &proc.statements[2].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Conditional { .. }));
    }

    #[test]
    fn test_ole_member_access() {
        let proc = parse_ok("x = obj->Name\nobj->Visible = 1\nobj->Show(1)\n");
        assert!(matches!(first_value(&proc), Expr::Member { args: None, .. }));
        assert!(matches!(proc.statements[1].kind, StatementKind::Assignment { target: Expr::Member { .. }, .. }));
        assert!(matches!(proc.statements[2].kind, StatementKind::OleCall { .. }));
    }

    #[test]
    fn test_error_recovery_one_diagnostic_per_statement() {
        let proc = parse("x = \ny = 2\nz = (1\nw = 3\n", 0);
        assert_eq!(proc.diagnostics.len(), 2);
        assert_eq!(proc.statements.len(), 2);
        assert_eq!(proc.diagnostics[0].line_no, 1);
        assert_eq!(proc.diagnostics[1].line_no, 3);
    }

    #[test]
    fn test_missing_separator() {
        let proc = parse("x = 1 y = 2\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert!(proc.diagnostics[0].message.starts_with("Expected a new line"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let source = "x = 1\nif x then gosub Sub else goto Done\nSub:\nreturn\nDone:\nend\n";
        let a = parse(source, 0);
        let b = parse(source, 0);
        assert_eq!(a.statements, b.statements);
        assert_eq!(a.diagnostics, b.diagnostics);
    }
}
