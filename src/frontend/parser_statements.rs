//! Statement parsing
//!
//! One routine per Basic+ statement form, dispatched on the first token.

use crate::frontend::ast::*;
use crate::frontend::parser::{BlockEnd, Parser};
use crate::frontend::symbols::{Symbol, SymbolKind, VariableScope};
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// Stand-in for an expression that failed to parse
fn placeholder(span: Span) -> Expr {
    Expr::Str { value: String::new(), span }
}

/// Wording for an existing variable symbol in redeclaration errors
fn describe_variable(symbol: &Symbol) -> &'static str {
    match symbol.scope {
        Some(VariableScope::System) => "a system variable",
        Some(VariableScope::Parameter) => "a parameter",
        Some(VariableScope::Common) => "a common variable",
        _ if symbol.is_matrix() => "a matrix",
        _ => "a variable",
    }
}

impl Parser {
    /// Parse one statement and annotate it with its span
    pub(super) fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.current().span;
        let kind = self.parse_statement_kind()?;
        Ok(Statement { kind, span: self.span_from(start) })
    }

    fn parse_statement_kind(&mut self) -> Result<StatementKind> {
        match self.current_kind() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(StatementKind::Empty)
            }
            TokenKind::Ident if self.peek_kind() == TokenKind::Colon => self.parse_label(),
            TokenKind::Ident | TokenKind::SystemVariable => self.parse_assignment_or_call(),
            kind if kind.is_contextual_keyword() && AssignOp::from_token(self.peek_kind()).is_some() => {
                self.parse_assignment_or_call()
            }

            // Control flow
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Loop => self.parse_loop(),
            TokenKind::While | TokenKind::Until => self.parse_loop_condition(),
            TokenKind::Begin => self.parse_case(),
            TokenKind::Gosub | TokenKind::Goto => self.parse_jump(),
            TokenKind::On => self.parse_on(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Call => self.parse_call_statement(),

            // Declarations
            TokenKind::Declare => self.parse_declare(),
            TokenKind::Equ => self.parse_equate(),
            TokenKind::Common => self.parse_common(),
            TokenKind::Dim => self.parse_dim(),
            TokenKind::Mat => self.parse_mat(),
            TokenKind::DollarInsert => self.parse_insert(),

            // Record I/O
            TokenKind::Read | TokenKind::ReadU | TokenKind::ReadO | TokenKind::ReadV => self.parse_read(),
            TokenKind::MatRead => self.parse_matread(),
            TokenKind::ReadNext => self.parse_readnext(),
            TokenKind::Write | TokenKind::WriteU | TokenKind::WriteV => self.parse_write(),
            TokenKind::MatWrite => self.parse_matwrite(),
            TokenKind::Open => self.parse_open(),
            TokenKind::Delete => self.parse_file_key(TokenKind::Delete),
            TokenKind::Lock => self.parse_file_key(TokenKind::Lock),
            TokenKind::Unlock => self.parse_file_key(TokenKind::Unlock),
            TokenKind::Select => {
                self.advance();
                Ok(StatementKind::Select { source: self.parse_expr()? })
            }
            TokenKind::ClearSelect => {
                self.advance();
                let cursor = if self.at_statement_end() { None } else { Some(self.parse_expr()?) };
                Ok(StatementKind::ClearSelect { cursor })
            }

            // Dynamic arrays
            TokenKind::Locate => self.parse_locate(),
            TokenKind::Swap => self.parse_swap(),
            TokenKind::Convert => self.parse_convert(),
            TokenKind::Transfer => self.parse_transfer(),
            TokenKind::Remove => self.parse_remove(),
            TokenKind::MatParse => self.parse_matparse(),

            // OS files
            TokenKind::OsRead
            | TokenKind::OsWrite
            | TokenKind::OsOpen
            | TokenKind::OsBRead
            | TokenKind::OsBWrite
            | TokenKind::OsClose
            | TokenKind::OsDelete => self.parse_os_statement(),

            TokenKind::InitRnd => {
                self.advance();
                Ok(StatementKind::InitRnd { seed: self.parse_expr()? })
            }
            TokenKind::Flush => self.simple(StatementKind::Flush),
            TokenKind::GarbageCollect => self.simple(StatementKind::GarbageCollect),
            TokenKind::Null => self.simple(StatementKind::Null),
            TokenKind::Debug => self.simple(StatementKind::Debug),
            TokenKind::Stop => self.simple(StatementKind::Stop),
            TokenKind::End => self.simple(StatementKind::End),

            _ => Err(Error::UnexpectedToken {
                expected: "statement".to_string(),
                got: self.current().describe(),
                span: self.current().span,
            }),
        }
    }

    fn simple(&mut self, kind: StatementKind) -> Result<StatementKind> {
        self.advance();
        Ok(kind)
    }

    /// `ON`/`TO` between a value and its destination
    fn expect_on_or_to(&mut self) -> Result<()> {
        if self.consume(TokenKind::On) || self.consume(TokenKind::To) {
            Ok(())
        } else {
            Err(Error::Expected("ON or TO".into(), self.current().span))
        }
    }

    /// Identifier or system variable naming a variable being declared
    fn expect_variable_name(&mut self) -> Result<Token> {
        match self.current_kind() {
            TokenKind::Ident | TokenKind::SystemVariable => Ok(self.advance()),
            _ => Err(Error::ExpectedIdent { span: self.current().span }),
        }
    }

    /// A variable reference outside an expression, e.g. a matrix name
    fn variable_ident(&mut self, role: IdentRole) -> Result<Ident> {
        let token = self.expect_variable_name()?;
        self.symbols.reference_variable(&token);
        Ok(Ident::new(token.text, role, token.span))
    }

    // ==================== Assignment and calls ====================

    fn parse_label(&mut self) -> Result<StatementKind> {
        let token = self.advance();
        self.advance(); // :
        if !self.symbols.declare_label(&token) {
            self.report(Error::DuplicateDefinition { what: "Label", name: token.text.clone(), span: token.span });
        }
        Ok(StatementKind::InternalSub { label: Ident::new(token.text, IdentRole::Label, token.span) })
    }

    fn parse_assignment_or_call(&mut self) -> Result<StatementKind> {
        let token = self.current().clone();
        if token.kind == TokenKind::Ident
            && self.peek_kind() == TokenKind::LParen
            && !self.symbols.is_matrix(&token.text)
        {
            return self.parse_subroutine_call();
        }

        let target = self.parse_target()?;
        if matches!(target, Expr::Member { .. }) && self.at_statement_end() {
            return Ok(StatementKind::OleCall { target });
        }
        let op_token = self.current().clone();
        let op = AssignOp::from_token(op_token.kind)
            .ok_or_else(|| Error::Expected("'=' or an assignment operator".into(), op_token.span))?;
        self.advance();
        let value = self.parse_expr()?;

        match target {
            Expr::MatrixIndex { name, row, col, .. } if op == AssignOp::Assign => {
                Ok(StatementKind::MatrixAssignment { name, row: *row, col: col.map(|c| *c), value })
            }
            target => Ok(StatementKind::Assignment { target, op, value }),
        }
    }

    /// Bare `name(args)`: needs a declared subroutine or function
    fn parse_subroutine_call(&mut self) -> Result<StatementKind> {
        let token = self.advance();
        let known = self.symbols.reference_subroutine(&token).is_some()
            || self.symbols.reference_function(&token).is_some();
        if !known {
            self.report(Error::UndeclaredSubroutine { name: token.text.clone(), span: token.span });
        }
        let args = self.parse_args()?;
        Ok(StatementKind::SubroutineCall { name: Ident::new(token.text, IdentRole::FunctionName, token.span), args })
    }

    /// `call name[(args)]` or `call @var(args)`
    fn parse_call_statement(&mut self) -> Result<StatementKind> {
        self.advance();
        let indirect = self.consume(TokenKind::AtSign);
        let name = if indirect {
            self.variable_ident(IdentRole::Reference)?
        } else {
            let token = self.expect_ident()?;
            self.symbols.reference_or_declare_subroutine(&token);
            Ident::new(token.text, IdentRole::FunctionName, token.span)
        };
        let args = if self.check(TokenKind::LParen) { self.parse_args()? } else { Vec::new() };
        Ok(StatementKind::Call { name, args, indirect })
    }

    // ==================== Control flow ====================

    fn parse_if(&mut self) -> Result<StatementKind> {
        self.advance();
        let cond = self.parse_expr()?;
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::If { cond, branches })
    }

    /// `for v = a to b [step c]` ... `next [v]`
    ///
    /// A malformed header is reported and skipped; the body is still parsed
    /// so its `next` closes this loop.
    fn parse_for(&mut self) -> Result<StatementKind> {
        let start = self.advance().span;
        let mut var = Ident::new(String::new(), IdentRole::Assignment, start);
        let (from, end, step) = match self.parse_for_header(&mut var) {
            Ok(bounds) => bounds,
            Err(err) => {
                self.report(err);
                self.synchronize();
                (placeholder(start), placeholder(start), None)
            }
        };

        self.loop_depth += 1;
        let body = self.parse_block(BlockEnd::Next);
        self.loop_depth -= 1;

        let closed = self.check(TokenKind::Next);
        self.close_block(TokenKind::Next, "FOR", start);
        let mut next_var = None;
        if closed && self.check(TokenKind::Ident) {
            let token = self.advance();
            self.symbols.reference_variable(&token);
            if !var.name.is_empty() && token.folded() != var.folded() {
                self.report(Error::NextMismatch { expected: var.name.clone(), got: token.text.clone(), span: token.span });
            }
            next_var = Some(Ident::new(token.text, IdentRole::Reference, token.span));
        }
        self.regions.push(Region { kind: RegionKind::For, span: self.span_from(start) });
        Ok(StatementKind::For { var, start: from, end, step, body, next_var })
    }

    fn parse_for_header(&mut self, var: &mut Ident) -> Result<(Expr, Expr, Option<Expr>)> {
        let var_token = self.expect_ident()?;
        self.symbols.reference_variable(&var_token);
        *var = Ident::new(var_token.text, IdentRole::Assignment, var_token.span);
        self.expect(TokenKind::Equal, "'='")?;
        let from = self.parse_expr()?;
        self.expect(TokenKind::To, "TO")?;
        let end = self.parse_expr()?;
        let step = if self.consume(TokenKind::Step) { Some(self.parse_expr()?) } else { None };
        Ok((from, end, step))
    }

    fn parse_loop(&mut self) -> Result<StatementKind> {
        let start = self.advance().span;
        self.loop_depth += 1;
        let body = self.parse_block(BlockEnd::Repeat);
        self.loop_depth -= 1;
        self.close_block(TokenKind::Repeat, "LOOP", start);
        self.regions.push(Region { kind: RegionKind::Loop, span: self.span_from(start) });
        Ok(StatementKind::Loop { body })
    }

    /// `while cond [do]` / `until cond [do]`
    fn parse_loop_condition(&mut self) -> Result<StatementKind> {
        let keyword = self.advance();
        if self.loop_depth == 0 {
            self.report(Error::MisplacedLoopCondition { keyword: keyword.text.to_uppercase(), span: keyword.span });
        }
        let cond = self.parse_expr()?;
        self.consume(TokenKind::Do);
        let kind = if keyword.kind == TokenKind::While { LoopConditionKind::While } else { LoopConditionKind::Until };
        Ok(StatementKind::LoopCondition { kind, cond })
    }

    /// `begin case` ... `case cond` ... `end case`
    fn parse_case(&mut self) -> Result<StatementKind> {
        let start = self.advance().span;
        self.expect(TokenKind::Case, "CASE")?;
        self.expect_separator()?;

        let mut arms = Vec::new();
        loop {
            while self.consume(TokenKind::Newline) {}
            match self.current_kind() {
                TokenKind::Case => {
                    let arm_start = self.advance().span;
                    let cond = match self.parse_expr().and_then(|cond| self.expect_separator().map(|_| cond)) {
                        Ok(cond) => cond,
                        Err(err) => {
                            self.report(err);
                            self.synchronize();
                            placeholder(arm_start)
                        }
                    };
                    let body = self.parse_block(BlockEnd::CaseArm);
                    let span = self.span_from(arm_start);
                    self.regions.push(Region { kind: RegionKind::CaseArm, span });
                    arms.push(CaseArm { cond, body, span });
                }
                TokenKind::End if self.peek_kind() == TokenKind::Case => {
                    self.advance();
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.report(Error::MissingTerminator {
                        construct: "BEGIN CASE".to_string(),
                        terminator: "END CASE".to_string(),
                        span: start,
                    });
                    break;
                }
                _ => {
                    // Statements outside any arm
                    self.report(Error::Expected("CASE".into(), self.current().span));
                    while !matches!(self.current_kind(), TokenKind::Newline | TokenKind::Eof) {
                        self.advance();
                    }
                }
            }
        }
        self.regions.push(Region { kind: RegionKind::Case, span: self.span_from(start) });
        Ok(StatementKind::Case { arms })
    }

    fn parse_label_ref(&mut self) -> Result<Ident> {
        let token = self.expect_ident()?;
        self.symbols.reference_label(&token);
        Ok(Ident::new(token.text, IdentRole::Label, token.span))
    }

    fn parse_jump(&mut self) -> Result<StatementKind> {
        let keyword = self.advance();
        let label = self.parse_label_ref()?;
        if keyword.kind == TokenKind::Gosub {
            Ok(StatementKind::Gosub { label })
        } else {
            Ok(StatementKind::Goto { label })
        }
    }

    /// `on x goto|gosub a, b, c`
    fn parse_on(&mut self) -> Result<StatementKind> {
        self.advance();
        let selector = self.parse_expr()?;
        let kind = match self.current_kind() {
            TokenKind::Goto => JumpKind::Goto,
            TokenKind::Gosub => JumpKind::Gosub,
            _ => return Err(Error::Expected("GOTO or GOSUB".into(), self.current().span)),
        };
        self.advance();
        let mut labels = vec![self.parse_label_ref()?];
        while self.consume(TokenKind::Comma) {
            labels.push(self.parse_label_ref()?);
        }
        Ok(StatementKind::OnJump { kind, selector, labels })
    }

    fn parse_return(&mut self) -> Result<StatementKind> {
        self.advance();
        let value = if self.at_statement_end() { None } else { Some(self.parse_expr()?) };
        Ok(StatementKind::Return { value })
    }

    // ==================== Declarations ====================

    /// `declare function|subroutine a, b`
    fn parse_declare(&mut self) -> Result<StatementKind> {
        self.advance();
        let kind = match self.current_kind() {
            TokenKind::Function => DeclareKind::Function,
            TokenKind::Subroutine => DeclareKind::Subroutine,
            _ => return Err(Error::Expected("FUNCTION or SUBROUTINE".into(), self.current().span)),
        };
        self.advance();

        let mut names = Vec::new();
        loop {
            // Keywords such as `if` or `delete` may name routines
            let token = self.current().clone();
            if token.kind != TokenKind::Ident && !token.kind.is_keyword() {
                return Err(Error::ExpectedIdent { span: token.span });
            }
            self.advance();
            let (declared, what) = match kind {
                DeclareKind::Function => (self.symbols.declare_function(&token), "Function"),
                DeclareKind::Subroutine => (self.symbols.declare_subroutine(&token), "Subroutine"),
            };
            if !declared {
                self.report(Error::RedundantDeclaration { what, name: token.text.clone(), span: token.span });
            }
            names.push(Ident::new(token.text, IdentRole::FunctionName, token.span));
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        Ok(StatementKind::Declare { kind, names })
    }

    /// Whether `token` may be declared as `wanted`; reports the conflict if not
    fn check_redeclaration(&mut self, token: &Token, wanted: &'static str) -> bool {
        if token.kind == TokenKind::SystemVariable {
            self.report(Error::SystemVariableRedefinition { name: token.text.clone(), span: token.span });
            return false;
        }
        if wanted != "an equate" && self.symbols.contains(SymbolKind::Equate, &token.text) {
            self.report(Error::InvalidRedeclaration {
                name: token.text.clone(),
                existing: "an equate",
                wanted,
                span: token.span,
            });
            return false;
        }
        let err = match self.symbols.lookup(SymbolKind::Variable, &token.text) {
            None => return true,
            Some(symbol) if symbol.is_matrix() && wanted == "a matrix" => {
                Error::DuplicateDefinition { what: "Matrix", name: token.text.clone(), span: token.span }
            }
            Some(symbol) if symbol.scope == Some(VariableScope::Common) && wanted == "a common variable" => {
                Error::DuplicateDefinition { what: "Common variable", name: token.text.clone(), span: token.span }
            }
            Some(symbol) => Error::InvalidRedeclaration {
                name: token.text.clone(),
                existing: describe_variable(symbol),
                wanted,
                span: token.span,
            },
        };
        self.report(err);
        false
    }

    /// `equ name to value`
    fn parse_equate(&mut self) -> Result<StatementKind> {
        self.advance();
        let token = self.expect_variable_name()?;
        self.expect(TokenKind::To, "TO")?;
        let value = self.parse_expr()?;
        if self.check_redeclaration(&token, "an equate") && !self.symbols.declare_equate(&token, value.clone()) {
            self.report(Error::DuplicateDefinition { what: "Equate", name: token.text.clone(), span: token.span });
        }
        Ok(StatementKind::Equate { name: Ident::new(token.text, IdentRole::Assignment, token.span), value })
    }

    /// `(rows[, cols])` after a matrix name
    fn parse_dimensions(&mut self, name: &Token) -> Result<(Expr, Option<Expr>)> {
        let mut dims = self.parse_args()?.into_iter();
        let rows = dims.next().ok_or(Error::ExpectedExpr { span: self.previous().span })?;
        let cols = dims.next();
        if dims.next().is_some() {
            self.report(Error::TooManyIndexes { form: "matrix", max: 2, span: self.span_from(name.span) });
        }
        Ok((rows, cols))
    }

    /// `common [/label/] a, m(10), ...`
    fn parse_common(&mut self) -> Result<StatementKind> {
        self.advance();
        let label = if self.consume(TokenKind::Slash) {
            let token = self.expect_ident()?;
            self.expect(TokenKind::Slash, "'/'")?;
            if !self.symbols.declare_common_label(&token) {
                self.report(Error::DuplicateDefinition { what: "Common block", name: token.text.clone(), span: token.span });
            }
            Some(Ident::new(token.text, IdentRole::Label, token.span))
        } else {
            None
        };

        let mut vars = Vec::new();
        loop {
            let token = self.expect_variable_name()?;
            let dims = if self.check(TokenKind::LParen) { Some(self.parse_dimensions(&token)?) } else { None };
            if self.check_redeclaration(&token, "a common variable") {
                self.symbols.declare_common_variable(&token, dims.clone());
            }
            let name = Ident::new(token.text, IdentRole::Assignment, token.span);
            let dims = dims.map(|(rows, cols)| Dimension { name: name.clone(), rows, cols });
            vars.push(CommonVar { name, dims });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        Ok(StatementKind::Common { label, vars })
    }

    /// `dim m(r[, c]), ...`
    fn parse_dim(&mut self) -> Result<StatementKind> {
        self.advance();
        let mut matrices = Vec::new();
        loop {
            let token = self.expect_variable_name()?;
            let (rows, cols) = self.parse_dimensions(&token)?;
            if self.check_redeclaration(&token, "a matrix") {
                self.symbols.declare_matrix(&token, rows.clone(), cols.clone());
            }
            matrices.push(Dimension { name: Ident::new(token.text, IdentRole::Assignment, token.span), rows, cols });
            if !self.consume(TokenKind::Comma) {
                break;
            }
        }
        Ok(StatementKind::Dim { matrices })
    }

    /// `mat m = value` or `mat m = mat other`
    fn parse_mat(&mut self) -> Result<StatementKind> {
        self.advance();
        let name = self.variable_ident(IdentRole::Assignment)?;
        if !self.symbols.is_matrix(&name.name) {
            self.report(Error::Expected("a dimensioned matrix".into(), name.span));
        }
        self.expect(TokenKind::Equal, "'='")?;
        let value = if self.consume(TokenKind::Mat) {
            Expr::Variable(self.variable_ident(IdentRole::Reference)?)
        } else {
            self.parse_expr()?
        };
        Ok(StatementKind::Mat { name, value })
    }

    /// `$insert name`
    fn parse_insert(&mut self) -> Result<StatementKind> {
        self.advance();
        let token = self.expect_ident()?;
        if !self.symbols.declare_insert(&token) {
            self.report(Error::DuplicateInsert { name: token.text.clone(), span: token.span });
        }
        Ok(StatementKind::Insert { name: Ident::new(token.text, IdentRole::InsertName, token.span) })
    }

    // ==================== Record I/O ====================

    /// `file, key` shared by most record statements
    fn parse_file_and_key(&mut self) -> Result<(Expr, Expr)> {
        let file = self.parse_expr()?;
        self.expect(TokenKind::Comma, "','")?;
        let key = self.parse_expr()?;
        Ok((file, key))
    }

    /// `read|readu|reado target from file, key` and `readv target from file, key, col`
    fn parse_read(&mut self) -> Result<StatementKind> {
        let keyword = self.advance();
        let kind = match keyword.kind {
            TokenKind::Read => ReadKind::Read,
            TokenKind::ReadU => ReadKind::ReadU,
            TokenKind::ReadO => ReadKind::ReadO,
            _ => ReadKind::ReadV,
        };
        let target = self.parse_target()?;
        self.expect(TokenKind::From, "FROM")?;
        let (file, key) = self.parse_file_and_key()?;
        let column = if kind == ReadKind::ReadV {
            self.expect(TokenKind::Comma, "','")?;
            Some(self.parse_expr()?)
        } else {
            None
        };
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::Read { kind, target, file, key, column, branches })
    }

    fn parse_matread(&mut self) -> Result<StatementKind> {
        self.advance();
        let name = self.variable_ident(IdentRole::Assignment)?;
        self.expect(TokenKind::From, "FROM")?;
        let (file, key) = self.parse_file_and_key()?;
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::MatRead { name, file, key, branches })
    }

    /// `readnext key [using cursor]`
    fn parse_readnext(&mut self) -> Result<StatementKind> {
        self.advance();
        let target = self.parse_target()?;
        let cursor = if self.consume(TokenKind::Using) { Some(self.parse_expr()?) } else { None };
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::ReadNext { target, cursor, branches })
    }

    /// `write|writeu value on file, key` and `writev value on file, key, col`
    fn parse_write(&mut self) -> Result<StatementKind> {
        let keyword = self.advance();
        let kind = match keyword.kind {
            TokenKind::Write => WriteKind::Write,
            TokenKind::WriteU => WriteKind::WriteU,
            _ => WriteKind::WriteV,
        };
        let value = self.parse_expr()?;
        self.expect_on_or_to()?;
        let (file, key) = self.parse_file_and_key()?;
        let column = if kind == WriteKind::WriteV {
            self.expect(TokenKind::Comma, "','")?;
            Some(self.parse_expr()?)
        } else {
            None
        };
        let branches = self.parse_then_else(true)?;
        Ok(StatementKind::Write { kind, value, file, key, column, branches })
    }

    fn parse_matwrite(&mut self) -> Result<StatementKind> {
        self.advance();
        let name = self.variable_ident(IdentRole::Reference)?;
        self.expect_on_or_to()?;
        let (file, key) = self.parse_file_and_key()?;
        let branches = self.parse_then_else(true)?;
        Ok(StatementKind::MatWrite { name, file, key, branches })
    }

    /// `open [dict,] table to handle`
    fn parse_open(&mut self) -> Result<StatementKind> {
        self.advance();
        let first = self.parse_expr()?;
        let (dict, table) = if self.consume(TokenKind::Comma) {
            (Some(first), self.parse_expr()?)
        } else {
            (None, first)
        };
        self.expect(TokenKind::To, "TO")?;
        let handle = self.parse_target()?;
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::Open { dict, table, handle, branches })
    }

    /// `delete`, `lock` and `unlock`: `keyword file, key`
    fn parse_file_key(&mut self, keyword: TokenKind) -> Result<StatementKind> {
        self.advance();
        let (file, key) = self.parse_file_and_key()?;
        let branches = self.parse_then_else(keyword != TokenKind::Lock)?;
        Ok(match keyword {
            TokenKind::Delete => StatementKind::Delete { file, key, branches },
            TokenKind::Lock => StatementKind::Lock { file, key, branches },
            _ => StatementKind::Unlock { file, key, branches },
        })
    }

    // ==================== Dynamic arrays ====================

    /// `locate needle in haystack [using delim] [by seq] setting pos`
    fn parse_locate(&mut self) -> Result<StatementKind> {
        self.advance();
        let needle = self.parse_expr()?;
        self.expect(TokenKind::In, "IN")?;
        let haystack = self.parse_expr()?;
        let mut using = None;
        let mut by = None;
        loop {
            if self.consume(TokenKind::Using) {
                using = Some(self.parse_expr()?);
            } else if self.consume(TokenKind::By) {
                by = Some(self.parse_expr()?);
            } else {
                break;
            }
        }
        self.expect(TokenKind::Setting, "SETTING")?;
        let position = self.parse_target()?;
        let branches = self.parse_then_else(false)?;
        Ok(StatementKind::Locate { needle, haystack, using, by, position, branches })
    }

    /// `swap old with new in target`
    fn parse_swap(&mut self) -> Result<StatementKind> {
        self.advance();
        let old = self.parse_expr()?;
        self.expect(TokenKind::With, "WITH")?;
        let new = self.parse_expr()?;
        self.expect(TokenKind::In, "IN")?;
        let target = self.parse_target()?;
        Ok(StatementKind::Swap { old, new, target })
    }

    /// `convert from to to in target`
    fn parse_convert(&mut self) -> Result<StatementKind> {
        self.advance();
        let from = self.parse_expr()?;
        self.expect(TokenKind::To, "TO")?;
        let to = self.parse_expr()?;
        self.expect(TokenKind::In, "IN")?;
        let target = self.parse_target()?;
        Ok(StatementKind::Convert { from, to, target })
    }

    /// `transfer source to target`
    fn parse_transfer(&mut self) -> Result<StatementKind> {
        self.advance();
        let source = self.parse_primary()?;
        self.expect(TokenKind::To, "TO")?;
        let target = self.parse_target()?;
        Ok(StatementKind::Transfer { source, target })
    }

    /// `remove target from source at pos setting flag`
    fn parse_remove(&mut self) -> Result<StatementKind> {
        self.advance();
        let target = self.parse_target()?;
        self.expect(TokenKind::From, "FROM")?;
        let source = self.parse_expr()?;
        self.expect(TokenKind::At, "AT")?;
        let position = self.parse_target()?;
        self.expect(TokenKind::Setting, "SETTING")?;
        let flag = self.parse_target()?;
        Ok(StatementKind::Remove { target, source, position, flag })
    }

    /// `matparse source into m [using delim]`
    fn parse_matparse(&mut self) -> Result<StatementKind> {
        self.advance();
        let source = self.parse_expr()?;
        self.expect(TokenKind::Into, "INTO")?;
        let name = self.variable_ident(IdentRole::Assignment)?;
        let delimiter = if self.consume(TokenKind::Using) { Some(self.parse_expr()?) } else { None };
        Ok(StatementKind::MatParse { source, name, delimiter })
    }

    // ==================== OS files ====================

    fn parse_os_statement(&mut self) -> Result<StatementKind> {
        let keyword = self.advance();
        let kind = match keyword.kind {
            TokenKind::OsRead => {
                let target = self.parse_target()?;
                self.expect(TokenKind::From, "FROM")?;
                let path = self.parse_expr()?;
                let branches = self.parse_then_else(false)?;
                StatementKind::OsRead { target, path, branches }
            }
            TokenKind::OsWrite => {
                let value = self.parse_expr()?;
                self.expect_on_or_to()?;
                StatementKind::OsWrite { value, path: self.parse_expr()? }
            }
            TokenKind::OsOpen => {
                let path = self.parse_expr()?;
                self.expect(TokenKind::To, "TO")?;
                let handle = self.parse_target()?;
                let branches = self.parse_then_else(false)?;
                StatementKind::OsOpen { path, handle, branches }
            }
            TokenKind::OsBRead => {
                let target = self.parse_target()?;
                self.expect(TokenKind::From, "FROM")?;
                let handle = self.parse_expr()?;
                self.expect(TokenKind::At, "AT")?;
                let position = self.parse_expr()?;
                self.expect(TokenKind::Length, "LENGTH")?;
                StatementKind::OsBRead { target, handle, position, length: self.parse_expr()? }
            }
            TokenKind::OsBWrite => {
                let value = self.parse_expr()?;
                self.expect_on_or_to()?;
                let handle = self.parse_expr()?;
                self.expect(TokenKind::At, "AT")?;
                StatementKind::OsBWrite { value, handle, position: self.parse_expr()? }
            }
            TokenKind::OsClose => StatementKind::OsClose { handle: self.parse_expr()? },
            _ => StatementKind::OsDelete { path: self.parse_expr()? },
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::ast::*;
    use crate::frontend::parser::parse;
    use crate::frontend::symbols::{SymbolKind, VariableScope, VariableType};
    use crate::utils::Severity;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Procedure {
        let proc = parse(source, 0);
        assert!(proc.diagnostics.is_empty(), "unexpected diagnostics: {:?}", proc.diagnostics);
        proc
    }

    fn messages(proc: &Procedure) -> Vec<String> {
        proc.diagnostics.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn test_simple_program() {
        let proc = parse_ok("a = 1\nb = a + 1\nend\n");
        assert_eq!(proc.statements.len(), 3);
        assert!(matches!(proc.statements[2].kind, StatementKind::End));
        for name in ["a", "b"] {
            let symbol = proc.symbols.lookup(SymbolKind::Variable, name).unwrap();
            assert_eq!(symbol.scope, Some(VariableScope::Local));
            assert_eq!(symbol.ty, Some(VariableType::Dynamic));
        }
    }

    #[test]
    fn test_statement_spans() {
        let proc = parse_ok("a = 1\n  b = a + 10\n");
        let span = proc.statements[1].span;
        assert_eq!((span.line, span.col, span.end_line, span.end_col), (2, 2, 2, 12));
    }

    #[test]
    fn test_undefined_label() {
        let proc = parse("goto foo\nend\n", 0);
        assert_eq!(messages(&proc), vec!["Label foo not defined".to_string()]);
        let diag = &proc.diagnostics[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.line_no, 1);
        assert_eq!((diag.start_col, diag.end_col), (5, 8));
    }

    #[test]
    fn test_forward_label_case_insensitive() {
        let proc = parse_ok("GOTO foo\nFoo:\nreturn\n");
        let label = proc.symbols.lookup(SymbolKind::Label, "FOO").unwrap();
        assert!(label.is_declared());
        assert_eq!(proc.symbols.references_of(label.id).count(), 2);
        assert!(proc.labels.contains("foo"));
    }

    #[test]
    fn test_duplicate_label() {
        let proc = parse("a:\nA:\n", 0);
        assert_eq!(messages(&proc), vec!["Label A is already defined".to_string()]);
    }

    #[test]
    fn test_single_line_then_else() {
        let proc = parse_ok("if x then a = 1; b = 2 else a = 3\n");
        let StatementKind::If { branches, .. } = &proc.statements[0].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.then_block.as_ref().map(Vec::len), Some(2));
        assert_eq!(branches.else_block.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_multi_line_then_else_regions() {
        let proc = parse_ok("if x then\n  a = 1\nend else\n  a = 2\nend\nb = a\n");
        assert_eq!(proc.statements.len(), 2);
        let kinds: Vec<_> = proc.regions.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RegionKind::Then, RegionKind::Else]);
        assert_eq!((proc.regions[0].span.line, proc.regions[0].span.end_line), (1, 3));
    }

    #[test]
    fn test_empty_then_is_error() {
        let proc = parse("if x then\nend\n", 0);
        assert_eq!(messages(&proc), vec!["THEN or ELSE must contain at least one statement".to_string()]);
    }

    #[test]
    fn test_optional_else_for_unlock() {
        let proc = parse_ok("unlock f, k\ndelete f, k\nwrite r on f, k\n");
        assert_eq!(proc.statements.len(), 3);
    }

    #[test]
    fn test_read_requires_then_or_else() {
        let proc = parse("read rec from f, id\n", 0);
        assert_eq!(messages(&proc), vec!["Expected THEN or ELSE".to_string()]);
    }

    #[test]
    fn test_for_next() {
        let proc = parse_ok("for i = 1 to 10 step 2\n  x = i\nnext i\n");
        let StatementKind::For { var, step, body, next_var, .. } = &proc.statements[0].kind else {
            panic!("expected for");
        };
        assert_eq!(var.role, IdentRole::Assignment);
        assert!(step.is_some());
        assert_eq!(body.len(), 1);
        assert_eq!(next_var.as_ref().map(|v| v.name.as_str()), Some("i"));
        assert_eq!(proc.regions[0].kind, RegionKind::For);
    }

    #[test]
    fn test_next_mismatch_and_missing_terminator() {
        let proc = parse("for i = 1 to 3\nnext j\nloop\nx = 1\n", 0);
        assert_eq!(
            messages(&proc),
            vec!["NEXT j does not match FOR i".to_string(), "Missing 'REPEAT' for LOOP".to_string()]
        );
    }

    #[test]
    fn test_bad_for_header_keeps_body() {
        let proc = parse("for i = 1 too 10\n  x = i\nnext i\ny = 2\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!((proc.diagnostics[0].line_no, proc.diagnostics[0].start_col), (1, 10));
        assert!(proc.diagnostics[0].message.starts_with("Unexpected token: expected TO"));
        assert_eq!(proc.statements.len(), 2);
        let StatementKind::For { var, body, next_var, .. } = &proc.statements[0].kind else {
            panic!("expected for");
        };
        assert_eq!(var.name, "i");
        assert_eq!(body.len(), 1);
        assert!(next_var.is_some());
    }

    #[test]
    fn test_for_without_variable_accepts_any_next() {
        let proc = parse("for = 1 to 3\nnext j\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert!(matches!(proc.statements[0].kind, StatementKind::For { .. }));
    }

    #[test]
    fn test_loop_conditions() {
        let proc = parse_ok("loop while x do\n  x -= 1\nuntil x < 2\nrepeat\n");
        let StatementKind::Loop { body } = &proc.statements[0].kind else {
            panic!("expected loop");
        };
        assert!(matches!(body[0].kind, StatementKind::LoopCondition { kind: LoopConditionKind::While, .. }));
        assert!(matches!(body[2].kind, StatementKind::LoopCondition { kind: LoopConditionKind::Until, .. }));
    }

    #[test]
    fn test_loop_condition_outside_loop() {
        let proc = parse("while x\n", 0);
        assert_eq!(messages(&proc), vec!["WHILE is only allowed inside a FOR or LOOP statement".to_string()]);
    }

    #[test]
    fn test_begin_case() {
        let proc = parse_ok("begin case\n  case x = 1\n    y = 1\n  case 1\n    y = 2\n    z = 3\nend case\n");
        let StatementKind::Case { arms } = &proc.statements[0].kind else {
            panic!("expected case");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[1].body.len(), 2);
        assert_eq!(proc.regions.iter().filter(|r| r.kind == RegionKind::CaseArm).count(), 2);
    }

    #[test]
    fn test_contextual_keywords_as_variables() {
        let proc = parse_ok("length = 5\nin += 1\nx = length : in\nosbread v from h at 0 length length\n");
        assert!(matches!(&proc.statements[0].kind, StatementKind::Assignment { target: Expr::Variable(ident), .. } if ident.name == "length"));
        assert!(proc.symbols.contains(SymbolKind::Variable, "in"));
        assert!(matches!(&proc.statements[3].kind, StatementKind::OsBRead { length: Expr::Variable(ident), .. } if ident.name == "length"));
    }

    #[test]
    fn test_bad_case_condition_keeps_arms() {
        let proc = parse("begin case\n  case (x\n    y = 1\n  case 1\n    y = 2\nend case\nz = 1\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!((proc.diagnostics[0].line_no, proc.diagnostics[0].start_col), (2, 9));
        assert_eq!(proc.statements.len(), 2);
        let StatementKind::Case { arms } = &proc.statements[0].kind else {
            panic!("expected case");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[0].body.len(), 1);
        assert_eq!(arms[1].body.len(), 1);
    }

    #[test]
    fn test_on_gosub_and_call() {
        let proc = parse_ok("on x gosub A, B\ncall Msg('hi')\ncall @handler(1)\nA:\nB:\nreturn\n");
        assert!(matches!(&proc.statements[0].kind, StatementKind::OnJump { kind: JumpKind::Gosub, labels, .. } if labels.len() == 2));
        assert!(proc.symbols.contains(SymbolKind::Subroutine, "msg"));
        assert!(matches!(proc.statements[2].kind, StatementKind::Call { indirect: true, .. }));
    }

    #[test]
    fn test_bare_subroutine_call_needs_declaration() {
        let proc = parse("declare subroutine Msg\nMsg('a')\nOther('b')\n", 0);
        assert_eq!(messages(&proc), vec!["Subroutine Other has not been declared".to_string()]);
        assert!(matches!(proc.statements[1].kind, StatementKind::SubroutineCall { .. }));
    }

    #[test]
    fn test_redundant_declare_is_warning() {
        let proc = parse("declare function f, F\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn test_equates_and_redeclarations() {
        let proc = parse("x = 1\nequ x to 2\nequ @fm to 3\nequ y to 4\ndim y(3)\nequ y to 5\n", 0);
        assert_eq!(
            messages(&proc),
            vec![
                "x is already used as a variable and cannot be declared as an equate".to_string(),
                "System variable @fm cannot be redefined".to_string(),
                "y is already used as an equate and cannot be declared as a matrix".to_string(),
                "Equate y is already defined".to_string(),
            ]
        );
    }

    #[test]
    fn test_equate_reference_is_not_a_variable() {
        let proc = parse_ok("equ max$ to 10\nx = max$\n");
        assert!(!proc.symbols.contains(SymbolKind::Variable, "max$"));
        let equate = proc.symbols.lookup(SymbolKind::Equate, "MAX$").unwrap();
        assert_eq!(proc.symbols.references_of(equate.id).count(), 2);
    }

    #[test]
    fn test_dim_and_matrix_assignment() {
        let proc = parse_ok("dim m(10, 2)\nm(1, 2) = 'x'\nm(1, 1)<2> = 'y'\nmat m = ''\n");
        assert!(matches!(proc.statements[1].kind, StatementKind::MatrixAssignment { col: Some(_), .. }));
        assert!(matches!(
            proc.statements[2].kind,
            StatementKind::Assignment { target: Expr::ArrayIndex { .. }, .. }
        ));
        assert!(matches!(proc.statements[3].kind, StatementKind::Mat { .. }));
    }

    #[test]
    fn test_duplicate_matrix() {
        let proc = parse("dim m(1)\ndim M(2)\n", 0);
        assert_eq!(messages(&proc), vec!["Matrix M is already defined".to_string()]);
    }

    #[test]
    fn test_common_block() {
        let proc = parse_ok("common /shared/ a, m(5)\n");
        let a = proc.symbols.lookup(SymbolKind::Variable, "a").unwrap();
        assert_eq!(a.scope, Some(VariableScope::Common));
        assert!(proc.symbols.is_matrix("m"));
        assert!(proc.symbols.contains(SymbolKind::CommonLabel, "shared"));
    }

    #[test]
    fn test_insert_twice_is_info() {
        let proc = parse("$insert logical\n$insert LOGICAL\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.diagnostics[0].severity, Severity::Info);
    }

    #[test]
    fn test_io_statements() {
        let source = "dim m(3)\n\
                      open 'CUSTOMERS' to f else return\n\
                      read rec from f, id then\n  x = rec<1>\nend else\n  rec = ''\nend\n\
                      readv name from f, id, 2 else name = ''\n\
                      matread m from f, id else null\n\
                      readnext key using cursor else stop\n\
                      writev name on f, id, 2\n\
                      lock f, id else debug\n\
                      osread data from 'c:\\tmp\\x.txt' else data = ''\n\
                      oswrite data to 'c:\\tmp\\y.txt'\n\
                      osopen 'log' to h else null\n\
                      osbread chunk from h at 0 length 10\n\
                      osbwrite chunk on h at 10\n\
                      osclose h\n\
                      osdelete 'c:\\tmp\\y.txt'\n\
                      clearselect\n\
                      select f\n";
        let proc = parse_ok(source);
        assert_eq!(proc.statements.len(), 17);
    }

    #[test]
    fn test_mat_requires_matrix() {
        let proc = parse("mat m = ''\n", 0);
        assert_eq!(messages(&proc), vec!["Expected a dimensioned matrix".to_string()]);
    }

    #[test]
    fn test_dynamic_array_statements() {
        let proc = parse_ok(
            "locate x in list<1> using @vm by 'AL' setting pos then y = pos\n\
             swap 'a' with 'b' in s\n\
             convert 'a' to 'b' in s\n\
             transfer s to t\n\
             remove part from t at pos setting flag\n\
             matparse t into n using ','\n\
             initrnd 42\n\
             flush\n\
             garbagecollect\n",
        );
        assert_eq!(proc.statements.len(), 9);
        let StatementKind::Locate { position, .. } = &proc.statements[0].kind else {
            panic!("expected locate");
        };
        assert_eq!(position.base_ident().map(|i| i.role), Some(IdentRole::Assignment));
    }

    #[test]
    fn test_unexpected_token_recovers() {
        let proc = parse("next\nx = 1\n", 0);
        assert_eq!(proc.diagnostics.len(), 1);
        assert_eq!(proc.statements.len(), 1);
    }

    #[test]
    fn test_unterminated_string_still_parses() {
        let proc = parse("x = 'abc\ny = 1\n", 0);
        assert_eq!(proc.diagnostics[0].message, "Unterminated string literal");
        assert!(proc.statements.len() >= 1);
        assert!(proc
            .statements
            .iter()
            .any(|s| matches!(&s.kind, StatementKind::Assignment { target: Expr::Variable(v), .. } if v.name == "y")));
    }
}
