//! Abstract Syntax Tree definitions for Basic+

use std::collections::HashMap;

use crate::frontend::symbols::SymbolTable;
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Diagnostic, Span};

/// A statement list (procedure body, then/else arm, loop body, case arm)
pub type Block = Vec<Statement>;

/// Kind of procedure named by the header line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Function,
    Subroutine,
    Insert,
}

impl Default for ProcedureKind {
    fn default() -> Self {
        ProcedureKind::Subroutine
    }
}

/// Procedure parameter
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: Ident,
    /// Declared with `mat`
    pub matrix: bool,
}

/// Root artifact of a parse
#[derive(Debug, Clone)]
pub struct Procedure {
    /// Empty when the header is missing or malformed
    pub name: String,
    pub kind: ProcedureKind,
    pub parameters: Vec<Parameter>,
    pub statements: Block,
    pub symbols: SymbolTable,
    pub labels: LabelTable,
    pub diagnostics: Vec<Diagnostic>,
    pub regions: Vec<Region>,
    /// Every token, trivia included, in source order
    pub tokens: Vec<Token>,
    pub source: String,
    pub file_id: usize,
}

impl Procedure {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    /// Statements following the declaration of `label` in its own list
    pub fn statements_after_label(&self, label: &str) -> Option<&[Statement]> {
        let location = self.labels.get(label)?;
        let list = location.resolve(&self.statements)?;
        list.get(location.index + 1..)
    }

    /// The declaring statement of `label`
    pub fn label_statement(&self, label: &str) -> Option<&Statement> {
        let location = self.labels.get(label)?;
        location.resolve(&self.statements)?.get(location.index)
    }
}

// ==================== Labels ====================

/// Position of a label inside the (possibly nested) statement tree.
///
/// `steps` walks from the top-level list into nested blocks as
/// (statement index, block index) pairs; `index` is the label statement's
/// position in the final list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLocation {
    pub steps: Vec<(usize, usize)>,
    pub index: usize,
}

impl LabelLocation {
    /// The statement list containing the label
    pub fn resolve<'a>(&self, root: &'a [Statement]) -> Option<&'a [Statement]> {
        let mut list = root;
        for &(stmt, block) in &self.steps {
            list = list.get(stmt)?.kind.blocks().get(block).copied()?.as_slice();
        }
        Some(list)
    }
}

/// Declared labels keyed by case-folded name
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    entries: HashMap<String, LabelLocation>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from a parsed body; the first declaration wins
    pub fn build(statements: &[Statement]) -> Self {
        let mut table = Self::new();
        let mut steps = Vec::new();
        table.collect(statements, &mut steps);
        table
    }

    fn collect(&mut self, list: &[Statement], steps: &mut Vec<(usize, usize)>) {
        for (i, stmt) in list.iter().enumerate() {
            if let StatementKind::InternalSub { label } = &stmt.kind {
                self.entries
                    .entry(label.folded())
                    .or_insert_with(|| LabelLocation { steps: steps.clone(), index: i });
            }
            for (b, block) in stmt.kind.blocks().into_iter().enumerate() {
                steps.push((i, b));
                self.collect(block, steps);
                steps.pop();
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&LabelLocation> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Regions ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Then,
    Else,
    For,
    Loop,
    Case,
    CaseArm,
}

/// A foldable source span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub span: Span,
}

// ==================== Statements ====================

/// A statement with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

/// `then`/`else` arms carried by `if` and the I/O statements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThenElse {
    pub then_block: Option<Block>,
    pub else_block: Option<Block>,
}

impl ThenElse {
    pub fn is_empty(&self) -> bool {
        self.then_block.is_none() && self.else_block.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
    /// `:=`
    Concat,
}

impl AssignOp {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        let op = match kind {
            TokenKind::Equal => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Div,
            TokenKind::ColonEq => AssignOp::Concat,
            _ => return None,
        };
        Some(op)
    }

    /// Compound operators read the target before writing it
    pub fn is_compound(&self) -> bool {
        *self != AssignOp::Assign
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopConditionKind {
    While,
    Until,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Goto,
    Gosub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareKind {
    Function,
    Subroutine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    Read,
    ReadU,
    ReadO,
    ReadV,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Write,
    WriteU,
    WriteV,
}

/// `begin case` arm
#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub cond: Expr,
    pub body: Block,
    pub span: Span,
}

/// Matrix dimensions in `dim` and `common`
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: Ident,
    pub rows: Expr,
    pub cols: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommonVar {
    pub name: Ident,
    pub dims: Option<Dimension>,
}

/// One tag per statement form
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `target op value`; targets include array/substring access and OLE properties
    Assignment { target: Expr, op: AssignOp, value: Expr },
    /// `m(r[, c]) = value`
    MatrixAssignment { name: Ident, row: Expr, col: Option<Expr>, value: Expr },
    /// `mat m = value`
    Mat { name: Ident, value: Expr },
    If { cond: Expr, branches: ThenElse },
    For {
        var: Ident,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
        next_var: Option<Ident>,
    },
    Loop { body: Block },
    /// `while`/`until` inside a loop body
    LoopCondition { kind: LoopConditionKind, cond: Expr },
    Case { arms: Vec<CaseArm> },
    Gosub { label: Ident },
    Goto { label: Ident },
    /// `on x goto|gosub a, b`
    OnJump { kind: JumpKind, selector: Expr, labels: Vec<Ident> },
    /// `label:`
    InternalSub { label: Ident },
    Return { value: Option<Expr> },
    /// `call name(args)`; `indirect` for `call @var(args)`
    Call { name: Ident, args: Vec<Expr>, indirect: bool },
    /// Bare `name(args)` of a declared subroutine
    SubroutineCall { name: Ident, args: Vec<Expr> },
    /// `obj->method(args)` as a statement
    OleCall { target: Expr },
    Declare { kind: DeclareKind, names: Vec<Ident> },
    Equate { name: Ident, value: Expr },
    Common { label: Option<Ident>, vars: Vec<CommonVar> },
    Dim { matrices: Vec<Dimension> },
    /// `$insert name`
    Insert { name: Ident },
    Read {
        kind: ReadKind,
        target: Expr,
        file: Expr,
        key: Expr,
        column: Option<Expr>,
        branches: ThenElse,
    },
    MatRead { name: Ident, file: Expr, key: Expr, branches: ThenElse },
    ReadNext { target: Expr, cursor: Option<Expr>, branches: ThenElse },
    Write {
        kind: WriteKind,
        value: Expr,
        file: Expr,
        key: Expr,
        column: Option<Expr>,
        branches: ThenElse,
    },
    MatWrite { name: Ident, file: Expr, key: Expr, branches: ThenElse },
    /// `open [dict,] table to handle`
    Open { dict: Option<Expr>, table: Expr, handle: Expr, branches: ThenElse },
    Delete { file: Expr, key: Expr, branches: ThenElse },
    Lock { file: Expr, key: Expr, branches: ThenElse },
    Unlock { file: Expr, key: Expr, branches: ThenElse },
    /// `locate needle in haystack [using delim] [by seq] setting position`
    Locate {
        needle: Expr,
        haystack: Expr,
        using: Option<Expr>,
        by: Option<Expr>,
        position: Expr,
        branches: ThenElse,
    },
    /// `swap old with new in target`
    Swap { old: Expr, new: Expr, target: Expr },
    /// `convert from to to in target`
    Convert { from: Expr, to: Expr, target: Expr },
    /// `transfer source to target`
    Transfer { source: Expr, target: Expr },
    /// `remove target from source at position setting flag`
    Remove { target: Expr, source: Expr, position: Expr, flag: Expr },
    Select { source: Expr },
    ClearSelect { cursor: Option<Expr> },
    OsRead { target: Expr, path: Expr, branches: ThenElse },
    OsWrite { value: Expr, path: Expr },
    OsOpen { path: Expr, handle: Expr, branches: ThenElse },
    OsBRead { target: Expr, handle: Expr, position: Expr, length: Expr },
    OsBWrite { value: Expr, handle: Expr, position: Expr },
    OsClose { handle: Expr },
    OsDelete { path: Expr },
    /// `matparse source into m [using delim]`
    MatParse { source: Expr, name: Ident, delimiter: Option<Expr> },
    InitRnd { seed: Expr },
    Flush,
    GarbageCollect,
    Null,
    Debug,
    Stop,
    End,
    /// A lone `;`
    Empty,
}

impl StatementKind {
    /// Statements that do not need a trailing separator
    pub fn is_separator_exempt(&self) -> bool {
        matches!(self, StatementKind::InternalSub { .. } | StatementKind::Empty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::Assignment { .. } => "assignment",
            StatementKind::MatrixAssignment { .. } => "matrix assignment",
            StatementKind::Mat { .. } => "mat",
            StatementKind::If { .. } => "if",
            StatementKind::For { .. } => "for",
            StatementKind::Loop { .. } => "loop",
            StatementKind::LoopCondition { kind: LoopConditionKind::While, .. } => "while",
            StatementKind::LoopCondition { kind: LoopConditionKind::Until, .. } => "until",
            StatementKind::Case { .. } => "case",
            StatementKind::Gosub { .. } => "gosub",
            StatementKind::Goto { .. } => "goto",
            StatementKind::OnJump { .. } => "on",
            StatementKind::InternalSub { .. } => "label",
            StatementKind::Return { .. } => "return",
            StatementKind::Call { .. } => "call",
            StatementKind::SubroutineCall { .. } => "subroutine call",
            StatementKind::OleCall { .. } => "ole call",
            StatementKind::Declare { .. } => "declare",
            StatementKind::Equate { .. } => "equate",
            StatementKind::Common { .. } => "common",
            StatementKind::Dim { .. } => "dim",
            StatementKind::Insert { .. } => "$insert",
            StatementKind::Read { .. } => "read",
            StatementKind::MatRead { .. } => "matread",
            StatementKind::ReadNext { .. } => "readnext",
            StatementKind::Write { .. } => "write",
            StatementKind::MatWrite { .. } => "matwrite",
            StatementKind::Open { .. } => "open",
            StatementKind::Delete { .. } => "delete",
            StatementKind::Lock { .. } => "lock",
            StatementKind::Unlock { .. } => "unlock",
            StatementKind::Locate { .. } => "locate",
            StatementKind::Swap { .. } => "swap",
            StatementKind::Convert { .. } => "convert",
            StatementKind::Transfer { .. } => "transfer",
            StatementKind::Remove { .. } => "remove",
            StatementKind::Select { .. } => "select",
            StatementKind::ClearSelect { .. } => "clearselect",
            StatementKind::OsRead { .. } => "osread",
            StatementKind::OsWrite { .. } => "oswrite",
            StatementKind::OsOpen { .. } => "osopen",
            StatementKind::OsBRead { .. } => "osbread",
            StatementKind::OsBWrite { .. } => "osbwrite",
            StatementKind::OsClose { .. } => "osclose",
            StatementKind::OsDelete { .. } => "osdelete",
            StatementKind::MatParse { .. } => "matparse",
            StatementKind::InitRnd { .. } => "initrnd",
            StatementKind::Flush => "flush",
            StatementKind::GarbageCollect => "garbagecollect",
            StatementKind::Null => "null",
            StatementKind::Debug => "debug",
            StatementKind::Stop => "stop",
            StatementKind::End => "end",
            StatementKind::Empty => "empty",
        }
    }
}

// ==================== Expressions ====================

/// Role an identifier plays at its use site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentRole {
    Assignment,
    Reference,
    Label,
    FunctionName,
    InsertName,
}

/// Identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub role: IdentRole,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, role: IdentRole, span: Span) -> Self {
        Self { name: name.into(), role, span }
    }

    /// Case-folded name used as symbol key
    pub fn folded(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Logical
    And,
    Or,
    Matches,
    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    // Case-insensitive comparison
    EqC,
    NeC,
    LtC,
    GtC,
    LeC,
    GeC,
    // Exact comparison
    EqX,
    NeX,
    LtX,
    GtX,
    LeX,
    GeX,
    // String
    Concat,
    MvConcat,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    // Multi-value arithmetic
    MvAdd,
    MvSub,
    MvMul,
    MvDiv,
}

impl BinOp {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        let op = match kind {
            TokenKind::And => BinOp::And,
            TokenKind::Or => BinOp::Or,
            TokenKind::Matches => BinOp::Matches,
            TokenKind::Equal | TokenKind::EqualEqual => BinOp::Eq,
            TokenKind::NotEqual => BinOp::Ne,
            TokenKind::Less => BinOp::Lt,
            TokenKind::Greater => BinOp::Gt,
            TokenKind::LessEqual => BinOp::Le,
            TokenKind::GreaterEqual => BinOp::Ge,
            TokenKind::EqC => BinOp::EqC,
            TokenKind::NeC => BinOp::NeC,
            TokenKind::LtC => BinOp::LtC,
            TokenKind::GtC => BinOp::GtC,
            TokenKind::LeC => BinOp::LeC,
            TokenKind::GeC => BinOp::GeC,
            TokenKind::EqX => BinOp::EqX,
            TokenKind::NeX => BinOp::NeX,
            TokenKind::LtX => BinOp::LtX,
            TokenKind::GtX => BinOp::GtX,
            TokenKind::LeX => BinOp::LeX,
            TokenKind::GeX => BinOp::GeX,
            TokenKind::Colon => BinOp::Concat,
            TokenKind::ColonColon => BinOp::MvConcat,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Caret => BinOp::Pow,
            TokenKind::PlusPlus => BinOp::MvAdd,
            TokenKind::MinusMinus => BinOp::MvSub,
            TokenKind::StarStar => BinOp::MvMul,
            TokenKind::SlashSlash => BinOp::MvDiv,
            _ => return None,
        };
        Some(op)
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Variable, equate or system variable
    Variable(Ident),
    /// Decimal or hex literal, kept as written
    Number { text: String, span: Span },
    /// String literal value without delimiters
    Str { value: String, span: Span },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    /// Unary minus
    Negate { expr: Box<Expr>, span: Span },
    /// `x<f[, v[, s]]>`
    ArrayIndex { base: Box<Expr>, indexes: Vec<Expr>, span: Span },
    /// `x[start[, len]]`
    Substring { base: Box<Expr>, indexes: Vec<Expr>, span: Span },
    /// `m(r[, c])` on a declared matrix
    MatrixIndex {
        name: Ident,
        row: Box<Expr>,
        col: Option<Box<Expr>>,
        span: Span,
    },
    /// `f(args)`; also `@(x, y)` with the name `@`
    Call { name: Ident, args: Vec<Expr>, span: Span },
    /// `if c then a else b`
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
    /// `object->member[(args)]`
    Member {
        object: Box<Expr>,
        member: Ident,
        args: Option<Vec<Expr>>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Variable(ident) => ident.span,
            Expr::Number { span, .. }
            | Expr::Str { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Negate { span, .. }
            | Expr::ArrayIndex { span, .. }
            | Expr::Substring { span, .. }
            | Expr::MatrixIndex { span, .. }
            | Expr::Call { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Member { span, .. } => *span,
        }
    }

    /// The identifier a write to this expression lands on
    pub fn base_ident(&self) -> Option<&Ident> {
        match self {
            Expr::Variable(ident) => Some(ident),
            Expr::MatrixIndex { name, .. } => Some(name),
            Expr::ArrayIndex { base, .. } | Expr::Substring { base, .. } => base.base_ident(),
            Expr::Member { object, .. } => object.base_ident(),
            _ => None,
        }
    }

    pub fn base_ident_mut(&mut self) -> Option<&mut Ident> {
        match self {
            Expr::Variable(ident) => Some(ident),
            Expr::MatrixIndex { name, .. } => Some(name),
            Expr::ArrayIndex { base, .. } | Expr::Substring { base, .. } => base.base_ident_mut(),
            Expr::Member { object, .. } => object.base_ident_mut(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str, role: IdentRole) -> Ident {
        Ident::new(name, role, Span::dummy())
    }

    fn stmt(kind: StatementKind) -> Statement {
        Statement { kind, span: Span::dummy() }
    }

    #[test]
    fn test_base_ident_through_indexing() {
        let expr = Expr::ArrayIndex {
            base: Box::new(Expr::Substring {
                base: Box::new(Expr::Variable(ident("rec", IdentRole::Reference))),
                indexes: vec![],
                span: Span::dummy(),
            }),
            indexes: vec![],
            span: Span::dummy(),
        };
        assert_eq!(expr.base_ident().map(|i| i.name.as_str()), Some("rec"));
    }

    #[test]
    fn test_label_table_finds_nested_labels() {
        let body = vec![
            stmt(StatementKind::Null),
            stmt(StatementKind::Loop {
                body: vec![
                    stmt(StatementKind::Null),
                    stmt(StatementKind::InternalSub { label: ident("Inner", IdentRole::Label) }),
                    stmt(StatementKind::Stop),
                ],
            }),
            stmt(StatementKind::InternalSub { label: ident("Outer", IdentRole::Label) }),
            stmt(StatementKind::Return { value: None }),
        ];
        let table = LabelTable::build(&body);
        assert_eq!(table.len(), 2);

        let inner = table.get("INNER").unwrap();
        assert_eq!(inner.steps, vec![(1, 0)]);
        let list = inner.resolve(&body).unwrap();
        assert!(matches!(list[inner.index + 1].kind, StatementKind::Stop));

        let outer = table.get("outer").unwrap();
        assert!(outer.steps.is_empty());
        assert_eq!(outer.index, 2);
    }

    #[test]
    fn test_assign_op_from_token() {
        assert_eq!(AssignOp::from_token(TokenKind::ColonEq), Some(AssignOp::Concat));
        assert!(AssignOp::Add.is_compound());
        assert!(!AssignOp::Assign.is_compound());
        assert_eq!(AssignOp::from_token(TokenKind::Plus), None);
    }
}
