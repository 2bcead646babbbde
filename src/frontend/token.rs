//! Token definitions for Basic+

use crate::utils::Span;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token
    pub text: String,
    pub span: Span,
    /// Set on IF/RETURN/WHILE/UNTIL when whitespace follows them; such a
    /// keyword is never read as a function name.
    pub function_disallowed: bool,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self { kind, text: text.into(), span, function_disallowed: false }
    }

    pub fn eof(span: Span) -> Self {
        Self::new(TokenKind::Eof, "", span)
    }

    /// Text used as a symbol key
    pub fn folded(&self) -> String {
        self.text.to_lowercase()
    }

    /// Human readable description for error messages
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            _ => format!("'{}'", self.text),
        }
    }
}

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // ============ Procedure header ============
    Function,
    Subroutine,
    Compile,
    Insert,

    // ============ Control flow ============
    If,
    Then,
    Else,
    End,
    For,
    To,
    Step,
    Next,
    Loop,
    Repeat,
    While,
    Until,
    Do,
    Begin,
    Case,
    Gosub,
    Goto,
    Return,
    On,
    Call,
    Stop,

    // ============ Declarations ============
    Declare,
    Equ,
    Common,
    Dim,
    Mat,

    // ============ Record I/O ============
    Read,
    ReadU,
    ReadV,
    ReadO,
    ReadNext,
    MatRead,
    Write,
    WriteU,
    WriteV,
    MatWrite,
    Open,
    Delete,
    Lock,
    Unlock,
    Select,
    ClearSelect,

    // ============ OS file I/O ============
    OsRead,
    OsWrite,
    OsOpen,
    OsBRead,
    OsBWrite,
    OsClose,
    OsDelete,
    Length,

    // ============ Dynamic array statements ============
    Locate,
    In,
    Using,
    By,
    Setting,
    From,
    Swap,
    With,
    Convert,
    Transfer,
    Remove,
    At,
    MatParse,
    Into,

    // ============ Miscellaneous statements ============
    InitRnd,
    Flush,
    GarbageCollect,
    Null,
    Debug,

    // ============ Logical operators ============
    And,
    Or,
    Matches,

    // ============ Identifiers and Literals ============
    /// Identifier (variable name, label, function name, etc.)
    Ident,
    /// `@fm`, `@id`, ... from the fixed system variable set
    SystemVariable,
    /// Decimal literal
    Number,
    /// `0x1F` or `\1F\`
    HexNumber,
    /// String literal delimited by `"` or `'`
    Str,
    /// `$insert`
    DollarInsert,

    // ============ Comparison ============
    /// `=` (assignment or equality)
    Equal,
    /// `==`
    EqualEqual,
    /// `#`, `<>`, `><`, `ne`
    NotEqual,
    /// `<`, `lt`
    Less,
    /// `>`, `gt`
    Greater,
    /// `<=`, `=<`, `le`
    LessEqual,
    /// `>=`, `=>`, `ge`
    GreaterEqual,
    EqC,
    NeC,
    LtC,
    GtC,
    LeC,
    GeC,
    EqX,
    NeX,
    LtX,
    GtX,
    LeX,
    GeX,

    // ============ Arithmetic / string ============
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    /// `:` concatenation (or label terminator)
    Colon,
    /// `::` multi-value concatenation
    ColonColon,
    PlusPlus,
    MinusMinus,
    StarStar,
    SlashSlash,

    // ============ Assignment ============
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    ColonEq,

    // ============ Delimiters ============
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    /// `->` OLE member access
    Arrow,
    /// Bare `@` (e.g. `@(x, y)`, `call @routine(...)`)
    AtSign,
    Newline,

    // ============ Trivia ============
    LineComment,
    BlockComment,
    /// `|` line continuation
    Continuation,

    // ============ Special ============
    /// End of file
    Eof,
    /// Unknown/invalid character
    Unknown,
}

const SYSTEM_VARIABLES: &[&str] = &[
    "@account", "@ans", "@appid", "@cursors", "@date", "@dict", "@environ.set",
    "@file.error", "@file_error", "@files", "@fm", "@id", "@language",
    "@list.active", "@lower.case", "@lptr", "@mdiactive", "@mdiframe", "@mv",
    "@page", "@pri.file", "@query_dict", "@reccount", "@record", "@rm",
    "@rn.counter", "@station", "@stm", "@svm", "@tables", "@time", "@tm",
    "@upper.case", "@user0", "@user1", "@user2", "@user3", "@user4",
    "@username", "@vm", "@window",
];

/// Whether `name` (including the leading `@`) is a known system variable
pub fn is_system_variable(name: &str) -> bool {
    let folded = name.to_lowercase();
    SYSTEM_VARIABLES.contains(&folded.as_str())
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        (*self as usize) <= (TokenKind::Matches as usize)
    }

    /// Try to convert an identifier to a keyword (case-insensitive)
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        let kind = match s.to_lowercase().as_str() {
            "function" => TokenKind::Function,
            "subroutine" => TokenKind::Subroutine,
            "compile" => TokenKind::Compile,
            "insert" => TokenKind::Insert,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "for" => TokenKind::For,
            "to" => TokenKind::To,
            "step" => TokenKind::Step,
            "next" => TokenKind::Next,
            "loop" => TokenKind::Loop,
            "repeat" => TokenKind::Repeat,
            "while" => TokenKind::While,
            "until" => TokenKind::Until,
            "do" => TokenKind::Do,
            "begin" => TokenKind::Begin,
            "case" => TokenKind::Case,
            "gosub" => TokenKind::Gosub,
            "goto" => TokenKind::Goto,
            "return" => TokenKind::Return,
            "on" => TokenKind::On,
            "call" => TokenKind::Call,
            "stop" => TokenKind::Stop,
            "declare" => TokenKind::Declare,
            "equ" | "equate" => TokenKind::Equ,
            "common" => TokenKind::Common,
            "dim" | "dimension" => TokenKind::Dim,
            "mat" => TokenKind::Mat,
            "read" => TokenKind::Read,
            "readu" => TokenKind::ReadU,
            "readv" => TokenKind::ReadV,
            "reado" => TokenKind::ReadO,
            "readnext" => TokenKind::ReadNext,
            "matread" => TokenKind::MatRead,
            "write" => TokenKind::Write,
            "writeu" => TokenKind::WriteU,
            "writev" => TokenKind::WriteV,
            "matwrite" => TokenKind::MatWrite,
            "open" => TokenKind::Open,
            "delete" => TokenKind::Delete,
            "lock" => TokenKind::Lock,
            "unlock" => TokenKind::Unlock,
            "select" => TokenKind::Select,
            "clearselect" => TokenKind::ClearSelect,
            "osread" => TokenKind::OsRead,
            "oswrite" => TokenKind::OsWrite,
            "osopen" => TokenKind::OsOpen,
            "osbread" => TokenKind::OsBRead,
            "osbwrite" => TokenKind::OsBWrite,
            "osclose" => TokenKind::OsClose,
            "osdelete" => TokenKind::OsDelete,
            "length" => TokenKind::Length,
            "locate" => TokenKind::Locate,
            "in" => TokenKind::In,
            "using" => TokenKind::Using,
            "by" => TokenKind::By,
            "setting" => TokenKind::Setting,
            "from" => TokenKind::From,
            "swap" => TokenKind::Swap,
            "with" => TokenKind::With,
            "convert" => TokenKind::Convert,
            "transfer" => TokenKind::Transfer,
            "remove" => TokenKind::Remove,
            "at" => TokenKind::At,
            "matparse" => TokenKind::MatParse,
            "into" => TokenKind::Into,
            "initrnd" => TokenKind::InitRnd,
            "flush" => TokenKind::Flush,
            "garbagecollect" => TokenKind::GarbageCollect,
            "null" => TokenKind::Null,
            "debug" => TokenKind::Debug,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "match" | "matches" => TokenKind::Matches,
            "eq" => TokenKind::Equal,
            "ne" => TokenKind::NotEqual,
            "lt" => TokenKind::Less,
            "gt" => TokenKind::Greater,
            "le" => TokenKind::LessEqual,
            "ge" => TokenKind::GreaterEqual,
            _ => return None,
        };
        Some(kind)
    }

    /// Reserved `_xxx` comparison operators
    pub fn underscore_operator(s: &str) -> Option<TokenKind> {
        let kind = match s.to_lowercase().as_str() {
            "_eqc" => TokenKind::EqC,
            "_nec" => TokenKind::NeC,
            "_ltc" => TokenKind::LtC,
            "_gtc" => TokenKind::GtC,
            "_lec" => TokenKind::LeC,
            "_gec" => TokenKind::GeC,
            "_eqx" => TokenKind::EqX,
            "_nex" => TokenKind::NeX,
            "_ltx" => TokenKind::LtX,
            "_gtx" => TokenKind::GtX,
            "_lex" => TokenKind::LeX,
            "_gex" => TokenKind::GeX,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self, TokenKind::LineComment | TokenKind::BlockComment | TokenKind::Continuation)
    }

    pub fn is_separator(&self) -> bool {
        matches!(self, TokenKind::Newline | TokenKind::Semicolon)
    }

    /// Keywords whose trailing whitespace marks them as not callable
    pub fn flags_function_use(&self) -> bool {
        matches!(self, TokenKind::If | TokenKind::Return | TokenKind::While | TokenKind::Until)
    }

    /// Keywords that may also name a function when directly followed by `(`
    pub fn may_name_function(&self) -> bool {
        matches!(
            self,
            TokenKind::If
                | TokenKind::Return
                | TokenKind::While
                | TokenKind::Until
                | TokenKind::Delete
                | TokenKind::Insert
                | TokenKind::Remove
                | TokenKind::Convert
                | TokenKind::Swap
                | TokenKind::Locate
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, TokenKind::And | TokenKind::Or | TokenKind::Matches)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::EqualEqual
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::Greater
                | TokenKind::LessEqual
                | TokenKind::GreaterEqual
                | TokenKind::EqC
                | TokenKind::NeC
                | TokenKind::LtC
                | TokenKind::GtC
                | TokenKind::LeC
                | TokenKind::GeC
                | TokenKind::EqX
                | TokenKind::NeX
                | TokenKind::LtX
                | TokenKind::GtX
                | TokenKind::LeX
                | TokenKind::GeX
        )
    }

    pub fn is_concatenation(&self) -> bool {
        matches!(self, TokenKind::Colon | TokenKind::ColonColon)
    }

    pub fn is_additive(&self) -> bool {
        matches!(self, TokenKind::Plus | TokenKind::Minus | TokenKind::PlusPlus | TokenKind::MinusMinus)
    }

    /// Keywords that only follow an expression inside a statement, so they
    /// can still name variables
    pub fn is_contextual_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Length
                | TokenKind::In
                | TokenKind::Using
                | TokenKind::By
                | TokenKind::Setting
                | TokenKind::With
                | TokenKind::At
                | TokenKind::Into
        )
    }

    pub fn is_multiplicative(&self) -> bool {
        matches!(self, TokenKind::Star | TokenKind::Slash | TokenKind::StarStar | TokenKind::SlashSlash)
    }
}
