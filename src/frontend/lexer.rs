//! Lexer for Basic+
//!
//! Converts source code into a stream of tokens plus a separate trivia
//! stream (comments and `|` continuations). Lexing never aborts: malformed
//! literals are recorded as errors and still produce a best-effort token.

use log::trace;

use crate::frontend::token::{is_system_variable, Token, TokenKind};
use crate::utils::{Error, Span};

/// Everything the lexer produces for one source text
#[derive(Debug, Clone, Default)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub trivia: Vec<Token>,
    pub errors: Vec<Error>,
}

impl LexOutput {
    /// Primary tokens and trivia merged back into source order
    pub fn all_tokens(&self) -> Vec<Token> {
        let mut all: Vec<Token> = self.tokens.iter().chain(self.trivia.iter()).cloned().collect();
        all.sort_by_key(|t| (t.span.line, t.span.col, t.kind == TokenKind::Eof));
        all
    }
}

/// Convenience wrapper: `tokenize(source, file_id) -> (tokens, trivia, errors)`
pub fn tokenize(source: &str, file_id: usize) -> LexOutput {
    Lexer::new(source, file_id).tokenize()
}

/// Value of a string literal token: delimiters and `|` continuations removed
pub fn string_value(text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let quote = chars.remove(0);
    if chars.last() == Some(&quote) {
        chars.pop();
    }
    let mut value = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '|' {
            let mut j = i + 1;
            if chars.get(j) == Some(&'\r') {
                j += 1;
            }
            if chars.get(j) == Some(&'\n') {
                i = j + 1;
                continue;
            }
        }
        value.push(chars[i]);
        i += 1;
    }
    value
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// The lexer state
pub struct Lexer {
    source: Vec<char>,
    /// Current position in source
    pos: usize,
    line: usize,
    col: usize,
    /// Start of the current token
    start: usize,
    start_line: usize,
    start_col: usize,
    /// File ID for span tracking
    file_id: usize,
    /// True at stream start and after a newline or `;`
    at_statement_start: bool,
    /// Whether the previous primary token began a statement
    last_began_statement: bool,
    tokens: Vec<Token>,
    trivia: Vec<Token>,
    errors: Vec<Error>,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: &str, file_id: usize) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            start: 0,
            start_line: 1,
            start_col: 0,
            file_id,
            at_statement_start: true,
            last_began_statement: false,
            tokens: Vec::new(),
            trivia: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn mark_start(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;
    }

    /// Create a span from start to current position
    fn make_span(&self) -> Span {
        Span::new(self.start_line, self.start_col, self.line, self.col, self.file_id)
    }

    fn current_text(&self) -> String {
        self.source[self.start..self.pos].iter().collect()
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.current_text(), self.make_span())
    }

    fn push(&mut self, token: Token) {
        if token.kind.is_trivia() {
            self.trivia.push(token);
            return;
        }
        let began_statement = self.at_statement_start;
        self.at_statement_start = token.kind.is_separator()
            // `label:` leaves the rest of the line at statement start
            || (token.kind == TokenKind::Colon
                && self.last_began_statement
                && matches!(self.tokens.last(), Some(t) if t.kind == TokenKind::Ident));
        self.last_began_statement = began_statement;
        self.tokens.push(token);
    }

    /// Skip blanks; returns true if anything was skipped
    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\r' || c == '\u{c}' {
                self.advance();
                skipped = true;
            } else {
                break;
            }
        }
        skipped
    }

    /// Tokenize the entire source
    pub fn tokenize(mut self) -> LexOutput {
        loop {
            if self.skip_whitespace() {
                if let Some(last) = self.tokens.last_mut() {
                    if last.kind.flags_function_use() {
                        last.function_disallowed = true;
                    }
                }
            }
            self.mark_start();
            let Some(c) = self.peek() else {
                let span = self.make_span();
                self.tokens.push(Token::eof(span));
                break;
            };
            self.next_token(c);
        }
        trace!(
            "lexed {} tokens, {} trivia, {} errors",
            self.tokens.len(),
            self.trivia.len(),
            self.errors.len()
        );
        LexOutput { tokens: self.tokens, trivia: self.trivia, errors: self.errors }
    }

    fn next_token(&mut self, c: char) {
        match c {
            '\n' => {
                self.advance();
                let redundant = matches!(self.tokens.last(), None | Some(Token { kind: TokenKind::Newline, .. }));
                if redundant {
                    self.at_statement_start = true;
                } else {
                    let token = self.make_token(TokenKind::Newline);
                    self.push(token);
                }
            }
            '/' if self.peek_next() == Some('*') => self.read_block_comment(),
            '*' | '!' | '/' if self.at_statement_start => self.read_line_comment(),
            '"' | '\'' => self.read_string(c),
            '\\' => self.read_backslash_hex(),
            '0' if matches!(self.peek_next(), Some('x') | Some('X')) => self.read_hex(),
            c if c.is_ascii_digit() => self.read_number(),
            '.' if self.peek_next().map_or(false, |n| n.is_ascii_digit()) => self.read_number(),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(),
            '@' => self.read_at(),
            '$' => self.read_directive(),
            '|' => self.read_continuation(),
            _ => self.read_operator(c),
        }
    }

    fn read_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        let token = self.make_token(TokenKind::LineComment);
        self.push(token);
    }

    fn read_block_comment(&mut self) {
        self.advance(); // skip /
        self.advance(); // skip *
        let mut closed = false;
        while !self.is_at_end() {
            if self.peek() == Some('*') && self.peek_next() == Some('/') {
                self.advance();
                self.advance();
                closed = true;
                break;
            }
            self.advance();
        }
        if !closed {
            self.errors.push(Error::UnterminatedComment { span: self.make_span() });
        }
        let token = self.make_token(TokenKind::BlockComment);
        self.push(token);
    }

    /// Read a string literal; `|` directly before a line break continues it
    fn read_string(&mut self, quote: char) {
        self.advance(); // consume opening quote
        let mut closed = false;
        while let Some(c) = self.peek() {
            if c == quote {
                self.advance();
                closed = true;
                break;
            }
            if c == '\n' {
                break;
            }
            if c == '|' {
                let after = self.source.get(self.pos + 1).copied();
                let after_cr = self.source.get(self.pos + 2).copied();
                if after == Some('\n') || (after == Some('\r') && after_cr == Some('\n')) {
                    self.advance(); // |
                    if self.peek() == Some('\r') {
                        self.advance();
                    }
                    self.advance(); // line break
                    continue;
                }
            }
            self.advance();
        }
        if !closed {
            self.errors.push(Error::UnterminatedString { span: self.make_span() });
        }
        let token = self.make_token(TokenKind::Str);
        self.push(token);
    }

    /// Read a decimal literal; more than one `.` is a soft error
    fn read_number(&mut self) {
        let mut dots = 0;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' {
                dots += 1;
                self.advance();
            } else {
                break;
            }
        }
        let token = self.make_token(TokenKind::Number);
        if dots > 1 {
            self.errors.push(Error::MalformedNumber { text: token.text.clone(), span: token.span });
        }
        self.push(token);
    }

    /// Read a `0x...` literal
    fn read_hex(&mut self) {
        self.advance(); // 0
        self.advance(); // x
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let token = self.make_token(TokenKind::HexNumber);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            self.errors.push(Error::MalformedHex { text: token.text.clone(), span: token.span });
        }
        self.push(token);
    }

    /// Read a `\0D0A\` literal
    fn read_backslash_hex(&mut self) {
        self.advance(); // opening backslash
        let mut digits = String::new();
        let mut closed = false;
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.advance();
                closed = true;
                break;
            }
            if c == '\n' {
                break;
            }
            digits.push(c);
            self.advance();
        }
        let token = self.make_token(TokenKind::HexNumber);
        let valid = closed
            && !digits.is_empty()
            && digits.len() % 2 == 0
            && digits.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            self.errors.push(Error::MalformedHex { text: token.text.clone(), span: token.span });
        }
        self.push(token);
    }

    /// Read an identifier, keyword or `_xxx` operator
    fn read_identifier(&mut self) {
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        let text = self.current_text();
        let kind = if text.starts_with('_') {
            TokenKind::underscore_operator(&text).unwrap_or_else(|| {
                self.errors.push(Error::InvalidIdentifier { name: text.clone(), span: self.make_span() });
                TokenKind::Ident
            })
        } else {
            TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident)
        };
        let token = self.make_token(kind);
        self.push(token);
    }

    /// `@name` is a system variable if the name is known, otherwise the
    /// scan rewinds to just after the `@`
    fn read_at(&mut self) {
        self.advance(); // @
        let (pos, line, col) = (self.pos, self.line, self.col);
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                self.advance();
            } else {
                break;
            }
        }
        if self.pos > pos && is_system_variable(&self.current_text()) {
            let token = self.make_token(TokenKind::SystemVariable);
            self.push(token);
            return;
        }
        self.pos = pos;
        self.line = line;
        self.col = col;
        let token = self.make_token(TokenKind::AtSign);
        self.push(token);
    }

    fn read_directive(&mut self) {
        self.advance(); // $
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let text = self.current_text();
        let kind = if text.eq_ignore_ascii_case("$insert") {
            TokenKind::DollarInsert
        } else {
            self.errors.push(Error::UnknownDirective { name: text, span: self.make_span() });
            TokenKind::Unknown
        };
        let token = self.make_token(kind);
        self.push(token);
    }

    /// `|` at the end of a line joins it with the next one
    fn read_continuation(&mut self) {
        self.advance(); // |
        let mut lookahead = self.pos;
        while matches!(self.source.get(lookahead), Some(' ') | Some('\t') | Some('\r')) {
            lookahead += 1;
        }
        match self.source.get(lookahead) {
            Some('\n') | None => {
                while self.pos <= lookahead && !self.is_at_end() {
                    self.advance();
                }
                let token = self.make_token(TokenKind::Continuation);
                self.push(token);
            }
            _ => {
                self.errors.push(Error::UnexpectedChar { ch: '|', span: self.make_span() });
                let token = self.make_token(TokenKind::Unknown);
                self.push(token);
            }
        }
    }

    fn read_operator(&mut self, c: char) {
        self.advance();
        let kind = match c {
            '=' => match self.peek() {
                Some('=') => { self.advance(); TokenKind::EqualEqual }
                Some('<') => { self.advance(); TokenKind::LessEqual }
                Some('>') => { self.advance(); TokenKind::GreaterEqual }
                _ => TokenKind::Equal,
            },
            '<' => match self.peek() {
                Some('=') => { self.advance(); TokenKind::LessEqual }
                Some('>') => { self.advance(); TokenKind::NotEqual }
                _ => TokenKind::Less,
            },
            '>' => match self.peek() {
                Some('=') => { self.advance(); TokenKind::GreaterEqual }
                // `x<1><>y` closes the index before `<>`
                Some('<') if self.peek_next() != Some('>') => { self.advance(); TokenKind::NotEqual }
                _ => TokenKind::Greater,
            },
            '#' => TokenKind::NotEqual,
            '+' => match self.peek() {
                Some('+') => { self.advance(); TokenKind::PlusPlus }
                Some('=') => { self.advance(); TokenKind::PlusEq }
                _ => TokenKind::Plus,
            },
            '-' => match self.peek() {
                Some('-') => { self.advance(); TokenKind::MinusMinus }
                Some('=') => { self.advance(); TokenKind::MinusEq }
                Some('>') => { self.advance(); TokenKind::Arrow }
                _ => TokenKind::Minus,
            },
            '*' => match self.peek() {
                Some('*') => { self.advance(); TokenKind::StarStar }
                Some('=') => { self.advance(); TokenKind::StarEq }
                _ => TokenKind::Star,
            },
            '/' => match self.peek() {
                Some('/') => { self.advance(); TokenKind::SlashSlash }
                Some('=') => { self.advance(); TokenKind::SlashEq }
                _ => TokenKind::Slash,
            },
            ':' => match self.peek() {
                Some(':') => { self.advance(); TokenKind::ColonColon }
                Some('=') => { self.advance(); TokenKind::ColonEq }
                _ => TokenKind::Colon,
            },
            '^' => TokenKind::Caret,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            _ => {
                self.errors.push(Error::UnexpectedChar { ch: c, span: self.make_span() });
                TokenKind::Unknown
            }
        };
        let token = self.make_token(kind);
        self.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, 0).tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("a = 1\n"),
            vec![TokenKind::Ident, TokenKind::Equal, TokenKind::Number, TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("x += 1 :: y -> z <> w =< v ++ **"),
            vec![
                TokenKind::Ident,
                TokenKind::PlusEq,
                TokenKind::Number,
                TokenKind::ColonColon,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Ident,
                TokenKind::NotEqual,
                TokenKind::Ident,
                TokenKind::LessEqual,
                TokenKind::Ident,
                TokenKind::PlusPlus,
                TokenKind::StarStar,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_index_close_before_not_equal() {
        assert_eq!(
            kinds("rec<1><>x"),
            vec![
                TokenKind::Ident,
                TokenKind::Less,
                TokenKind::Number,
                TokenKind::Greater,
                TokenKind::NotEqual,
                TokenKind::Ident,
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("a >< b")[1], TokenKind::NotEqual);
    }

    #[test]
    fn test_comment_only_at_statement_start() {
        let out = tokenize("* header\nx = a * b ; ! note\n", 0);
        assert_eq!(out.trivia.len(), 2);
        assert!(out.trivia.iter().all(|t| t.kind == TokenKind::LineComment));
        assert!(out.tokens.iter().any(|t| t.kind == TokenKind::Star));
    }

    #[test]
    fn test_block_comment_anywhere() {
        let out = tokenize("x = 1 /* multi\nline */ + 2\n", 0);
        assert_eq!(out.trivia.len(), 1);
        assert_eq!(out.trivia[0].kind, TokenKind::BlockComment);
        assert_eq!(out.trivia[0].span.end_line, 2);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_redundant_newlines_dropped() {
        assert_eq!(
            kinds("\n\na\n\n\nb"),
            vec![TokenKind::Ident, TokenKind::Newline, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn test_string_continuation() {
        let out = tokenize("x = \"abc|\ndef\"\n", 0);
        let s = &out.tokens[2];
        assert_eq!(s.kind, TokenKind::Str);
        assert_eq!(s.span.line, 1);
        assert_eq!(s.span.end_line, 2);
        assert_eq!(string_value(&s.text), "abcdef");
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_unterminated_string_is_soft() {
        let out = tokenize("x = 'abc\ny = 1\n", 0);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], Error::UnterminatedString { .. }));
        assert_eq!(out.tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
        assert!(out.tokens.iter().any(|t| t.text == "y"));
    }

    #[test]
    fn test_numbers_and_hex() {
        let out = tokenize("1.5 0x1F \\0D0A\\ 1.2.3 0xZZ", 0);
        let k: Vec<_> = out.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            k,
            vec![
                TokenKind::Number,
                TokenKind::HexNumber,
                TokenKind::HexNumber,
                TokenKind::Number,
                TokenKind::HexNumber,
                TokenKind::Eof
            ]
        );
        assert_eq!(out.errors.len(), 2);
        assert!(matches!(out.errors[0], Error::MalformedNumber { .. }));
        assert!(matches!(out.errors[1], Error::MalformedHex { .. }));
    }

    #[test]
    fn test_system_variable_and_at_rollback() {
        let out = tokenize("x = @FM : @foo", 0);
        let toks = &out.tokens;
        assert_eq!(toks[2].kind, TokenKind::SystemVariable);
        assert_eq!(toks[2].text, "@FM");
        assert_eq!(toks[4].kind, TokenKind::AtSign);
        assert_eq!(toks[5].kind, TokenKind::Ident);
        assert_eq!(toks[5].text, "foo");
        assert_eq!(toks[5].span.col, 11);
    }

    #[test]
    fn test_underscore_identifiers() {
        let out = tokenize("a _eqc b _bad", 0);
        assert_eq!(out.tokens[1].kind, TokenKind::EqC);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.errors[0], Error::InvalidIdentifier { ref name, .. } if name == "_bad"));
    }

    #[test]
    fn test_function_disallowed_flag() {
        let out = tokenize("if x then return(1)\nwhile(y)", 0);
        let if_tok = &out.tokens[0];
        assert_eq!(if_tok.kind, TokenKind::If);
        assert!(if_tok.function_disallowed);
        let ret = out.tokens.iter().find(|t| t.kind == TokenKind::Return).unwrap();
        assert!(!ret.function_disallowed);
        let wh = out.tokens.iter().find(|t| t.kind == TokenKind::While).unwrap();
        assert!(!wh.function_disallowed);
    }

    #[test]
    fn test_pipe_continuation_is_trivia() {
        let out = tokenize("x = a : |\n  b\n", 0);
        assert_eq!(out.trivia.len(), 1);
        assert_eq!(out.trivia[0].kind, TokenKind::Continuation);
        assert_eq!(
            out.tokens.iter().filter(|t| t.kind == TokenKind::Newline).count(),
            1
        );
    }

    #[test]
    fn test_label_line_allows_comment() {
        let out = tokenize("Init: * setup\n", 0);
        assert_eq!(out.trivia.len(), 1);
        assert_eq!(out.tokens[1].kind, TokenKind::Colon);
    }

    #[test]
    fn test_eof_span_at_end() {
        let out = tokenize("a\nbc", 0);
        let eof = out.tokens.last().unwrap();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!((eof.span.line, eof.span.col), (2, 2));
    }

    #[test]
    fn test_all_tokens_in_source_order() {
        let out = tokenize("* c\nx = 1\n", 0);
        let all = out.all_tokens();
        assert_eq!(all[0].kind, TokenKind::LineComment);
        assert_eq!(all.last().unwrap().kind, TokenKind::Eof);
    }
}
