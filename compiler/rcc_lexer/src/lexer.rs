//! Lexer implementation
//!
//! Scans bytes (C99 identifiers are ASCII), producing one token per call
//! with a single-slot putback. Line directives emitted by a preprocessor
//! (`# <n> "<file>"`) update the tracked filename/line number.

use crate::token::{keyword, Token, TokenKind};
use memchr::memchr;
use rcc_common::{CcError, CcResult, Interner, Line, LineId, LineTable, Loc, SourceLoc};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    filename: String,
    lineno: u32,
    line_start: usize,
    cur_line: LineId,
    /// Set by a line directive; applied when the directive's newline is consumed.
    pending_directive: Option<(u32, Option<String>)>,
    lines: LineTable,
    interner: Interner,
    unfetched: Option<Token>,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, filename: &str) -> Self {
        let bytes = src.as_bytes();
        let mut lines = LineTable::new();
        let end = memchr(b'\n', bytes).unwrap_or(bytes.len());
        let first = lines.add(Line::new(
            filename,
            1,
            String::from_utf8_lossy(&bytes[..end]).into_owned(),
        ));
        Self {
            src: bytes,
            pos: 0,
            filename: filename.to_string(),
            lineno: 1,
            line_start: 0,
            cur_line: first,
            pending_directive: None,
            lines,
            interner: Interner::new(),
            unfetched: None,
        }
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn interner_mut(&mut self) -> &mut Interner {
        &mut self.interner
    }

    pub fn lines(&self) -> &LineTable {
        &self.lines
    }

    pub fn finish(self) -> (Interner, LineTable) {
        (self.interner, self.lines)
    }

    pub fn source_loc(&self, loc: Loc) -> SourceLoc {
        SourceLoc::resolve(&self.lines, loc)
    }

    /// Fetch the next token, or the putback token if one is pending.
    pub fn fetch_token(&mut self) -> CcResult<Token> {
        if let Some(tok) = self.unfetched.take() {
            return Ok(tok);
        }
        self.skip_whitespace_and_comments()?;
        let loc = self.cur_loc();
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, loc));
        };
        let kind = match c {
            b'0'..=b'9' => self.read_number()?,
            b'"' => self.read_string()?,
            b'\'' => self.read_char()?,
            c if is_ident_start(c) => self.read_ident(),
            _ => self.read_punct()?,
        };
        Ok(Token::new(kind, loc))
    }

    /// Put back one token. The grammar is LL(1) after tokenization, so a
    /// single slot suffices.
    pub fn unget_token(&mut self, tok: Token) {
        debug_assert!(self.unfetched.is_none(), "double unget");
        self.unfetched = Some(tok);
    }

    /// Fetch and return the next token if it matches `kind`, else put it back.
    pub fn consume(&mut self, kind: &TokenKind) -> CcResult<Option<Token>> {
        let tok = self.fetch_token()?;
        if tok.is(kind) {
            Ok(Some(tok))
        } else {
            self.unget_token(tok);
            Ok(None)
        }
    }

    fn cur_loc(&self) -> Loc {
        Loc::new(self.cur_line, (self.pos - self.line_start + 1) as u32)
    }

    fn err(&self, message: impl Into<String>) -> CcError {
        CcError::lex_error(message, Some(self.source_loc(self.cur_loc())))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn line_text_from(&self, start: usize) -> String {
        let end = memchr(b'\n', &self.src[start..]).map_or(self.src.len(), |i| start + i);
        String::from_utf8_lossy(&self.src[start..end]).into_owned()
    }

    /// Consume a newline and register the next physical line.
    fn newline(&mut self) {
        self.pos += 1;
        self.line_start = self.pos;
        match self.pending_directive.take() {
            Some((lineno, file)) => {
                self.lineno = lineno;
                if let Some(file) = file {
                    self.filename = file;
                }
            }
            None => self.lineno += 1,
        }
        let text = self.line_text_from(self.pos);
        self.cur_line = self.lines.add(Line::new(self.filename.clone(), self.lineno, text));
    }

    fn at_line_head(&self) -> bool {
        self.src[self.line_start..self.pos].iter().all(|&b| b == b' ' || b == b'\t')
    }

    fn skip_whitespace_and_comments(&mut self) -> CcResult<()> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => self.pos += 1,
                Some(b'\n') => self.newline(),
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    // To the end of the line; the newline itself is handled above.
                    let rest = &self.src[self.pos..];
                    self.pos += memchr(b'\n', rest).unwrap_or(rest.len());
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => self.skip_block_comment()?,
                Some(b'#') if self.at_line_head() => self.read_line_directive(),
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> CcResult<()> {
        let start = self.cur_loc();
        self.pos += 2;
        loop {
            match self.peek() {
                None => {
                    return Err(CcError::lex_error(
                        "unterminated block comment",
                        Some(self.source_loc(start)),
                    ))
                }
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some(b'\n') => self.newline(),
                Some(_) => self.pos += 1,
            }
        }
    }

    /// `# <lineno> "<filename>"` (and `#pragma` etc., which are skipped).
    fn read_line_directive(&mut self) {
        self.pos += 1;
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos > digits_start {
            let lineno: u32 = std::str::from_utf8(&self.src[digits_start..self.pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(self.lineno + 1);
            while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
                self.pos += 1;
            }
            let mut file = None;
            if self.eat(b'"') {
                let name_start = self.pos;
                while !matches!(self.peek(), None | Some(b'"') | Some(b'\n')) {
                    self.pos += 1;
                }
                file = Some(String::from_utf8_lossy(&self.src[name_start..self.pos]).into_owned());
                self.eat(b'"');
            }
            self.pending_directive = Some((lineno, file));
        }
        // Skip the rest of the directive line (flags on GCC-style markers).
        let rest = &self.src[self.pos..];
        self.pos += memchr(b'\n', rest).unwrap_or(rest.len());
    }

    fn read_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii identifier");
        match keyword(text) {
            Some(kind) => kind,
            None => TokenKind::Ident(self.interner.intern(text)),
        }
    }

    fn read_number(&mut self) -> CcResult<TokenKind> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(self.err("invalid hexadecimal literal"));
            }
            let text = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap();
            let value = u64::from_str_radix(text, 16)
                .map_err(|_| self.err("integer literal out of range"))? as i64;
            let (unsigned, long) = self.read_int_suffix();
            return Ok(TokenKind::IntLit { value, unsigned, long });
        }

        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        let is_float = match self.peek() {
            Some(b'.') | Some(b'f') | Some(b'F') => true,
            Some(b'e') | Some(b'E') => {
                matches!(self.peek_at(1), Some(b'0'..=b'9'))
                    || (matches!(self.peek_at(1), Some(b'+') | Some(b'-'))
                        && matches!(self.peek_at(2), Some(b'0'..=b'9')))
            }
            _ => false,
        };
        if is_float {
            return self.read_float(start);
        }

        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value = if text.len() > 1 && text.starts_with('0') {
            i64::from_str_radix(&text[1..], 8).map_err(|_| self.err("invalid octal literal"))?
        } else {
            text.parse::<u64>().map_err(|_| self.err("integer literal out of range"))? as i64
        };
        let (unsigned, long) = self.read_int_suffix();
        Ok(TokenKind::IntLit { value, unsigned, long })
    }

    fn read_int_suffix(&mut self) -> (bool, u8) {
        let mut unsigned = false;
        let mut long = 0u8;
        loop {
            match self.peek() {
                Some(b'u') | Some(b'U') if !unsigned => {
                    unsigned = true;
                    self.pos += 1;
                }
                Some(b'l') | Some(b'L') if long < 2 => {
                    long += 1;
                    self.pos += 1;
                }
                _ => return (unsigned, long),
            }
        }
    }

    fn read_float(&mut self, start: usize) -> CcResult<TokenKind> {
        if self.eat(b'.') {
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let after_sign = matches!(self.peek_at(1), Some(b'+') | Some(b'-'));
            let digit_at = if after_sign { 2 } else { 1 };
            if matches!(self.peek_at(digit_at), Some(b'0'..=b'9')) {
                self.pos += digit_at;
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let value: f64 = text.parse().map_err(|_| self.err("invalid floating-point literal"))?;
        let single = if matches!(self.peek(), Some(b'f') | Some(b'F')) {
            self.pos += 1;
            true
        } else {
            false
        };
        if matches!(self.peek(), Some(b'l') | Some(b'L')) {
            return Err(self.err("long double is not supported"));
        }
        Ok(TokenKind::FloatLit { value, single })
    }

    fn read_char(&mut self) -> CcResult<TokenKind> {
        self.pos += 1;
        let value = match self.peek() {
            None | Some(b'\n') | Some(b'\'') => {
                return Err(self.err("empty or unterminated character literal"))
            }
            Some(b'\\') => {
                self.pos += 1;
                self.read_escape()? as i64
            }
            Some(c) => {
                self.pos += 1;
                c as i64
            }
        };
        if !self.eat(b'\'') {
            return Err(self.err("unterminated character literal"));
        }
        Ok(TokenKind::CharLit(value))
    }

    fn read_string(&mut self) -> CcResult<TokenKind> {
        let start = self.cur_loc();
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(CcError::lex_error(
                        "unterminated string literal",
                        Some(self.source_loc(start)),
                    ))
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(TokenKind::StrLit(bytes));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let b = self.read_escape()?;
                    bytes.push(b);
                }
                Some(c) => {
                    self.pos += 1;
                    bytes.push(c);
                }
            }
        }
    }

    /// Decode one escape; the backslash is already consumed.
    fn read_escape(&mut self) -> CcResult<u8> {
        let Some(c) = self.peek() else {
            return Err(self.err("unterminated escape sequence"));
        };
        self.pos += 1;
        let b = match c {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'0'..=b'7' => {
                // Up to three octal digits, the first already read.
                let mut value = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                value as u8
            }
            b'x' => {
                let mut value = 0u32;
                let mut count = 0;
                while let Some(d) = self.peek().filter(|c| c.is_ascii_hexdigit()) {
                    value = value * 16 + (d as char).to_digit(16).unwrap();
                    self.pos += 1;
                    count += 1;
                    if count == 2 {
                        break;
                    }
                }
                if count == 0 {
                    return Err(self.err("invalid hex escape sequence"));
                }
                value as u8
            }
            other => other,
        };
        Ok(b)
    }

    fn read_punct(&mut self) -> CcResult<TokenKind> {
        let c = self.peek().unwrap();
        self.pos += 1;
        let kind = match c {
            b'+' => {
                if self.eat(b'+') {
                    TokenKind::Inc
                } else if self.eat(b'=') {
                    TokenKind::AddAssign
                } else {
                    TokenKind::Add
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    TokenKind::Dec
                } else if self.eat(b'=') {
                    TokenKind::SubAssign
                } else if self.eat(b'>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Sub
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    TokenKind::MulAssign
                } else {
                    TokenKind::Mul
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    TokenKind::DivAssign
                } else {
                    TokenKind::Div
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    TokenKind::ModAssign
                } else {
                    TokenKind::Mod
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    TokenKind::LogAnd
                } else if self.eat(b'=') {
                    TokenKind::AndAssign
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    TokenKind::LogOr
                } else if self.eat(b'=') {
                    TokenKind::OrAssign
                } else {
                    TokenKind::Pipe
                }
            }
            b'^' => {
                if self.eat(b'=') {
                    TokenKind::XorAssign
                } else {
                    TokenKind::Caret
                }
            }
            b'~' => TokenKind::Tilde,
            b'!' => {
                if self.eat(b'=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            b'<' => {
                if self.eat(b'<') {
                    if self.eat(b'=') {
                        TokenKind::LShiftAssign
                    } else {
                        TokenKind::LShift
                    }
                } else if self.eat(b'=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    if self.eat(b'=') {
                        TokenKind::RShiftAssign
                    } else {
                        TokenKind::RShift
                    }
                } else if self.eat(b'=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'.' => {
                if matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos -= 1;
                    return self.read_number();
                } else if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.pos += 2;
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'?' => TokenKind::Question,
            _ => {
                self.pos -= 1;
                return Err(self.err(format!("unknown character: '{}'", c as char)));
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex_all(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src, "test.c");
        let mut kinds = Vec::new();
        loop {
            let tok = lexer.fetch_token().expect("lex");
            let end = matches!(tok.kind, TokenKind::Eof);
            kinds.push(tok.kind);
            if end {
                return kinds;
            }
        }
    }

    #[test]
    fn punctuation_maximal_munch() {
        let kinds = lex_all("<<= << <= < ... . -> -- -");
        assert_eq!(
            kinds,
            vec![
                TokenKind::LShiftAssign,
                TokenKind::LShift,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::Ellipsis,
                TokenKind::Dot,
                TokenKind::Arrow,
                TokenKind::Dec,
                TokenKind::Sub,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_literals() {
        assert_eq!(
            lex_all("42 0x2a 052 42u 42l 42ll 42ull"),
            vec![
                TokenKind::IntLit { value: 42, unsigned: false, long: 0 },
                TokenKind::IntLit { value: 42, unsigned: false, long: 0 },
                TokenKind::IntLit { value: 42, unsigned: false, long: 0 },
                TokenKind::IntLit { value: 42, unsigned: true, long: 0 },
                TokenKind::IntLit { value: 42, unsigned: false, long: 1 },
                TokenKind::IntLit { value: 42, unsigned: false, long: 2 },
                TokenKind::IntLit { value: 42, unsigned: true, long: 2 },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_literals() {
        assert_eq!(
            lex_all("1.5 2. .5 1e3 1.5f"),
            vec![
                TokenKind::FloatLit { value: 1.5, single: false },
                TokenKind::FloatLit { value: 2.0, single: false },
                TokenKind::FloatLit { value: 0.5, single: false },
                TokenKind::FloatLit { value: 1000.0, single: false },
                TokenKind::FloatLit { value: 1.5, single: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let kinds = lex_all(r#""a\n\x41\101\0""#);
        assert_eq!(
            kinds[0],
            TokenKind::StrLit(vec![b'a', b'\n', b'A', b'A', 0]),
        );
    }

    #[test]
    fn char_literals() {
        assert_eq!(
            lex_all(r"'a' '\n' '\x41'"),
            vec![
                TokenKind::CharLit(97),
                TokenKind::CharLit(10),
                TokenKind::CharLit(65),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_idents() {
        let mut lexer = Lexer::new("int foo; while whilex", "test.c");
        assert!(matches!(lexer.fetch_token().unwrap().kind, TokenKind::KwInt));
        let tok = lexer.fetch_token().unwrap();
        let TokenKind::Ident(name) = tok.kind else { panic!("expected identifier") };
        assert_eq!(lexer.interner().resolve(name), "foo");
        assert!(matches!(lexer.fetch_token().unwrap().kind, TokenKind::Semicolon));
        assert!(matches!(lexer.fetch_token().unwrap().kind, TokenKind::KwWhile));
        assert!(matches!(lexer.fetch_token().unwrap().kind, TokenKind::Ident(_)));
    }

    #[test]
    fn comments_are_skipped() {
        let kinds = lex_all("1 // comment\n/* multi\nline */ 2");
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLit { value: 1, unsigned: false, long: 0 },
                TokenKind::IntLit { value: 2, unsigned: false, long: 0 },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unget_roundtrip() {
        let mut lexer = Lexer::new("a b", "test.c");
        let a = lexer.fetch_token().unwrap();
        lexer.unget_token(a.clone());
        let again = lexer.fetch_token().unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn consume_matches_kind_only() {
        let mut lexer = Lexer::new("42 ;", "test.c");
        let matched = lexer
            .consume(&TokenKind::IntLit { value: 0, unsigned: false, long: 0 })
            .unwrap();
        assert!(matched.is_some());
        assert!(lexer.consume(&TokenKind::Comma).unwrap().is_none());
        assert!(lexer.consume(&TokenKind::Semicolon).unwrap().is_some());
    }

    #[test]
    fn line_directive_updates_location() {
        let mut lexer = Lexer::new("# 10 \"foo.c\"\nx", "test.c");
        let tok = lexer.fetch_token().unwrap();
        let loc = lexer.source_loc(tok.loc);
        assert_eq!(loc.filename, "foo.c");
        assert_eq!(loc.lineno, 10);
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let mut lexer = Lexer::new("\"abc", "test.c");
        let err = lexer.fetch_token().unwrap_err();
        assert!(err.message().contains("unterminated string"));
        let loc = err.loc().expect("location");
        assert_eq!(loc.lineno, 1);
        assert_eq!(loc.col, 1);
    }

    #[test]
    fn unknown_character_is_fatal() {
        let mut lexer = Lexer::new("@", "test.c");
        assert!(lexer.fetch_token().is_err());
    }
}
