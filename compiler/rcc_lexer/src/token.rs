//! Token definitions for the C subset

use rcc_common::{Loc, Name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;

/// Token kinds. Literal variants carry their decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    /// Integer literal; `long` counts the `l` suffixes (0, 1 or 2).
    IntLit { value: i64, unsigned: bool, long: u8 },
    CharLit(i64),
    FloatLit { value: f64, single: bool },
    StrLit(Vec<u8>),
    Ident(Name),

    // Keywords
    KwVoid,
    KwChar,
    KwShort,
    KwInt,
    KwLong,
    KwFloat,
    KwDouble,
    KwSigned,
    KwUnsigned,
    KwConst,
    KwVolatile,
    KwStatic,
    KwExtern,
    KwTypedef,
    KwStruct,
    KwUnion,
    KwEnum,
    KwSizeof,
    KwIf,
    KwElse,
    KwSwitch,
    KwCase,
    KwDefault,
    KwDo,
    KwWhile,
    KwFor,
    KwBreak,
    KwContinue,
    KwReturn,
    KwGoto,
    KwAsm,

    // Operators
    Add,          // +
    Sub,          // -
    Mul,          // *
    Div,          // /
    Mod,          // %
    Amp,          // &
    Pipe,         // |
    Caret,        // ^
    Tilde,        // ~
    Not,          // !
    Lt,           // <
    Gt,           // >
    Assign,       // =
    Eq,           // ==
    Ne,           // !=
    Le,           // <=
    Ge,           // >=
    LogAnd,       // &&
    LogOr,        // ||
    LShift,       // <<
    RShift,       // >>
    Arrow,        // ->
    Inc,          // ++
    Dec,          // --
    AddAssign,    // +=
    SubAssign,    // -=
    MulAssign,    // *=
    DivAssign,    // /=
    ModAssign,    // %=
    AndAssign,    // &=
    OrAssign,     // |=
    XorAssign,    // ^=
    LShiftAssign, // <<=
    RShiftAssign, // >>=
    Question,     // ?

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Semicolon, // ;
    Colon,     // :
    Comma,     // ,
    Dot,       // .
    Ellipsis,  // ...

    Eof,
}

impl TokenKind {
    /// Same variant, ignoring literal payloads. Used by `consume`.
    pub fn same_kind(&self, other: &TokenKind) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::IntLit { value, .. } => return write!(f, "{}", value),
            TokenKind::CharLit(c) => return write!(f, "'\\x{:02x}'", c),
            TokenKind::FloatLit { value, .. } => return write!(f, "{}", value),
            TokenKind::StrLit(bytes) => {
                return write!(f, "\"{}\"", String::from_utf8_lossy(bytes))
            }
            TokenKind::Ident(_) => "identifier",
            TokenKind::KwVoid => "void",
            TokenKind::KwChar => "char",
            TokenKind::KwShort => "short",
            TokenKind::KwInt => "int",
            TokenKind::KwLong => "long",
            TokenKind::KwFloat => "float",
            TokenKind::KwDouble => "double",
            TokenKind::KwSigned => "signed",
            TokenKind::KwUnsigned => "unsigned",
            TokenKind::KwConst => "const",
            TokenKind::KwVolatile => "volatile",
            TokenKind::KwStatic => "static",
            TokenKind::KwExtern => "extern",
            TokenKind::KwTypedef => "typedef",
            TokenKind::KwStruct => "struct",
            TokenKind::KwUnion => "union",
            TokenKind::KwEnum => "enum",
            TokenKind::KwSizeof => "sizeof",
            TokenKind::KwIf => "if",
            TokenKind::KwElse => "else",
            TokenKind::KwSwitch => "switch",
            TokenKind::KwCase => "case",
            TokenKind::KwDefault => "default",
            TokenKind::KwDo => "do",
            TokenKind::KwWhile => "while",
            TokenKind::KwFor => "for",
            TokenKind::KwBreak => "break",
            TokenKind::KwContinue => "continue",
            TokenKind::KwReturn => "return",
            TokenKind::KwGoto => "goto",
            TokenKind::KwAsm => "asm",
            TokenKind::Add => "+",
            TokenKind::Sub => "-",
            TokenKind::Mul => "*",
            TokenKind::Div => "/",
            TokenKind::Mod => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Not => "!",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::LogAnd => "&&",
            TokenKind::LogOr => "||",
            TokenKind::LShift => "<<",
            TokenKind::RShift => ">>",
            TokenKind::Arrow => "->",
            TokenKind::Inc => "++",
            TokenKind::Dec => "--",
            TokenKind::AddAssign => "+=",
            TokenKind::SubAssign => "-=",
            TokenKind::MulAssign => "*=",
            TokenKind::DivAssign => "/=",
            TokenKind::ModAssign => "%=",
            TokenKind::AndAssign => "&=",
            TokenKind::OrAssign => "|=",
            TokenKind::XorAssign => "^=",
            TokenKind::LShiftAssign => "<<=",
            TokenKind::RShiftAssign => ">>=",
            TokenKind::Question => "?",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Ellipsis => "...",
            TokenKind::Eof => "EOF",
        };
        write!(f, "{}", text)
    }
}

/// A token with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
}

impl Token {
    pub fn new(kind: TokenKind, loc: Loc) -> Self {
        Self { kind, loc }
    }

    pub fn is(&self, kind: &TokenKind) -> bool {
        self.kind.same_kind(kind)
    }
}

/// Keyword classification. The vocabulary is closed, so a match doubles as a
/// perfect table.
pub fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "void" => TokenKind::KwVoid,
        "char" => TokenKind::KwChar,
        "short" => TokenKind::KwShort,
        "int" => TokenKind::KwInt,
        "long" => TokenKind::KwLong,
        "float" => TokenKind::KwFloat,
        "double" => TokenKind::KwDouble,
        "signed" => TokenKind::KwSigned,
        "unsigned" => TokenKind::KwUnsigned,
        "const" => TokenKind::KwConst,
        "volatile" => TokenKind::KwVolatile,
        "static" => TokenKind::KwStatic,
        "extern" => TokenKind::KwExtern,
        "typedef" => TokenKind::KwTypedef,
        "struct" => TokenKind::KwStruct,
        "union" => TokenKind::KwUnion,
        "enum" => TokenKind::KwEnum,
        "sizeof" => TokenKind::KwSizeof,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "switch" => TokenKind::KwSwitch,
        "case" => TokenKind::KwCase,
        "default" => TokenKind::KwDefault,
        "do" => TokenKind::KwDo,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        "break" => TokenKind::KwBreak,
        "continue" => TokenKind::KwContinue,
        "return" => TokenKind::KwReturn,
        "goto" => TokenKind::KwGoto,
        "asm" | "__asm" | "__asm__" => TokenKind::KwAsm,
        _ => return None,
    };
    Some(kind)
}
