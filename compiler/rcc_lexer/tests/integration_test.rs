//! Integration tests for the C tokenizer

use proptest::prelude::*;
use rcc_lexer::{keyword, Lexer, TokenKind};

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
fn function_definition_tokens() {
    let mut lexer = Lexer::new("int main(void) { return 0; }", "test.c");
    assert!(matches!(lexer.fetch_token().unwrap().kind, TokenKind::KwInt));
    let tok = lexer.fetch_token().unwrap();
    let TokenKind::Ident(name) = tok.kind else { panic!("expected identifier") };
    assert_eq!(lexer.interner().resolve(name), "main");
    for expected in [
        TokenKind::LParen,
        TokenKind::KwVoid,
        TokenKind::RParen,
        TokenKind::LBrace,
        TokenKind::KwReturn,
        TokenKind::IntLit { value: 0, unsigned: false, long: 0 },
        TokenKind::Semicolon,
        TokenKind::RBrace,
        TokenKind::Eof,
    ] {
        assert_eq!(lexer.fetch_token().unwrap().kind, expected);
    }
}

#[test]
fn all_c_keywords_classify() {
    for kw in [
        "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "const",
        "volatile", "static", "extern", "typedef", "struct", "union", "enum", "sizeof", "if",
        "else", "switch", "case", "default", "do", "while", "for", "break", "continue", "return",
        "goto", "asm",
    ] {
        assert!(keyword(kw).is_some(), "{} must be a keyword", kw);
    }
    assert!(keyword("integer").is_none());
    assert!(keyword("_Bool").is_none());
}

#[test]
fn operators_tokenize_individually() {
    let kinds = lex_all("+ - * / % & | ^ ~ ! < > = == != <= >= && || << >> -> ++ --");
    assert_eq!(kinds.len(), 24); // 23 operators + EOF
}

proptest! {
    /// A non-keyword identifier lexes to exactly [Ident, Eof] with its own
    /// spelling behind the interned name.
    #[test]
    fn identifier_round_trip(s in "[A-Za-z_][A-Za-z0-9_]{0,30}") {
        prop_assume!(keyword(&s).is_none());
        let mut lexer = Lexer::new(&s, "prop.c");
        let tok = lexer.fetch_token().unwrap();
        let TokenKind::Ident(name) = tok.kind else {
            return Err(TestCaseError::fail("expected an identifier token"));
        };
        prop_assert_eq!(lexer.interner().resolve(name), s.as_str());
        let eof = lexer.fetch_token().unwrap();
        prop_assert!(matches!(eof.kind, TokenKind::Eof));
    }

    /// Decimal literals survive the lexer unchanged.
    #[test]
    fn decimal_round_trip(n in 0i64..=i32::MAX as i64) {
        let src = n.to_string();
        let kinds = lex_all(&src);
        prop_assert_eq!(
            kinds,
            vec![TokenKind::IntLit { value: n, unsigned: false, long: 0 }, TokenKind::Eof]
        );
    }
}
