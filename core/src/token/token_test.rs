use super::*;
use crate::val::Interner;

fn lex_all(src: &str) -> Vec<Token> {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new(src);
    let mut out = Vec::new();
    loop {
        let no_regexp_before = out
            .last()
            .map(|t: &Token| {
                matches!(
                    t.tok,
                    Tok::Ident | Tok::Number | Tok::Str | Tok::This | Tok::RParen | Tok::RBracket | Tok::RBrace
                )
            })
            .unwrap_or(false);
        let tok = lexer
            .parse_next_token(&mut interner, false, !no_regexp_before)
            .expect("lex");
        let done = tok.tok == Tok::Eof;
        out.push(tok);
        if done {
            break;
        }
    }
    out
}

fn tags(src: &str) -> Vec<Tok> {
    lex_all(src).into_iter().map(|t| t.tok).collect()
}

#[test]
fn punctuators_longest_match() {
    assert_eq!(
        tags(">>>= >>> >> > >= === == ="),
        vec![
            Tok::RshiftAssign,
            Tok::Rshift,
            Tok::Arshift,
            Tok::Gt,
            Tok::Ge,
            Tok::Seq,
            Tok::Eq,
            Tok::Assign,
            Tok::Eof
        ]
    );
}

#[test]
fn keywords_and_identifiers() {
    let toks = lex_all("var foo = function bar() {};");
    assert_eq!(toks[0].tok, Tok::Var);
    assert_eq!(toks[1].tok, Tok::Ident);
    assert_eq!(toks[3].tok, Tok::Function);
    // Keywords still carry an identifier view for property-name positions.
    assert_eq!(toks[0].tok_nores, Tok::Ident);
    assert!(toks[0].sym.is_some());
}

#[test]
fn strict_only_reserved_words() {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("let");
    let t = lexer.parse_next_token(&mut interner, false, true).expect("lex");
    assert_eq!(t.tok, Tok::Ident);

    let mut lexer = Lexer::new("let");
    let t = lexer.parse_next_token(&mut interner, true, true).expect("lex");
    assert_eq!(t.tok, Tok::Let);
}

#[test]
fn numbers() {
    let toks = lex_all("0 1.5 0x10 1e3 .25");
    assert_eq!(toks[0].num, 0.0);
    assert_eq!(toks[1].num, 1.5);
    assert_eq!(toks[2].num, 16.0);
    assert_eq!(toks[3].num, 1000.0);
    assert_eq!(toks[4].num, 0.25);
}

#[test]
fn number_followed_by_ident_is_rejected() {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("3in");
    assert!(lexer.parse_next_token(&mut interner, false, true).is_err());
}

#[test]
fn string_escapes_counted() {
    let toks = lex_all("\"use strict\" \"use\\u0020strict\"");
    assert_eq!(toks[0].num_escapes, 0);
    assert_eq!(toks[1].num_escapes, 1);
    // Escaped and unescaped forms intern to the same string.
    assert_eq!(toks[0].sym, toks[1].sym);
}

#[test]
fn lineterm_flag_and_auto_semi() {
    let toks = lex_all("a\nb");
    assert!(!toks[0].lineterm);
    assert!(toks[1].lineterm);
    assert!(toks[1].allow_auto_semi);
}

#[test]
fn regexp_vs_division() {
    // After an identifier a slash is division; at expression start it is a
    // regexp literal.
    let toks = lex_all("a / b");
    assert_eq!(toks[1].tok, Tok::Div);

    let toks = lex_all("/ab[/]c/gi");
    assert_eq!(toks[0].tok, Tok::Regexp);
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("/ab[/]c/gi");
    let t = lexer.parse_next_token(&mut interner, false, true).expect("lex");
    assert_eq!(interner.resolve(t.sym.expect("pattern")), "ab[/]c");
    assert_eq!(interner.resolve(t.sym2.expect("flags")), "gi");
}

#[test]
fn rewind_by_point() {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("foo bar");
    let pt = lexer.get_point();
    let t1 = lexer.parse_next_token(&mut interner, false, true).expect("lex");
    lexer.set_point(pt);
    let t2 = lexer.parse_next_token(&mut interner, false, true).expect("lex");
    assert_eq!(t1.sym, t2.sym);
    assert_eq!(t1.start_offset, t2.start_offset);
}

#[test]
fn octal_rejected_in_strict_mode() {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("0123");
    assert!(lexer.parse_next_token(&mut interner, true, true).is_err());
    let mut lexer = Lexer::new("0123");
    assert!(lexer.parse_next_token(&mut interner, false, true).is_ok());
}
