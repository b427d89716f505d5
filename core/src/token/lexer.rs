use once_cell::sync::Lazy;

use crate::error::CompileError;
use rustc_hash::FxHashMap as FastHashMap;
use crate::val::{Interner, Sym};

/// Token tags.  Keywords are recognized as their own tags; `tok_nores` on
/// the token record carries the same text re-tagged as `Ident` so that
/// property-name positions can accept reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tok {
    Eof,
    Ident,
    Number,
    Str,
    Regexp,
    // Keywords
    Break,
    Case,
    Catch,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    Finally,
    For,
    Function,
    If,
    In,
    Instanceof,
    New,
    Return,
    Switch,
    This,
    Throw,
    Try,
    Typeof,
    Var,
    Void,
    While,
    With,
    // Future reserved words (always reserved)
    Class,
    Const,
    Enum,
    Export,
    Extends,
    Import,
    Super,
    // Future reserved words (strict mode only)
    Implements,
    Interface,
    Let,
    Package,
    Private,
    Protected,
    Public,
    Static,
    Yield,
    // Literal keywords
    Null,
    True,
    False,
    // Punctuators
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Period,
    Semicolon,
    Comma,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Neq,
    Seq,
    Sneq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Increment,
    Decrement,
    Alshift,
    Arshift,
    Rshift,
    BAnd,
    BOr,
    BXor,
    LNot,
    BNot,
    LAnd,
    LOr,
    Question,
    Colon,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AlshiftAssign,
    ArshiftAssign,
    RshiftAssign,
    BAndAssign,
    BOrAssign,
    BXorAssign,
}

static KEYWORDS: Lazy<FastHashMap<&'static str, (Tok, bool)>> = Lazy::new(|| {
    // (tag, strict_only): strict_only entries lex as identifiers outside
    // strict mode.
    let mut m = FastHashMap::default();
    let always = [
        ("break", Tok::Break),
        ("case", Tok::Case),
        ("catch", Tok::Catch),
        ("continue", Tok::Continue),
        ("debugger", Tok::Debugger),
        ("default", Tok::Default),
        ("delete", Tok::Delete),
        ("do", Tok::Do),
        ("else", Tok::Else),
        ("finally", Tok::Finally),
        ("for", Tok::For),
        ("function", Tok::Function),
        ("if", Tok::If),
        ("in", Tok::In),
        ("instanceof", Tok::Instanceof),
        ("new", Tok::New),
        ("return", Tok::Return),
        ("switch", Tok::Switch),
        ("this", Tok::This),
        ("throw", Tok::Throw),
        ("try", Tok::Try),
        ("typeof", Tok::Typeof),
        ("var", Tok::Var),
        ("void", Tok::Void),
        ("while", Tok::While),
        ("with", Tok::With),
        ("class", Tok::Class),
        ("const", Tok::Const),
        ("enum", Tok::Enum),
        ("export", Tok::Export),
        ("extends", Tok::Extends),
        ("import", Tok::Import),
        ("super", Tok::Super),
        ("null", Tok::Null),
        ("true", Tok::True),
        ("false", Tok::False),
    ];
    let strict_only = [
        ("implements", Tok::Implements),
        ("interface", Tok::Interface),
        ("let", Tok::Let),
        ("package", Tok::Package),
        ("private", Tok::Private),
        ("protected", Tok::Protected),
        ("public", Tok::Public),
        ("static", Tok::Static),
        ("yield", Tok::Yield),
    ];
    for (s, t) in always {
        m.insert(s, (t, false));
    }
    for (s, t) in strict_only {
        m.insert(s, (t, true));
    }
    m
});

/// One lexed input element.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub tok: Tok,
    /// Same token without reserved-word recognition: keywords re-tagged as
    /// `Ident` with the keyword text as payload.  Used for IdentifierName
    /// positions (property access, object literal keys).
    pub tok_nores: Tok,
    /// Identifier/string payload; regexp pattern.
    pub sym: Option<Sym>,
    /// Regexp flags payload.
    pub sym2: Option<Sym>,
    pub num: f64,
    pub start_line: u32,
    pub start_offset: usize,
    /// A line terminator appeared between the previous token and this one.
    pub lineterm: bool,
    /// Automatic semicolon insertion is possible before this token.
    pub allow_auto_semi: bool,
    /// Number of escape sequences in a string/identifier payload.  A
    /// directive containing escapes never matches "use strict".
    pub num_escapes: u32,
}

impl Token {
    fn eof(line: u32, offset: usize, lineterm: bool) -> Self {
        Token {
            tok: Tok::Eof,
            tok_nores: Tok::Eof,
            sym: None,
            sym2: None,
            num: 0.0,
            start_line: line,
            start_offset: offset,
            lineterm,
            allow_auto_semi: true,
            num_escapes: 0,
        }
    }
}

impl Default for Token {
    fn default() -> Self {
        Token::eof(1, 0, false)
    }
}

/// Byte offset plus line number: enough to rewind the lexer exactly, which
/// the two-pass compiler relies on both between passes and when skipping
/// already-compiled inner functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LexPoint {
    pub offset: usize,
    pub line: u32,
}

const TOKEN_LIMIT: u64 = 100_000_000;

pub struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: u32,
    tokens_lexed: u64,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            text: source,
            pos: 0,
            line: 1,
            tokens_lexed: 0,
        }
    }

    pub fn get_point(&self) -> LexPoint {
        LexPoint {
            offset: self.pos,
            line: self.line,
        }
    }

    pub fn set_point(&mut self, pt: LexPoint) {
        self.pos = pt.offset;
        self.line = pt.line;
    }

    pub fn current_line(&self) -> u32 {
        self.line
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c.into()
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::syntax(msg.into()).with_line(self.line)
    }

    /// Skip whitespace and comments, tracking whether a line terminator was
    /// crossed.  A block comment containing a newline counts as a line
    /// terminator for semicolon insertion purposes.
    fn skip_trivia(&mut self) -> Result<bool, CompileError> {
        let mut lineterm = false;
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(0x0b) | Some(0x0c) => {
                    self.pos += 1;
                }
                Some(b'\r') => {
                    self.pos += 1;
                    lineterm = true;
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    self.line += 1;
                }
                Some(b'\n') => {
                    self.bump();
                    lineterm = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    self.pos += 2;
                    while let Some(c) = self.peek() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == b'\n' {
                            lineterm = true;
                        }
                        if c == b'*' && self.peek() == Some(b'/') {
                            self.pos += 1;
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(self.err("unterminated comment"));
                    }
                }
                _ => break,
            }
        }
        Ok(lineterm)
    }

    /// Lex the next input element.  `allow_regexp` is the compiler's
    /// "a regexp literal may start here" decision; without it a leading
    /// `/` always lexes as a division-family punctuator.
    pub fn parse_next_token(
        &mut self,
        interner: &mut Interner,
        strict: bool,
        allow_regexp: bool,
    ) -> Result<Token, CompileError> {
        self.tokens_lexed += 1;
        if self.tokens_lexed > TOKEN_LIMIT {
            return Err(CompileError::range("token limit reached").with_line(self.line));
        }

        let lineterm = self.skip_trivia()?;
        let start_line = self.line;
        let start_offset = self.pos;

        let c = match self.peek() {
            None => return Ok(Token::eof(start_line, start_offset, lineterm)),
            Some(c) => c,
        };

        let mut tok = Token {
            tok: Tok::Eof,
            tok_nores: Tok::Eof,
            sym: None,
            sym2: None,
            num: 0.0,
            start_line,
            start_offset,
            lineterm,
            allow_auto_semi: false,
            num_escapes: 0,
        };

        if is_ident_start(c) {
            let (text, escapes) = self.lex_identifier()?;
            tok.num_escapes = escapes;
            let sym = interner.intern(&text);
            tok.sym = Some(sym);
            tok.tok_nores = Tok::Ident;
            // Escaped keywords are not recognized as keywords.
            tok.tok = if escapes == 0 {
                match KEYWORDS.get(text.as_str()) {
                    Some(&(t, strict_only)) if !strict_only || strict => t,
                    _ => Tok::Ident,
                }
            } else {
                Tok::Ident
            };
        } else if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            tok.num = self.lex_number(strict)?;
            tok.tok = Tok::Number;
            tok.tok_nores = Tok::Number;
        } else if c == b'"' || c == b'\'' {
            let (text, escapes) = self.lex_string(strict)?;
            tok.sym = Some(interner.intern(&text));
            tok.num_escapes = escapes;
            tok.tok = Tok::Str;
            tok.tok_nores = Tok::Str;
        } else if c == b'/' && allow_regexp {
            let (pattern, flags) = self.lex_regexp()?;
            tok.sym = Some(interner.intern(&pattern));
            tok.sym2 = Some(interner.intern(&flags));
            tok.tok = Tok::Regexp;
            tok.tok_nores = Tok::Regexp;
        } else {
            let t = self.lex_punctuator()?;
            tok.tok = t;
            tok.tok_nores = t;
        }

        tok.allow_auto_semi = tok.lineterm || tok.tok == Tok::RBrace || tok.tok == Tok::Eof;
        Ok(tok)
    }

    fn lex_identifier(&mut self) -> Result<(String, u32), CompileError> {
        let mut out = String::new();
        let mut escapes = 0u32;
        loop {
            match self.peek() {
                Some(b'\\') => {
                    if self.peek_at(1) != Some(b'u') {
                        return Err(self.err("invalid identifier escape"));
                    }
                    self.pos += 2;
                    let cp = self.lex_hex_digits(4)?;
                    let ch = char::from_u32(cp).ok_or_else(|| self.err("invalid identifier escape"))?;
                    out.push(ch);
                    escapes += 1;
                }
                Some(c) if is_ident_part(c) => {
                    if c < 0x80 {
                        out.push(c as char);
                        self.pos += 1;
                    } else {
                        let ch = self.text[self.pos..]
                            .chars()
                            .next()
                            .ok_or_else(|| self.err("invalid utf-8 in identifier"))?;
                        out.push(ch);
                        self.pos += ch.len_utf8();
                    }
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.err("invalid identifier"));
        }
        Ok((out, escapes))
    }

    fn lex_hex_digits(&mut self, n: usize) -> Result<u32, CompileError> {
        let mut v = 0u32;
        for _ in 0..n {
            let c = self.peek().ok_or_else(|| self.err("truncated escape"))?;
            let d = (c as char).to_digit(16).ok_or_else(|| self.err("invalid hex escape"))?;
            v = v * 16 + d;
            self.pos += 1;
        }
        Ok(v)
    }

    fn lex_number(&mut self, strict: bool) -> Result<f64, CompileError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if self.pos == digits_start {
                return Err(self.err("invalid hex literal"));
            }
            let v = u64::from_str_radix(&self.text[digits_start..self.pos], 16)
                .map_err(|_| self.err("hex literal too large"))?;
            self.check_number_tail()?;
            return Ok(v as f64);
        }

        // Legacy octal literals are rejected in strict mode.
        if strict
            && self.peek() == Some(b'0')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            return Err(self.err("octal literal not allowed in strict mode"));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
                return Err(self.err("invalid number literal"));
            }
        }
        let text = &self.text[start..self.pos];
        let v: f64 = text.parse().map_err(|_| self.err("invalid number literal"))?;
        self.check_number_tail()?;
        Ok(v)
    }

    fn check_number_tail(&self) -> Result<(), CompileError> {
        // "3in" and similar are a single invalid token, not two tokens.
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.err("invalid number literal"));
        }
        Ok(())
    }

    fn lex_string(&mut self, _strict: bool) -> Result<(String, u32), CompileError> {
        let quote = self.bump().expect("caller checked quote");
        let mut out = String::new();
        let mut escapes = 0u32;
        loop {
            let c = self.peek().ok_or_else(|| self.err("unterminated string"))?;
            if c == quote {
                self.pos += 1;
                break;
            }
            match c {
                b'\n' | b'\r' => return Err(self.err("unterminated string")),
                b'\\' => {
                    self.pos += 1;
                    escapes += 1;
                    let e = self.peek().ok_or_else(|| self.err("unterminated string"))?;
                    match e {
                        b'n' => {
                            out.push('\n');
                            self.pos += 1;
                        }
                        b't' => {
                            out.push('\t');
                            self.pos += 1;
                        }
                        b'r' => {
                            out.push('\r');
                            self.pos += 1;
                        }
                        b'b' => {
                            out.push('\u{8}');
                            self.pos += 1;
                        }
                        b'f' => {
                            out.push('\u{c}');
                            self.pos += 1;
                        }
                        b'v' => {
                            out.push('\u{b}');
                            self.pos += 1;
                        }
                        b'0' if !self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                            out.push('\0');
                            self.pos += 1;
                        }
                        b'x' => {
                            self.pos += 1;
                            let v = self.lex_hex_digits(2)?;
                            out.push(char::from_u32(v).expect("two hex digits"));
                        }
                        b'u' => {
                            self.pos += 1;
                            let v = self.lex_hex_digits(4)?;
                            out.push(char::from_u32(v).ok_or_else(|| self.err("invalid unicode escape"))?);
                        }
                        b'\r' => {
                            // Line continuation; CR LF counts as one.
                            self.pos += 1;
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                            self.line += 1;
                        }
                        b'\n' => {
                            self.bump();
                        }
                        _ => {
                            // Non-escape: '\q' is 'q'.
                            let ch = self.text[self.pos..]
                                .chars()
                                .next()
                                .ok_or_else(|| self.err("unterminated string"))?;
                            out.push(ch);
                            self.pos += ch.len_utf8();
                        }
                    }
                }
                _ => {
                    let ch = self.text[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.err("invalid utf-8 in string"))?;
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        Ok((out, escapes))
    }

    /// Scan a regexp literal body and flags.  The pattern is returned as
    /// written (minus the delimiting slashes); compiling it is the regexp
    /// engine's job at closure instantiation time.
    fn lex_regexp(&mut self) -> Result<(String, String), CompileError> {
        debug_assert_eq!(self.peek(), Some(b'/'));
        self.pos += 1;
        let body_start = self.pos;
        let mut in_class = false;
        loop {
            let c = self.peek().ok_or_else(|| self.err("unterminated regexp"))?;
            match c {
                b'\n' | b'\r' => return Err(self.err("unterminated regexp")),
                b'\\' => {
                    self.pos += 1;
                    if matches!(self.peek(), None | Some(b'\n') | Some(b'\r')) {
                        return Err(self.err("unterminated regexp"));
                    }
                    self.pos += 1;
                }
                b'[' => {
                    in_class = true;
                    self.pos += 1;
                }
                b']' => {
                    in_class = false;
                    self.pos += 1;
                }
                b'/' if !in_class => break,
                _ => {
                    self.pos += 1;
                }
            }
        }
        let pattern = self.text[body_start..self.pos].to_string();
        self.pos += 1; // closing slash
        let flags_start = self.pos;
        while self.peek().is_some_and(is_ident_part) {
            self.pos += 1;
        }
        let flags = self.text[flags_start..self.pos].to_string();
        Ok((pattern, flags))
    }

    fn lex_punctuator(&mut self) -> Result<Tok, CompileError> {
        let c = self.bump().expect("caller checked non-eof");
        let t = match c {
            b'{' => Tok::LBrace,
            b'}' => Tok::RBrace,
            b'[' => Tok::LBracket,
            b']' => Tok::RBracket,
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b'.' => Tok::Period,
            b';' => Tok::Semicolon,
            b',' => Tok::Comma,
            b'?' => Tok::Question,
            b':' => Tok::Colon,
            b'~' => Tok::BNot,
            b'<' => {
                if self.eat(b'<') {
                    if self.eat(b'=') { Tok::AlshiftAssign } else { Tok::Alshift }
                } else if self.eat(b'=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    if self.eat(b'>') {
                        if self.eat(b'=') { Tok::RshiftAssign } else { Tok::Rshift }
                    } else if self.eat(b'=') {
                        Tok::ArshiftAssign
                    } else {
                        Tok::Arshift
                    }
                } else if self.eat(b'=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    if self.eat(b'=') { Tok::Seq } else { Tok::Eq }
                } else {
                    Tok::Assign
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    if self.eat(b'=') { Tok::Sneq } else { Tok::Neq }
                } else {
                    Tok::LNot
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    Tok::Increment
                } else if self.eat(b'=') {
                    Tok::AddAssign
                } else {
                    Tok::Add
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    Tok::Decrement
                } else if self.eat(b'=') {
                    Tok::SubAssign
                } else {
                    Tok::Sub
                }
            }
            b'*' => {
                if self.eat(b'=') { Tok::MulAssign } else { Tok::Mul }
            }
            b'/' => {
                if self.eat(b'=') { Tok::DivAssign } else { Tok::Div }
            }
            b'%' => {
                if self.eat(b'=') { Tok::ModAssign } else { Tok::Mod }
            }
            b'&' => {
                if self.eat(b'&') {
                    Tok::LAnd
                } else if self.eat(b'=') {
                    Tok::BAndAssign
                } else {
                    Tok::BAnd
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    Tok::LOr
                } else if self.eat(b'=') {
                    Tok::BOrAssign
                } else {
                    Tok::BOr
                }
            }
            b'^' => {
                if self.eat(b'=') { Tok::BXorAssign } else { Tok::BXor }
            }
            _ => return Err(self.err(format!("unexpected character '{}'", c as char))),
        };
        Ok(t)
    }

    #[inline]
    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

#[inline]
fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c == b'\\' || c >= 0x80
}

#[inline]
fn is_ident_part(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80
}
