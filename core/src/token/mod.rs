mod lexer;

pub use lexer::{LexPoint, Lexer, Tok, Token};

#[cfg(test)]
#[path = "token_test.rs"]
mod token_test;

/// Reserved word sets for function-name validation.  The lexer recognizes
/// keywords on its own; these helpers exist for retroactive checks, where
/// a name captured before strictness was known must be re-validated once
/// the directive prologue has been processed.
pub fn is_strict_reserved_word(s: &str) -> bool {
    matches!(
        s,
        "implements"
            | "interface"
            | "let"
            | "package"
            | "private"
            | "protected"
            | "public"
            | "static"
            | "yield"
    )
}

pub fn is_reserved_word(s: &str) -> bool {
    matches!(
        s,
        "break"
            | "case"
            | "catch"
            | "continue"
            | "debugger"
            | "default"
            | "delete"
            | "do"
            | "else"
            | "finally"
            | "for"
            | "function"
            | "if"
            | "in"
            | "instanceof"
            | "new"
            | "return"
            | "switch"
            | "this"
            | "throw"
            | "try"
            | "typeof"
            | "var"
            | "void"
            | "while"
            | "with"
            | "class"
            | "const"
            | "enum"
            | "export"
            | "extends"
            | "import"
            | "super"
            | "null"
            | "true"
            | "false"
    ) || is_strict_reserved_word(s)
}
