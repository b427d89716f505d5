use std::rc::Rc;

use super::func::Compiler;
use crate::error::CompileError;
use crate::val::Interner;
use crate::vm::bytecode::FuncTemplate;

/// Compilation mode and knobs.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Compile as eval code: bindings become configurable and the code
    /// gets an implicit return value.
    pub eval: bool,
    /// Initial strictness; a "use strict" directive can only strengthen
    /// it.
    pub strict: bool,
    /// The top level is a function expression (Function constructor
    /// body) rather than a program.
    pub funcexpr: bool,
    /// Support the non-standard function 'caller' property.  Its
    /// bookkeeping cannot survive frame reuse, so enabling it disables
    /// the tail-call back-patch in return statements.
    pub function_caller_property: bool,
}

/// Compile source text into a function template using a caller-provided
/// string registry.  Templates reference strings through interned handles,
/// so the same registry must be used to resolve them.
///
/// Any failure is annotated with the line of the token the lexer was
/// positioned at, whatever the error kind.
pub fn compile_with_interner(
    source: &str,
    filename: Option<&str>,
    options: &CompileOptions,
    interner: &mut Interner,
) -> Result<Rc<FuncTemplate>, CompileError> {
    let mut compiler = Compiler::new(source, filename, options.clone(), interner);
    match compiler.compile_top_level() {
        Ok(template) => Ok(template),
        Err(e) => Err(e.with_line(compiler.curr_token.start_line)),
    }
}

/// Convenience wrapper owning a fresh interner; returns it alongside the
/// template for string resolution.
pub fn compile(
    source: &str,
    filename: Option<&str>,
    options: &CompileOptions,
) -> Result<(Rc<FuncTemplate>, Interner), CompileError> {
    let mut interner = Interner::new();
    let template = compile_with_interner(source, filename, options, &mut interner)?;
    Ok((template, interner))
}
