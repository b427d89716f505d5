use std::rc::Rc;

use tracing::debug;

use super::func::{Compiler, DeclKind, FuncState, InnerFunc, MAX_FUNCS, VarEntry};
use crate::error::CompileError;
use crate::token::{LexPoint, Tok, is_reserved_word, is_strict_reserved_word};
use crate::val::Val;
use crate::vm::bytecode::{
    DECLVAR_FLAG_FUNC_DECL, DECLVAR_FLAG_UNDEF_VALUE, ExtraOp, FuncTemplate, Op, PROP_FLAG_CONFIGURABLE,
    PROP_FLAG_ENUMERABLE, PROP_FLAG_WRITABLE, PcLine, RETURN_FLAG_FAST, RETURN_FLAG_HAVE_RETVAL,
};

impl<'src, 'i> Compiler<'src, 'i> {
    /*
     *  Declaration binding instantiation (E5 Section 10.5), i.e. the
     *  function prologue emitted at the start of pass 2.
     *
     *  The varmap tracks every name bound in this function: to a register
     *  for function code, or to a slow path sentinel for eval/global
     *  bindings that live on the runtime environment.  Sentinel entries
     *  also catch duplicate declarations.
     */

    fn init_varmap_and_prologue_for_pass2(
        &mut self,
        implicit_return_value: bool,
    ) -> Result<Option<u32>, CompileError> {
        // Eval code declares configurable bindings; global/function code
        // does not.
        let configurable_bindings = self.func.is_eval;
        let num_args = self.func.argnames.len() as u32;

        /*
         *  Formals are always register bound: r0..r(nargs-1).  Strictness
         *  is final here, so the strict-mode argument checks that could
         *  not be done during formal parsing happen now.
         */
        for i in 0..self.func.argnames.len() {
            let name = self.func.argnames[i];
            if self.func.is_strict {
                if self.is_eval_or_arguments(name) {
                    return Err(CompileError::syntax("invalid argument name"));
                }
                if self.func.varmap.contains(name) {
                    return Err(CompileError::syntax("duplicate argument name"));
                }
                if is_strict_reserved_word(self.sym_text(name)) {
                    return Err(CompileError::syntax("invalid argument name"));
                }
            }
            // Non-strict duplicate names: last one wins.
            self.func.varmap.insert(name, VarEntry::Reg(i as u32));
        }

        self.set_temp_checkmax(num_args);

        /*
         *  Special registers right after the formals: the implicit return
         *  value register for program/eval code, and the three shuffle
         *  registers when pass 1 saw any operand that may need them.
         */
        let out_stmt_value_reg = if implicit_return_value {
            Some(self.alloc_temp()?)
        } else {
            None
        };

        if self.func.needs_shuffle {
            let shuffle_base = self.alloc_temps(3)?;
            self.func.shuffle1 = shuffle_base;
            self.func.shuffle2 = shuffle_base + 1;
            self.func.shuffle3 = shuffle_base + 2;
            debug!(shuffle_base, "function requires shuffle registers");
        }
        if self.func.temp_next > 0x100 {
            // Named bindings and reserved registers must fit the 8-bit
            // register space; only temps beyond it can be shuffled.
            return Err(CompileError::range("out of registers"));
        }

        /*
         *  Function declarations bind first and always get a value.
         */
        for i in 0..self.func.decls.len() {
            let (name, kind) = self.func.decls[i];
            let DeclKind::Func(fnum) = kind else {
                continue;
            };

            if self.func.is_function {
                if let Some(VarEntry::Reg(reg_bind)) = self.func.varmap.get(name) {
                    // Shadowed by a formal or an earlier declaration:
                    // update the existing register.
                    self.emit_a_bc(Op::Closure as u32, reg_bind, fnum)?;
                } else {
                    let reg_bind = self.alloc_temp()?;
                    self.emit_a_bc(Op::Closure as u32, reg_bind, fnum)?;
                    self.func.varmap.insert(name, VarEntry::Reg(reg_bind));
                }
            } else {
                // Eval/global code: DECLVAR is emitted even for duplicate
                // names, because re-declaration updates the binding value
                // (E5 Section 10.5 step 5.e).
                let reg_temp = self.alloc_temp()?;
                let name_const = self.get_const(Val::Str(name))?;
                self.emit_a_bc(Op::Closure as u32, reg_temp, fnum)?;

                let mut declvar_flags = PROP_FLAG_WRITABLE | PROP_FLAG_ENUMERABLE | DECLVAR_FLAG_FUNC_DECL;
                if configurable_bindings {
                    declvar_flags |= PROP_FLAG_CONFIGURABLE;
                }
                self.emit_a_b_c(Op::DeclVar as u32, declvar_flags, name_const, reg_temp)?;
                self.set_temp(reg_temp);
                self.func.varmap.insert(name, VarEntry::Slow);
            }
        }

        /*
         *  If 'arguments' is shadowed by a formal or a function
         *  declaration, the arguments object never needs to be created,
         *  no matter what the body does.
         */
        if self.func.varmap.contains(self.wk.arguments) {
            self.func.is_arguments_shadowed = true;
        }

        /*
         *  Variable declarations get no value on entry; duplicates of any
         *  earlier binding are silently ignored.
         */
        for i in 0..self.func.decls.len() {
            let (name, kind) = self.func.decls[i];
            if kind != DeclKind::Var {
                continue;
            }
            if self.func.varmap.contains(name) {
                continue;
            }
            if name == self.wk.arguments && !self.func.is_arguments_shadowed {
                // 'var arguments' without an initializer does not shadow
                // the arguments object (E5 Section 10.5 steps 7-8).
                continue;
            }

            if self.func.is_function {
                // The register starts out undefined on entry, no code
                // needed.
                let reg_bind = self.alloc_temp()?;
                self.func.varmap.insert(name, VarEntry::Reg(reg_bind));
            } else {
                let name_const = self.get_const(Val::Str(name))?;
                let mut declvar_flags =
                    PROP_FLAG_WRITABLE | PROP_FLAG_ENUMERABLE | DECLVAR_FLAG_UNDEF_VALUE;
                if configurable_bindings {
                    declvar_flags |= PROP_FLAG_CONFIGURABLE;
                }
                self.emit_a_b_c(Op::DeclVar as u32, declvar_flags, name_const, 0)?;
                self.func.varmap.insert(name, VarEntry::Slow);
            }
        }

        Ok(out_stmt_value_reg)
    }

    /*
     *  Two-pass function body compilation.
     *
     *  Pass 1 scans the statement list, collecting declarations and
     *  compiling inner functions fully, then the lexer rewinds to the
     *  recorded point.  Pass 2 emits the prologue (now that strictness
     *  and the declaration set are known) and generates the final code,
     *  skipping inner function bodies by lexer seek.
     */

    pub fn parse_func_body(
        &mut self,
        expect_eof: bool,
        implicit_return_value: bool,
    ) -> Result<(), CompileError> {
        self.recursion_increase()?;
        let res = self.parse_func_body_inner(expect_eof, implicit_return_value);
        self.recursion_decrease();
        res
    }

    fn parse_func_body_inner(
        &mut self,
        expect_eof: bool,
        implicit_return_value: bool,
    ) -> Result<(), CompileError> {
        let lex_pt = self.lex.get_point();

        /*
         *  Pass 1: scan.
         */
        if implicit_return_value {
            // Pass-1 code is thrown away; the register is allocated only
            // so temp numbering matches pass 2.
            self.func.reg_stmt_value = Some(self.alloc_temp()?);
        }
        self.func.in_directive_prologue = true;
        self.func.in_scanning = true;
        self.func.may_direct_eval = false;
        self.func.id_access_arguments = false;
        self.func.id_access_slow = false;

        self.reset_token_window();
        self.advance()?;

        debug!(strict = self.func.is_strict, "function body pass 1");
        self.parse_stmts(true, expect_eof)?;

        /*
         *  Rewind and reset for pass 2.
         */
        self.lex.set_point(lex_pt);
        self.reset_token_window();
        self.advance()?;

        self.func.reset_for_pass2();
        self.func.in_directive_prologue = true;
        self.func.in_scanning = false;

        let reg_stmt_value = self.init_varmap_and_prologue_for_pass2(implicit_return_value)?;
        self.func.reg_stmt_value = reg_stmt_value;

        let temp_first = self.get_temp();
        self.func.temp_first = temp_first;
        self.func.temp_next = temp_first;
        self.func.stmt_next = 0;
        self.func.label_next = 0;
        self.func.id_access_arguments = false;
        self.func.id_access_slow = false;

        /*
         *  Function name validity is checked between the passes because
         *  a directive inside the body may have made the function strict
         *  after the name was read.  Getter/setter names are property
         *  names and exempt.
         */
        if self.func.is_function && !self.func.is_setget {
            if let Some(name) = self.func.name {
                let text = self.sym_text(name).to_string();
                if self.func.is_strict {
                    if self.is_eval_or_arguments(name) || is_strict_reserved_word(&text) {
                        return Err(CompileError::syntax("invalid function name"));
                    }
                } else if is_reserved_word(&text) && !is_strict_reserved_word(&text) {
                    return Err(CompileError::syntax("invalid function name"));
                }
            }
        }

        /*
         *  Pass 2: generate code.
         */
        if let Some(reg) = reg_stmt_value {
            // The implicit return value must start out undefined; not
            // every statement produces a value.
            self.emit_extraop_bc(ExtraOp::LdUndef, reg)?;
        }

        debug!(strict = self.func.is_strict, "function body pass 2");
        self.parse_stmts(true, expect_eof)?;

        /*
         *  Final RETURN.  Whether the preceding code can fall through
         *  here is not reliably detectable, so it is always emitted.
         *  catch_depth is zero at the body end, so the fast flag is
         *  always valid.
         */
        debug_assert_eq!(self.func.catch_depth, 0);
        match reg_stmt_value {
            Some(reg) => {
                self.emit_a_b(Op::Return as u32, RETURN_FLAG_HAVE_RETVAL | RETURN_FLAG_FAST, reg)?;
            }
            None => {
                self.emit_a_b(Op::Return as u32, RETURN_FLAG_FAST, 0)?;
            }
        }

        self.peephole_optimize_bytecode();
        Ok(())
    }

    /*
     *  Function-like productions: function expressions, declarations, and
     *  object literal getters/setters.
     */

    /// Parse the formal argument list; the left paren has been eaten and
    /// the right paren is left as the current token.  Prohibited and
    /// duplicate names are not checked here; strictness may still change.
    fn parse_func_formals(&mut self) -> Result<(), CompileError> {
        let mut first = true;
        loop {
            if self.curr_token.tok == Tok::RParen {
                break;
            }
            if first {
                first = false;
            } else {
                self.advance_expect(Tok::Comma)?;
            }
            if self.curr_token.tok != Tok::Ident {
                return Err(CompileError::syntax("expected identifier"));
            }
            let name = self.curr_token.sym.expect("identifier payload");
            self.func.argnames.push(name);
            self.advance()?;
        }
        Ok(())
    }

    /// Parse a function-like body with `self.func` freshly set up by the
    /// caller.  The current token is the function name (or '(' for an
    /// anonymous expression).  Returns the finished template.
    pub fn parse_func_like_raw(
        &mut self,
        is_decl: bool,
        is_setget: bool,
    ) -> Result<Rc<FuncTemplate>, CompileError> {
        debug_assert!(self.func.is_function);

        /*
         *  Function name.  Prohibited names cannot be rejected here since
         *  strictness is not yet final; the body parser re-checks.  A
         *  getter/setter name is a PropertyName and also accepts reserved
         *  words, strings, and numbers.
         */
        if is_setget {
            if self.curr_token.tok_nores == Tok::Ident || self.curr_token.tok == Tok::Str {
                self.func.name = self.curr_token.sym;
            } else if self.curr_token.tok == Tok::Number {
                let text = crate::val::number_to_key_string(self.curr_token.num);
                self.func.name = Some(self.interner.intern(&text));
            } else {
                return Err(CompileError::syntax("invalid getter/setter name"));
            }
            self.advance()?;
        } else if self.curr_token.tok_nores == Tok::Ident {
            self.func.name = self.curr_token.sym;
            self.advance()?;
        } else if is_decl {
            return Err(CompileError::syntax("function name required"));
        }

        self.advance_expect(Tok::LParen)?;
        self.parse_func_formals()?;
        debug_assert_eq!(self.curr_token.tok, Tok::RParen);
        self.advance()?;

        self.parse_func_body(false, false)?;

        Ok(self.convert_to_func_template())
    }

    /// Parse an inner function and return its stable function number.
    ///
    /// Pass 1 compiles the function in full (its own two passes) and
    /// records the lexer point of its closing brace.  Pass 2 advances the
    /// same counter but skips the body entirely by seeking the lexer,
    /// turning quadratic nested-function parsing into linear.
    pub fn parse_func_like_fnum(&mut self, is_decl: bool, is_setget: bool) -> Result<u32, CompileError> {
        if !self.func.in_scanning {
            let fnum = self.func.fnum_next;
            self.func.fnum_next += 1;

            let inner = &self.func.funcs[fnum as usize];
            let pt = LexPoint {
                offset: inner.lex_offset,
                line: inner.lex_line,
            };
            self.lex.set_point(pt);
            self.reset_token_window();
            // Reparse the closing brace so semicolon insertion state is
            // identical to the first pass.
            self.advance()?;
            self.advance_expect(Tok::RBrace)?;
            return Ok(fnum);
        }

        let old_func = std::mem::replace(&mut self.func, FuncState::new());
        self.func.is_strict = old_func.is_strict;
        self.func.is_function = true;
        self.func.is_decl = is_decl;
        self.func.is_setget = is_setget;

        let template = match self.parse_func_like_raw(is_decl, is_setget) {
            Ok(t) => t,
            Err(e) => {
                self.func = old_func;
                return Err(e);
            }
        };

        // prev_token is the inner function's closing brace; its point is
        // what the second pass will seek to.
        debug_assert_eq!(self.prev_token.tok, Tok::RBrace);
        let lex_offset = self.prev_token.start_offset;
        let lex_line = self.prev_token.start_line;

        self.func = old_func;

        let fnum = self.func.fnum_next;
        self.func.fnum_next += 1;
        if fnum >= MAX_FUNCS {
            return Err(CompileError::range("out of inner functions"));
        }
        debug_assert_eq!(self.func.funcs.len(), fnum as usize);
        self.func.funcs.push(InnerFunc {
            template,
            lex_offset,
            lex_line,
        });
        Ok(fnum)
    }

    /*
     *  Template finalization
     */

    /// Pack the current function state into an immutable template.  Only
    /// metadata that can actually be needed at runtime is kept: the
    /// varmap only if slow path identifier access is possible, the formal
    /// names only if an arguments object may be created.
    pub fn convert_to_func_template(&mut self) -> Rc<FuncTemplate> {
        let f = &self.func;

        let code: Vec<u32> = f.code.iter().map(|ci| ci.ins).collect();

        let mut pc2line: Vec<PcLine> = Vec::new();
        for (pc, ci) in f.code.iter().enumerate() {
            if pc2line.last().map(|e| e.line) != Some(ci.line) {
                pc2line.push(PcLine {
                    pc: pc as u32,
                    line: ci.line,
                });
            }
        }

        let varmap = if f.id_access_slow || f.may_direct_eval {
            let cleaned = f.varmap.cleanup();
            if cleaned.is_empty() { None } else { Some(cleaned) }
        } else {
            None
        };

        let create_args = f.is_function
            && !f.is_arguments_shadowed
            && (f.id_access_arguments || f.may_direct_eval);

        let formals = if create_args {
            Some(f.argnames.clone())
        } else {
            None
        };

        let name_binding = f.is_function && !f.is_decl && !f.is_setget && f.name.is_some();

        let funcs: Vec<Rc<FuncTemplate>> = f.funcs.iter().map(|inner| inner.template.clone()).collect();

        debug!(
            nregs = f.temp_max,
            nargs = f.argnames.len(),
            ninstr = code.len(),
            nconsts = f.consts.len(),
            "finalized function template"
        );

        Rc::new(FuncTemplate {
            code,
            consts: f.consts.clone(),
            funcs,
            nregs: f.temp_max,
            nargs: f.argnames.len() as u32,
            name: f.name,
            filename: self.filename,
            varmap,
            formals,
            pc2line,
            is_strict: f.is_strict,
            name_binding,
            create_args,
        })
    }

    /*
     *  Top-level entry: program, eval, or function-expression form.
     */

    pub fn compile_top_level(&mut self) -> Result<Rc<FuncTemplate>, CompileError> {
        if self.options.funcexpr {
            // Function constructor body: the top level is an anonymous
            // function expression.
            self.func.is_function = true;
            self.func.is_strict = self.options.strict;

            self.advance()?; // prime the token window
            self.advance_expect(Tok::Function)?;
            self.parse_func_like_raw(false, false)
        } else {
            self.func.is_eval = self.options.eval;
            self.func.is_global = !self.options.eval;
            self.func.is_strict = self.options.strict;
            self.func.name = Some(if self.options.eval {
                self.wk.eval
            } else {
                self.wk.name_global
            });

            self.parse_func_body(true, true)?;
            Ok(self.convert_to_func_template())
        }
    }
}
