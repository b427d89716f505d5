use tracing::trace;

use super::emit::EMIT_FLAG_A_IS_SOURCE;
use super::expr::{
    BP_COMMA, BP_FOR_EXPR, EXPR_FLAG_ALLOW_EMPTY, EXPR_FLAG_REJECT_IN,
};
use super::func::{Compiler, DeclKind, LABEL_ALLOW_BREAK, LABEL_ALLOW_CONTINUE, VarEntry};
use super::ivalue::{IVAL_FLAG_ALLOW_CONST, Ivalue, LhsBinding};
use crate::error::CompileError;
use crate::token::Tok;
use crate::val::{Sym, Val};
use crate::vm::bytecode::{
    CALL_FLAG_TAILCALL, ExtraOp, Op, RETURN_FLAG_FAST, RETURN_FLAG_HAVE_RETVAL,
    TRYCATCH_FLAG_CATCH_BINDING, TRYCATCH_FLAG_HAVE_CATCH, TRYCATCH_FLAG_HAVE_FINALLY,
    TRYCATCH_FLAG_WITH_BINDING, dec_op, enc_op_a_b_c,
};

// Statement classification flags.
const HAS_VAL: u32 = 1 << 0; // stmt has a non-empty value
const HAS_TERM: u32 = 1 << 1; // stmt requires a terminator
/// Allow automatic semicolon insertion even without a preceding line
/// terminator; do-while compatibility relaxation.
const ALLOW_AUTO_SEMI_ALWAYS: u32 = 1 << 2;
const STILL_PROLOGUE: u32 = 1 << 3; // stmt does not terminate the directive prologue
const IS_TERMINAL: u32 = 1 << 4; // control cannot flow to the next statement

impl<'src, 'i> Compiler<'src, 'i> {
    /// Parse a statement list terminated by EOF or a closing brace; the
    /// terminator is eaten.
    pub fn parse_stmts(&mut self, allow_source_elem: bool, expect_eof: bool) -> Result<(), CompileError> {
        loop {
            let end = if expect_eof {
                self.curr_token.tok == Tok::Eof
            } else {
                self.curr_token.tok == Tok::RBrace
            };
            if end {
                break;
            }
            self.parse_stmt(allow_source_elem)?;
        }
        self.advance()?;
        Ok(())
    }

    /// Lazily create the 3-word label site (LABEL id, break jump slot,
    /// continue jump slot) for the statement being parsed.
    fn stmt_label_site(&mut self, label_id: Option<u32>) -> u32 {
        if let Some(id) = label_id {
            return id;
        }
        let id = self.func.label_next;
        self.func.label_next += 1;
        self.emit_op_abc(Op::Label, id);
        self.emit_invalid();
        self.emit_invalid();
        id
    }

    /// Parse a single statement, peeling off any leading labels.  An empty
    /// label site is established automatically for iteration and switch
    /// statements so unlabelled break/continue have a target.
    pub fn parse_stmt(&mut self, allow_source_elem: bool) -> Result<(), CompileError> {
        self.recursion_increase()?;
        let res = self.parse_stmt_inner(allow_source_elem);
        self.recursion_decrease();
        res
    }

    fn parse_stmt_inner(&mut self, mut allow_source_elem: bool) -> Result<(), CompileError> {
        let temp_at_entry = self.get_temp();
        let pc_at_entry = self.get_current_pc();
        let labels_len_at_entry = self.func.labels.len();
        let dir_prol_at_entry = self.func.in_directive_prologue;
        let stmt_id = self.func.stmt_next;
        self.func.stmt_next += 1;
        trace!(stmt_id, pc_at_entry, "parse statement");

        // Cleared by default so nested statements never extend the
        // prologue; revived below only when a directive is recognized.
        self.func.in_directive_prologue = false;

        let mut label_id: Option<u32> = None;
        // Iteration and switch parsers patch their label site's jump
        // slots themselves; for other labelled statements the break slot
        // is patched at cleanup to land on the ENDLABEL.
        let mut label_site_patched = false;
        let mut res = Ivalue::None;

        let stmt_flags = loop {
            // Iteration statements and switch get an implicit empty label.
            let tok = self.curr_token.tok;
            if matches!(tok, Tok::For | Tok::Do | Tok::While | Tok::Switch) {
                let id = self.stmt_label_site(label_id);
                label_id = Some(id);
                self.add_label(self.wk.empty, pc_at_entry, id)?;
            }

            match self.curr_token.tok {
                Tok::Function => {
                    /*
                     *  Function declarations belong at the top level
                     *  (source elements).  As a compatibility measure
                     *  they are tolerated elsewhere in non-strict mode,
                     *  mirroring common engine behavior; strict mode
                     *  rejects them.
                     */
                    if allow_source_elem || !self.func.is_strict {
                        self.advance()?;
                        let fnum = self.parse_func_like_fnum(true, false)?;
                        if self.func.in_scanning {
                            let name = self.func.funcs[fnum as usize]
                                .template
                                .name
                                .expect("declared function has a name");
                            self.func.decls.push((name, DeclKind::Func(fnum)));
                        }
                        break 0;
                    }
                    return Err(CompileError::syntax("function declaration outside top level"));
                }
                Tok::LBrace => {
                    self.advance()?;
                    self.parse_stmts(false, false)?;
                    break 0;
                }
                Tok::Var => {
                    self.parse_var_stmt()?;
                    break HAS_TERM;
                }
                Tok::Semicolon => {
                    // Empty statement; the terminator check eats it.
                    break HAS_TERM;
                }
                Tok::If => {
                    self.parse_if_stmt()?;
                    break 0;
                }
                Tok::Do => {
                    let id = label_id.expect("iteration statement has a label site");
                    self.update_label_flags(id, LABEL_ALLOW_BREAK | LABEL_ALLOW_CONTINUE);
                    self.parse_do_stmt(pc_at_entry)?;
                    label_site_patched = true;
                    break HAS_TERM | ALLOW_AUTO_SEMI_ALWAYS;
                }
                Tok::While => {
                    let id = label_id.expect("iteration statement has a label site");
                    self.update_label_flags(id, LABEL_ALLOW_BREAK | LABEL_ALLOW_CONTINUE);
                    self.parse_while_stmt(pc_at_entry)?;
                    label_site_patched = true;
                    break 0;
                }
                Tok::For => {
                    let id = label_id.expect("iteration statement has a label site");
                    self.update_label_flags(id, LABEL_ALLOW_BREAK | LABEL_ALLOW_CONTINUE);
                    self.parse_for_stmt(pc_at_entry)?;
                    label_site_patched = true;
                    break 0;
                }
                Tok::Continue | Tok::Break => {
                    self.parse_break_or_continue_stmt()?;
                    break HAS_TERM | IS_TERMINAL;
                }
                Tok::Return => {
                    self.parse_return_stmt()?;
                    break HAS_TERM | IS_TERMINAL;
                }
                Tok::With => {
                    self.func.with_depth += 1;
                    let r = self.parse_with_stmt();
                    self.func.with_depth -= 1;
                    r?;
                    break 0;
                }
                Tok::Switch => {
                    let id = label_id.expect("switch statement has a label site");
                    // A switch catches break but never continue.
                    self.update_label_flags(id, LABEL_ALLOW_BREAK);
                    self.parse_switch_stmt(pc_at_entry)?;
                    label_site_patched = true;
                    break 0;
                }
                Tok::Throw => {
                    self.parse_throw_stmt()?;
                    break HAS_TERM | IS_TERMINAL;
                }
                Tok::Try => {
                    self.parse_try_stmt()?;
                    break 0;
                }
                Tok::Debugger => {
                    // Accepted and ignored.
                    self.advance()?;
                    break HAS_TERM;
                }
                _ => {
                    /*
                     *  ExpressionStatement, a directive, or a labelled
                     *  statement.  A single-identifier expression followed
                     *  by ':' is a label; a single-string expression in
                     *  the directive prologue is a directive.  Both are
                     *  recognized from the nud/led call counts, relying on
                     *  single-token expressions emitting no code.
                     */
                    res = self.exprtop(BP_FOR_EXPR)?;

                    let single_token = self.func.nud_count == 1 && self.func.led_count == 0;

                    if single_token
                        && self.prev_token.tok == Tok::Ident
                        && self.curr_token.tok == Tok::Colon
                    {
                        let label_name = self.prev_token.sym.expect("identifier payload");
                        self.advance()?; // eat ':'
                        let id = self.stmt_label_site(label_id);
                        label_id = Some(id);
                        self.add_label(label_name, pc_at_entry, id)?;
                        // A statement after a label is not a source
                        // element; retry with the label registered.
                        allow_source_elem = false;
                        continue;
                    }

                    let mut flags = 0;
                    if dir_prol_at_entry && single_token && self.prev_token.tok == Tok::Str {
                        flags |= STILL_PROLOGUE;
                        // Escapes are significant: a directive containing
                        // escapes is valid but never matches "use strict".
                        if self.prev_token.num_escapes == 0 {
                            let sym = self.prev_token.sym.expect("string payload");
                            if self.sym_text(sym) == "use strict" {
                                self.func.is_strict = true;
                            }
                        }
                    }

                    break flags | HAS_VAL | HAS_TERM;
                }
            }
        };

        /*
         *  Statement value: program/eval code forwards each statement's
         *  value into the implicit return register; elsewhere the value
         *  is coerced only for its side effects.
         */
        if stmt_flags & HAS_VAL != 0 {
            if let Some(reg_stmt_value) = self.func.reg_stmt_value {
                self.ivalue_to_forcedreg(&mut res, reg_stmt_value)?;
            } else {
                self.ivalue_to_plain_ignore(&mut res)?;
            }
        }

        /*
         *  Terminator check, including automatic semicolon insertion.
         */
        if stmt_flags & HAS_TERM != 0 {
            if self.curr_token.tok == Tok::Semicolon {
                self.advance()?;
            } else if self.curr_token.allow_auto_semi || stmt_flags & ALLOW_AUTO_SEMI_ALWAYS != 0 {
                // Automatic semicolon.
            } else {
                return Err(CompileError::syntax("unterminated statement"));
            }
        }

        if stmt_flags & STILL_PROLOGUE != 0 {
            self.func.in_directive_prologue = true;
        }

        // Cleanups: every statement path flows through here.
        if let Some(id) = label_id {
            if !label_site_patched {
                // A labelled non-iteration statement: a fast break lands
                // on the ENDLABEL so the label catcher is popped.
                self.patch_jump_here(Some(pc_at_entry + 1));
            }
            self.emit_op_abc(Op::EndLabel, id);
        }
        self.set_temp(temp_at_entry);
        self.reset_labels_to_length(labels_len_at_entry);
        Ok(())
    }

    /*
     *  Variable declarations
     */

    /// Parse one VariableDeclaration ("i" or "i = expr"); 'var' has been
    /// eaten.  Returns the name and its binding so for-in can reuse it as
    /// an assignment target.
    fn parse_var_decl(&mut self, expr_flags: u32) -> Result<(Sym, LhsBinding), CompileError> {
        if self.curr_token.tok != Tok::Ident {
            return Err(CompileError::syntax("invalid variable declaration"));
        }
        let name = self.curr_token.sym.expect("identifier payload");

        if self.is_eval_or_arguments_in_strict_mode(name) {
            return Err(CompileError::syntax("invalid variable declaration"));
        }

        // Declarations are collected on the scanning pass only; the
        // binding lookup below works on both passes.
        if self.func.in_scanning {
            self.func.decls.push((name, DeclKind::Var));
        }

        let binding = self.lookup_lhs(name)?;

        self.advance()?; // eat identifier

        if self.curr_token.tok == Tok::Assign {
            self.advance()?;
            let mut res = self.exprtop(BP_COMMA | expr_flags)?;
            match binding {
                LhsBinding::Register(reg) => {
                    self.ivalue_to_forcedreg(&mut res, reg)?;
                }
                LhsBinding::Slow(name_const) => {
                    let reg_val = self.ivalue_to_reg(&mut res)?;
                    self.emit_a_bc(Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE, reg_val, name_const)?;
                }
            }
        }
        Ok((name, binding))
    }

    fn parse_var_stmt(&mut self) -> Result<(), CompileError> {
        self.advance()?; // eat 'var'
        loop {
            self.parse_var_decl(0)?;
            if self.curr_token.tok != Tok::Comma {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }

    /*
     *  Iteration statements
     */

    /// for / for-in.  Four source-level variants share this parser:
    ///
    ///   1. for (ExpressionNoIn_opt; Expr_opt; Expr_opt) Statement
    ///   2. for (var VariableDeclarationNoIn; Expr_opt; Expr_opt) Statement
    ///   3. for (LeftHandSideExpression in Expression) Statement
    ///   4. for (var VariableDeclarationNoIn in Expression) Statement
    ///
    /// The variant is discovered mid-flight; for the enumeration variants
    /// a jump must be inserted into code that was already emitted, and
    /// two preallocated registers hold the enumerator and the current key
    /// across the loop body (expressions in the body never clobber them).
    fn parse_for_stmt(&mut self, pc_label_site: usize) -> Result<(), CompileError> {
        let reg_temps = self.alloc_temps(2)?;
        let temp_reset = self.get_temp();

        self.advance()?; // eat 'for'
        self.advance_expect(Tok::LParen)?;

        // Discover the variant, emitting left-hand-side code as we go.
        // For variants 3/4 the write of the iteration value to the LHS is
        // emitted here and a jump is inserted in front of it later.
        let enum_variant: Option<usize>; // Some(pc of LHS start) for 3/4

        if self.curr_token.tok == Tok::Var {
            self.advance()?; // eat 'var'
            let (_, binding) = self.parse_var_decl(EXPR_FLAG_REJECT_IN)?;
            self.set_temp(temp_reset);

            if self.curr_token.tok == Tok::In {
                // Variant 4.
                let pc_lhs = self.get_current_pc();
                match binding {
                    LhsBinding::Register(reg) => {
                        self.emit_a_bc(Op::LdReg as u32, reg, reg_temps)?;
                    }
                    LhsBinding::Slow(name_const) => {
                        self.emit_a_bc(Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE, reg_temps, name_const)?;
                    }
                }
                enum_variant = Some(pc_lhs);
            } else {
                // Variant 2; remaining declarations.
                while self.curr_token.tok == Tok::Comma {
                    self.advance()?;
                    self.parse_var_decl(EXPR_FLAG_REJECT_IN)?;
                }
                enum_variant = None;
            }
        } else {
            let pc_lhs = self.get_current_pc();
            let mut res = self.exprtop(BP_FOR_EXPR | EXPR_FLAG_REJECT_IN | EXPR_FLAG_ALLOW_EMPTY)?;
            if self.curr_token.tok == Tok::In {
                // Variant 3; the LHS must be a real expression and an
                // assignable shape.
                if self.expr_is_empty() {
                    return Err(CompileError::syntax("invalid for statement"));
                }
                match res {
                    Ivalue::Var(name) => match self.lookup_lhs(name)? {
                        LhsBinding::Register(reg) => {
                            self.emit_a_bc(Op::LdReg as u32, reg, reg_temps)?;
                        }
                        LhsBinding::Slow(name_const) => {
                            self.emit_a_bc(
                                Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE,
                                reg_temps,
                                name_const,
                            )?;
                        }
                    },
                    Ivalue::Prop { obj, key } => {
                        let reg_obj = self.ispec_to_regconst_raw(obj, None, 0)?;
                        let reg_key = self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST)?;
                        self.emit_a_b_c(Op::PutProp as u32, reg_obj, reg_key, reg_temps)?;
                    }
                    _ => {
                        self.ivalue_to_plain_ignore(&mut res)?;
                        self.emit_extraop_only(ExtraOp::InvLhs as u32)?;
                    }
                }
                enum_variant = Some(pc_lhs);
            } else {
                // Variant 1.
                self.ivalue_to_plain_ignore(&mut res)?;
                enum_variant = None;
            }
        }

        match enum_variant {
            None => {
                /*
                 *  Variants 1 and 2: the preallocated registers are not
                 *  needed, release them.
                 */
                let temp_reset = reg_temps;
                self.set_temp(temp_reset);

                self.advance_expect(Tok::Semicolon)?;

                let pc_l1 = self.get_current_pc();
                let mut res = self.exprtop(BP_FOR_EXPR | EXPR_FLAG_ALLOW_EMPTY)?;
                let (pc_jumpto_l3, pc_jumpto_l4) = if self.expr_is_empty() {
                    (Some(self.emit_jump_empty()), None)
                } else {
                    let rc_cond = self.ivalue_to_regconst(&mut res)?;
                    self.emit_if_false_skip(rc_cond)?;
                    let j3 = self.emit_jump_empty(); // to body
                    let j4 = self.emit_jump_empty(); // to exit
                    (Some(j3), Some(j4))
                };
                self.set_temp(temp_reset);

                self.advance_expect(Tok::Semicolon)?;

                let pc_l2 = self.get_current_pc();
                let mut res = self.exprtop(BP_FOR_EXPR | EXPR_FLAG_ALLOW_EMPTY)?;
                let expr_c_empty = self.expr_is_empty();
                if !expr_c_empty {
                    self.ivalue_to_plain_ignore(&mut res)?;
                    self.emit_jump_to(pc_l1);
                }
                self.set_temp(temp_reset);

                self.advance_expect(Tok::RParen)?;

                let pc_l3 = self.get_current_pc();
                self.parse_stmt(false)?;
                let continue_target = if expr_c_empty { pc_l1 } else { pc_l2 };
                self.emit_jump_to(continue_target);

                let pc_l4 = self.get_current_pc();

                self.patch_jump(pc_jumpto_l3, pc_l3);
                self.patch_jump(pc_jumpto_l4, pc_l4);
                self.patch_jump(Some(pc_label_site + 1), pc_l4); // break
                self.patch_jump(Some(pc_label_site + 2), continue_target); // continue
            }
            Some(pc_lhs) => {
                /*
                 *  Variants 3 and 4.  reg_temps+0 holds the per-iteration
                 *  key, reg_temps+1 the enumerator.  The LHS write code is
                 *  already emitted at pc_lhs; a jump over it to the
                 *  enumeration target init is inserted in front.
                 */
                self.set_temp(temp_reset);

                self.insert_jump_entry(pc_lhs);
                let pc_jumpto_l2 = pc_lhs; // the inserted jump
                let pc_l1 = pc_lhs + 1; // LHS write, right after it

                let pc_jumpto_l3 = self.emit_jump_empty(); // to loop body

                self.advance()?; // eat 'in'

                // INITENUM on null/undefined produces an empty enumerator
                // (the jump slot after NEXTENUM terminates immediately).
                // The enumeration target must be in a register.
                let pc_l2 = self.get_current_pc();
                let reg_target = self.exprtop_toreg(BP_FOR_EXPR)?;
                self.emit_extraop_b_c(ExtraOp::InitEnum as u32, reg_temps + 1, reg_target)?;
                let pc_jumpto_l4 = self.emit_jump_empty();
                self.set_temp(temp_reset);

                self.advance_expect(Tok::RParen)?;

                let pc_l3 = self.get_current_pc();
                self.parse_stmt(false)?;

                let pc_l4 = self.get_current_pc();
                self.emit_extraop_b_c(ExtraOp::NextEnum as u32, reg_temps, reg_temps + 1)?;
                let pc_jumpto_l5 = self.emit_jump_empty(); // taken when enumeration ends
                self.emit_jump_to(pc_l1);

                let pc_l5 = self.get_current_pc();

                self.patch_jump(Some(pc_jumpto_l2), pc_l2);
                self.patch_jump(Some(pc_jumpto_l3), pc_l3);
                self.patch_jump(Some(pc_jumpto_l4), pc_l4);
                self.patch_jump(Some(pc_jumpto_l5), pc_l5);
                self.patch_jump(Some(pc_label_site + 1), pc_l5); // break
                self.patch_jump(Some(pc_label_site + 2), pc_l4); // continue
            }
        }
        Ok(())
    }

    fn parse_do_stmt(&mut self, pc_label_site: usize) -> Result<(), CompileError> {
        self.advance()?; // eat 'do'

        let pc_start = self.get_current_pc();
        self.parse_stmt(false)?;
        self.patch_jump_here(Some(pc_label_site + 2)); // continue

        self.advance_expect(Tok::While)?;
        self.advance_expect(Tok::LParen)?;

        let rc_cond = self.exprtop_toregconst(BP_FOR_EXPR)?;
        self.emit_if_false_skip(rc_cond)?;
        self.emit_jump_to(pc_start);

        self.advance_expect(Tok::RParen)?;
        self.patch_jump_here(Some(pc_label_site + 1)); // break
        Ok(())
    }

    fn parse_while_stmt(&mut self, pc_label_site: usize) -> Result<(), CompileError> {
        let temp_reset = self.get_temp();

        self.advance()?; // eat 'while'
        self.advance_expect(Tok::LParen)?;

        let pc_start = self.get_current_pc();
        self.patch_jump(Some(pc_label_site + 2), pc_start); // continue

        let rc_cond = self.exprtop_toregconst(BP_FOR_EXPR)?;
        self.emit_if_true_skip(rc_cond)?;
        let pc_jump_false = self.emit_jump_empty();
        self.set_temp(temp_reset);

        self.advance_expect(Tok::RParen)?;

        self.parse_stmt(false)?;
        self.emit_jump_to(pc_start);

        self.patch_jump_here(Some(pc_jump_false));
        self.patch_jump_here(Some(pc_label_site + 1)); // break
        Ok(())
    }

    /*
     *  Conditionals
     */

    fn parse_if_stmt(&mut self) -> Result<(), CompileError> {
        let temp_reset = self.get_temp();

        self.advance()?; // eat 'if'
        self.advance_expect(Tok::LParen)?;

        let rc_cond = self.exprtop_toregconst(BP_FOR_EXPR)?;
        self.emit_if_true_skip(rc_cond)?;
        let pc_jump_false = self.emit_jump_empty();
        self.set_temp(temp_reset);

        self.advance_expect(Tok::RParen)?;

        self.parse_stmt(false)?;

        // Dangling else binds to the innermost if; greedy matching is
        // exactly right.
        if self.curr_token.tok == Tok::Else {
            self.advance()?;
            let pc_jump_end = self.emit_jump_empty();
            self.patch_jump_here(Some(pc_jump_false));
            self.parse_stmt(false)?;
            self.patch_jump_here(Some(pc_jump_end));
        } else {
            self.patch_jump_here(Some(pc_jump_false));
        }
        Ok(())
    }

    fn parse_switch_stmt(&mut self, pc_label_site: usize) -> Result<(), CompileError> {
        /*
         *  Generated in one pass: case selectors evaluate in source order
         *  chained through "previous case" miss jumps; statement lists
         *  chain through "previous statements" fall-through jumps.  The
         *  default clause may sit anywhere and becomes the final target
         *  of the miss chain.
         */
        self.advance()?; // eat 'switch'
        self.advance_expect(Tok::LParen)?;
        let rc_switch = self.exprtop_toregconst(BP_FOR_EXPR)?;
        self.advance_expect(Tok::RParen)?;
        self.advance_expect(Tok::LBrace)?;

        let temp_at_loop = self.get_temp();
        let mut pc_prevcase: Option<usize> = None;
        let mut pc_prevstmt: Option<usize> = None;
        let mut pc_default: Option<usize> = None;
        let mut have_default = false;

        loop {
            self.set_temp(temp_at_loop);

            if self.curr_token.tok == Tok::RBrace {
                break;
            }

            let mut default_pending = false;
            if self.curr_token.tok == Tok::Case {
                // Selector values are matched with strict equality; the
                // SEQ target cannot be the selector itself because it may
                // be a constant.
                self.patch_jump_here(pc_prevcase);
                self.advance()?;
                let rc_case = self.exprtop_toregconst(BP_FOR_EXPR)?;
                self.advance_expect(Tok::Colon)?;

                let reg_temp = self.alloc_temp()?;
                self.emit_a_b_c(Op::Seq as u32, reg_temp, rc_switch, rc_case)?;
                self.emit_if_true_skip(reg_temp)?;
                pc_prevcase = Some(self.emit_jump_empty()); // no match, next case
            } else if self.curr_token.tok == Tok::Default {
                if have_default {
                    return Err(CompileError::syntax("invalid switch statement"));
                }
                have_default = true;
                self.advance()?;
                self.advance_expect(Tok::Colon)?;
                default_pending = true;
            } else {
                // No code is accepted before the first case/default.
                return Err(CompileError::syntax("invalid switch statement"));
            }

            if default_pending {
                pc_default = Some(self.get_current_pc());
            }

            // Statements after the clause participate in fall-through
            // even when the default clause sits in the middle.
            self.patch_jump_here(pc_prevstmt);

            loop {
                if matches!(self.curr_token.tok, Tok::Case | Tok::Default | Tok::RBrace) {
                    break;
                }
                self.parse_stmt(false)?;
            }

            pc_prevstmt = Some(self.emit_jump_empty());
        }

        self.advance()?; // eat '}'

        // Miss chain lands on default if present, else past the switch.
        match pc_default {
            Some(pc) => self.patch_jump(pc_prevcase, pc),
            None => self.patch_jump_here(pc_prevcase),
        }
        self.patch_jump_here(pc_prevstmt);

        // The continue slot keeps its INVALID opcode: a continue can
        // never legally resolve to a switch.  Fast breaks jump to the
        // break slot which jumps here; peephole flattens the chain.
        self.patch_jump_here(Some(pc_label_site + 1));
        Ok(())
    }

    /*
     *  Abrupt completions
     */

    fn parse_break_or_continue_stmt(&mut self) -> Result<(), CompileError> {
        let is_break = self.curr_token.tok == Tok::Break;
        self.advance()?; // eat 'break'/'continue'

        let (label_id, label_catch_depth, label_pc, label_is_closest) = if self.curr_token.tok
            == Tok::Semicolon
            || self.curr_token.lineterm
            || self.curr_token.allow_auto_semi
        {
            // Unlabelled: match the innermost accepting site.
            self.lookup_active_label(self.wk.empty, is_break)?
        } else if self.curr_token.tok == Tok::Ident {
            let name = self.curr_token.sym.expect("identifier payload");
            let out = self.lookup_active_label(name, is_break)?;
            self.advance()?;
            out
        } else {
            return Err(CompileError::syntax("invalid break/continue label"));
        };

        // A fast break/continue is a plain jump into the label site's
        // jump slots.  Crossing a catch boundary needs the interpreter's
        // unwinder instead, driven by the numeric label id.
        if label_catch_depth == self.func.catch_depth && label_is_closest {
            self.emit_jump_to(label_pc + if is_break { 1 } else { 2 });
        } else {
            self.emit_op_abc(if is_break { Op::Break } else { Op::Continue }, label_id);
        }
        Ok(())
    }

    fn parse_return_stmt(&mut self) -> Result<(), CompileError> {
        self.advance()?; // eat 'return'

        if !self.func.is_function {
            return Err(CompileError::syntax("invalid return"));
        }

        let mut ret_flags = 0;
        let mut reg_val = 0;

        let empty_value = self.curr_token.tok == Tok::Semicolon
            || self.curr_token.lineterm
            || self.curr_token.allow_auto_semi;
        if !empty_value {
            let pc_before_expr = self.get_current_pc();
            reg_val = self.exprtop_toregconst(BP_FOR_EXPR)?;
            let pc_after_expr = self.get_current_pc();

            /*
             *  Tail call: when the expression ends in a CALL and no
             *  catcher is active, flip the TAILCALL bit on that CALL and
             *  skip the RETURN.  The non-standard function 'caller'
             *  property is incompatible with frame reuse, so that option
             *  disables this.
             */
            if !self.options.function_caller_property
                && self.func.catch_depth == 0
                && pc_after_expr > pc_before_expr
            {
                let last = &mut self.func.code[pc_after_expr - 1];
                let op = dec_op(last.ins);
                if op == Op::Call as u8 || op == Op::CallI as u8 {
                    last.ins |= enc_op_a_b_c(0, CALL_FLAG_TAILCALL, 0, 0);
                    return Ok(());
                }
            }

            ret_flags |= RETURN_FLAG_HAVE_RETVAL;
        }

        if self.func.catch_depth == 0 {
            // No active catcher: the interpreter can return without its
            // unwinding machinery.
            ret_flags |= RETURN_FLAG_FAST;
        }
        self.emit_a_b(Op::Return as u32, ret_flags, reg_val)
    }

    fn parse_throw_stmt(&mut self) -> Result<(), CompileError> {
        self.advance()?; // eat 'throw'

        let reg_val;
        if self.curr_token.tok == Tok::Semicolon
            || self.curr_token.lineterm
            || self.curr_token.allow_auto_semi
        {
            reg_val = self.alloc_temp()?;
            self.emit_extraop_bc(ExtraOp::LdUndef, reg_val)?;
        } else {
            reg_val = self.exprtop_toreg(BP_FOR_EXPR)?;
        }
        self.emit_extraop_b_c(ExtraOp::Throw as u32, reg_val, 0)?;
        Ok(())
    }

    /*
     *  try / catch / finally
     */

    fn parse_try_stmt(&mut self) -> Result<(), CompileError> {
        /*
         *  The try, catch, and finally parts are Blocks, always brace
         *  delimited.  TRYCATCH reserves a register pair; its two
         *  following instruction slots are jumps to the catch part and to
         *  the finally part (or past the statement when there is none).
         */
        self.func.catch_depth += 1;
        let result = self.parse_try_stmt_inner();
        self.func.catch_depth -= 1;
        result
    }

    fn parse_try_stmt_inner(&mut self) -> Result<(), CompileError> {
        self.advance()?; // eat 'try'

        let reg_catch = self.alloc_temps(2)?;

        let pc_trycatch = self.get_current_pc();
        self.emit_invalid(); // TRYCATCH, patched when the shape is known
        self.emit_invalid(); // catch jump
        self.emit_invalid(); // finally jump (or end)

        self.advance_expect(Tok::LBrace)?;
        self.parse_stmts(false, false)?; // eats '}'
        self.emit_extraop_only(ExtraOp::EndTry as u32)?;

        let mut trycatch_flags: u32 = 0;
        let mut const_varname: u32 = 0;
        let mut pc_catch = 0usize;
        let mut pc_finally = 0usize;

        if self.curr_token.tok == Tok::Catch {
            trycatch_flags |= TRYCATCH_FLAG_HAVE_CATCH;
            pc_catch = self.get_current_pc();

            self.advance()?;
            self.advance_expect(Tok::LParen)?;

            if self.curr_token.tok != Tok::Ident {
                return Err(CompileError::syntax("invalid catch variable"));
            }
            let catch_var = self.curr_token.sym.expect("identifier payload");
            if self.is_eval_or_arguments_in_strict_mode(catch_var) {
                return Err(CompileError::syntax("invalid catch variable"));
            }
            const_varname = self.get_const(Val::Str(catch_var))?;

            self.advance()?;
            self.advance_expect(Tok::RParen)?;
            self.advance_expect(Tok::LBrace)?;

            /*
             *  The catch variable lives in a fresh declarative
             *  environment record at runtime, so closures created inside
             *  the catch bind it correctly.  For the duration of the
             *  block the varmap entry is forced to the slow path, and the
             *  original binding (or its absence) is restored afterwards.
             */
            let saved_binding = self.func.varmap.get(catch_var);
            let was_present = self.func.varmap.contains(catch_var);
            self.func.varmap.insert(catch_var, VarEntry::Slow);

            self.emit_a_bc(Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE, reg_catch, const_varname)?;

            self.parse_stmts(false, false)?; // eats '}'

            if was_present {
                self.func
                    .varmap
                    .insert(catch_var, saved_binding.expect("saved catch binding"));
            } else {
                self.func.varmap.remove(catch_var);
            }

            self.emit_extraop_only(ExtraOp::EndCatch as u32)?;

            // The catch binding environment is always materialized for
            // now; the flag tells the interpreter to create it.
            trycatch_flags |= TRYCATCH_FLAG_CATCH_BINDING;
        }

        if self.curr_token.tok == Tok::Finally {
            trycatch_flags |= TRYCATCH_FLAG_HAVE_FINALLY;
            pc_finally = self.get_current_pc();

            self.advance()?;
            self.advance_expect(Tok::LBrace)?;
            self.parse_stmts(false, false)?; // eats '}'
            self.emit_extraop_b(ExtraOp::EndFin as u32, reg_catch)?; // rethrow point
        }

        if trycatch_flags & (TRYCATCH_FLAG_HAVE_CATCH | TRYCATCH_FLAG_HAVE_FINALLY) == 0 {
            return Err(CompileError::syntax("invalid try statement"));
        }

        self.patch_trycatch(pc_trycatch, reg_catch, const_varname, trycatch_flags)?;

        if trycatch_flags & TRYCATCH_FLAG_HAVE_CATCH != 0 {
            self.patch_jump(Some(pc_trycatch + 1), pc_catch);
        }
        if trycatch_flags & TRYCATCH_FLAG_HAVE_FINALLY != 0 {
            self.patch_jump(Some(pc_trycatch + 2), pc_finally);
        } else {
            // Without a finally the second slot jumps past the statement.
            self.patch_jump_here(Some(pc_trycatch + 2));
        }
        Ok(())
    }

    fn parse_with_stmt(&mut self) -> Result<(), CompileError> {
        if self.func.is_strict {
            return Err(CompileError::syntax("with statement in strict mode"));
        }

        self.advance()?; // eat 'with'

        let reg_catch = self.alloc_temps(2)?;

        self.advance_expect(Tok::LParen)?;
        let rc_target = self.exprtop_toregconst(BP_FOR_EXPR)?;
        self.advance_expect(Tok::RParen)?;

        let pc_trycatch = self.get_current_pc();
        self.emit_a_b_c(Op::TryCatch as u32, TRYCATCH_FLAG_WITH_BINDING, reg_catch, rc_target)?;
        self.emit_invalid(); // catch jump, unused
        self.emit_invalid(); // finished jump

        self.parse_stmt(false)?;
        self.emit_extraop_only(ExtraOp::EndTry as u32)?;

        let pc_finished = self.get_current_pc();
        self.patch_jump(Some(pc_trycatch + 2), pc_finished);
        Ok(())
    }
}
