use super::emit::{
    EMIT_FLAG_A_IS_SOURCE, EMIT_FLAG_B_IS_TARGET, EMIT_FLAG_NO_SHUFFLE_A, EMIT_FLAG_NO_SHUFFLE_C,
};
use super::func::{Compiler, rc_is_const};
use super::ivalue::{
    IVAL_FLAG_ALLOW_CONST, Ispec, Ivalue, LhsBinding,
};
use crate::error::CompileError;
use crate::token::Tok;
use rustc_hash::FxHashMap as FastHashMap;
use crate::val::{Sym, Val};
use crate::vm::bytecode::{CALL_FLAG_EVALCALL, ExtraOp, Op};

/*
 *  Binding powers.  Two steps apart so that right-associative operators
 *  can recurse with "own power minus one".
 */

pub(crate) const BP_INVALID: u32 = 0; // always terminates led()
pub(crate) const BP_EOF: u32 = 2;
pub(crate) const BP_CLOSING: u32 = 4; // token closes expression, e.g. ')' or ']'
pub(crate) const BP_FOR_EXPR: u32 = BP_CLOSING; // bp for a top-level Expression
pub(crate) const BP_COMMA: u32 = 6;
pub(crate) const BP_ASSIGNMENT: u32 = 8;
pub(crate) const BP_CONDITIONAL: u32 = 10;
pub(crate) const BP_LOR: u32 = 12;
pub(crate) const BP_LAND: u32 = 14;
pub(crate) const BP_BOR: u32 = 16;
pub(crate) const BP_BXOR: u32 = 18;
pub(crate) const BP_BAND: u32 = 20;
pub(crate) const BP_EQUALITY: u32 = 22;
pub(crate) const BP_RELATIONAL: u32 = 24;
pub(crate) const BP_SHIFT: u32 = 26;
pub(crate) const BP_ADDITIVE: u32 = 28;
pub(crate) const BP_MULTIPLICATIVE: u32 = 30;
pub(crate) const BP_POSTFIX: u32 = 32;
pub(crate) const BP_CALL: u32 = 34;
pub(crate) const BP_MEMBER: u32 = 36;

pub(crate) const EXPR_RBP_MASK: u32 = 0xff;
/// Reject 'in' as a relational operator (for-in header parsing).
pub(crate) const EXPR_FLAG_REJECT_IN: u32 = 1 << 8;
/// Allow the expression to be empty (e.g. optional parts of 'for').
pub(crate) const EXPR_FLAG_ALLOW_EMPTY: u32 = 1 << 9;

/// Left-binding power of a token when it appears in operator position.
/// Tokens not listed terminate the expression.
pub(crate) fn token_bp(tok: Tok) -> u32 {
    match tok {
        Tok::Eof => BP_EOF,
        Tok::RBracket | Tok::RParen => BP_CLOSING,
        Tok::Comma => BP_COMMA,
        Tok::Assign
        | Tok::AddAssign
        | Tok::SubAssign
        | Tok::MulAssign
        | Tok::DivAssign
        | Tok::ModAssign
        | Tok::AlshiftAssign
        | Tok::ArshiftAssign
        | Tok::RshiftAssign
        | Tok::BAndAssign
        | Tok::BOrAssign
        | Tok::BXorAssign => BP_ASSIGNMENT,
        Tok::Question => BP_CONDITIONAL,
        Tok::LOr => BP_LOR,
        Tok::LAnd => BP_LAND,
        Tok::BOr => BP_BOR,
        Tok::BXor => BP_BXOR,
        Tok::BAnd => BP_BAND,
        Tok::Eq | Tok::Neq | Tok::Seq | Tok::Sneq => BP_EQUALITY,
        Tok::Lt | Tok::Gt | Tok::Le | Tok::Ge | Tok::In | Tok::Instanceof => BP_RELATIONAL,
        Tok::Alshift | Tok::Arshift | Tok::Rshift => BP_SHIFT,
        Tok::Add | Tok::Sub => BP_ADDITIVE,
        Tok::Mul | Tok::Div | Tok::Mod => BP_MULTIPLICATIVE,
        Tok::Increment | Tok::Decrement => BP_POSTFIX,
        Tok::LParen => BP_CALL,
        Tok::Period | Tok::LBracket => BP_MEMBER,
        _ => BP_INVALID,
    }
}

/// Tokens after which a '/' must lex as division, not a regexp literal:
/// anything that can end an expression.
pub(crate) fn token_no_regexp(tok: Tok) -> bool {
    matches!(
        tok,
        Tok::Ident
            | Tok::This
            | Tok::Null
            | Tok::True
            | Tok::False
            | Tok::Number
            | Tok::Str
            | Tok::Regexp
            | Tok::RBrace
            | Tok::RBracket
            | Tok::RParen
    )
}

// Object literal key tracking flags for duplicate detection.
const OBJ_LIT_KEY_PLAIN: u8 = 1 << 0;
const OBJ_LIT_KEY_GET: u8 = 1 << 1;
const OBJ_LIT_KEY_SET: u8 = 1 << 2;

/// Array initializers are flushed in sets of at most this many values per
/// MPUTARR, bounding temp register pressure.
const MAX_ARRAY_INIT_VALUES: u32 = 20;
const MAX_OBJECT_INIT_PAIRS: u32 = 10;

impl<'src, 'i> Compiler<'src, 'i> {
    /// Left-binding power of the current token, with two contextual
    /// overrides: 'in' terminates when the caller disallowed it, and
    /// '++'/'--' preceded by a line terminator terminate the expression so
    /// that automatic semicolon insertion happens at postfix position.
    pub fn expr_lbp(&self) -> u32 {
        let tok = self.curr_token.tok;
        if tok == Tok::In && !self.func.allow_in {
            return 0;
        }
        if matches!(tok, Tok::Increment | Tok::Decrement) && self.curr_token.lineterm {
            return 0;
        }
        token_bp(tok)
    }

    /// Empty expressions are detected from handler counts: if neither a
    /// nud nor a led handler ran, no token was part of the expression.
    pub fn expr_is_empty(&self) -> bool {
        self.func.nud_count == 0 && self.func.led_count == 0
    }

    /// Core Pratt loop.  On entry `curr_token` is the first token of the
    /// expression; on exit it is the first token after it.
    pub fn expr(&mut self, rbp_flags: u32) -> Result<Ivalue, CompileError> {
        self.recursion_increase()?;
        let res = self.expr_inner(rbp_flags);
        self.recursion_decrease();
        res
    }

    fn expr_inner(&mut self, rbp_flags: u32) -> Result<Ivalue, CompileError> {
        let rbp = rbp_flags & EXPR_RBP_MASK;

        if matches!(self.curr_token.tok, Tok::Semicolon | Tok::RParen) {
            if rbp_flags & EXPR_FLAG_ALLOW_EMPTY == 0 {
                return Err(CompileError::syntax("empty expression not allowed"));
            }
            return Ok(Ivalue::plain_value(Val::Undef));
        }

        self.advance()?;
        let mut left = self.expr_nud()?;
        while rbp < self.expr_lbp() {
            self.advance()?;
            left = self.expr_led(left)?;
        }
        Ok(left)
    }

    /// Top-level expression entry: resets the per-expression counters.
    /// These live in the function state because expression parsing nests
    /// through inner function expressions.
    pub fn exprtop(&mut self, rbp_flags: u32) -> Result<Ivalue, CompileError> {
        self.func.nud_count = 0;
        self.func.led_count = 0;
        self.func.paren_level = 0;
        self.func.allow_in = rbp_flags & EXPR_FLAG_REJECT_IN == 0;

        let res = self.expr(rbp_flags)?;

        if rbp_flags & EXPR_FLAG_ALLOW_EMPTY == 0 && self.expr_is_empty() {
            return Err(CompileError::syntax("empty expression not allowed"));
        }
        Ok(res)
    }

    /*
     *  Combined expression + coercion helpers
     */

    pub fn expr_toreg(&mut self, rbp_flags: u32) -> Result<u32, CompileError> {
        let mut res = self.expr(rbp_flags)?;
        self.ivalue_to_reg(&mut res)
    }

    pub fn expr_toforcedreg(&mut self, rbp_flags: u32, forced_reg: u32) -> Result<u32, CompileError> {
        let mut res = self.expr(rbp_flags)?;
        self.ivalue_to_forcedreg(&mut res, forced_reg)
    }

    pub fn expr_toregconst(&mut self, rbp_flags: u32) -> Result<u32, CompileError> {
        let mut res = self.expr(rbp_flags)?;
        self.ivalue_to_regconst(&mut res)
    }

    pub fn expr_toplain(&mut self, rbp_flags: u32) -> Result<Ivalue, CompileError> {
        let mut res = self.expr(rbp_flags)?;
        self.ivalue_to_plain(&mut res)?;
        Ok(res)
    }

    pub fn expr_toplain_ignore(&mut self, rbp_flags: u32) -> Result<(), CompileError> {
        let mut res = self.expr(rbp_flags)?;
        self.ivalue_to_plain_ignore(&mut res)
    }

    pub fn exprtop_toreg(&mut self, rbp_flags: u32) -> Result<u32, CompileError> {
        let mut res = self.exprtop(rbp_flags)?;
        self.ivalue_to_reg(&mut res)
    }

    pub fn exprtop_toregconst(&mut self, rbp_flags: u32) -> Result<u32, CompileError> {
        let mut res = self.exprtop(rbp_flags)?;
        self.ivalue_to_regconst(&mut res)
    }

    /*
     *  Null denotation: prev_token begins an expression.
     */

    fn expr_nud(&mut self) -> Result<Ivalue, CompileError> {
        let temp_at_entry = self.get_temp();
        self.func.nud_count += 1;

        let tk = self.prev_token;
        match tk.tok {
            // Primary expressions
            Tok::This => {
                let reg_temp = self.alloc_temp()?;
                self.emit_extraop_b(ExtraOp::LdThis as u32 | EMIT_FLAG_B_IS_TARGET, reg_temp)?;
                Ok(Ivalue::plain_reg(reg_temp))
            }
            Tok::Ident => Ok(Ivalue::Var(tk.sym.expect("identifier payload"))),
            Tok::Null => Ok(Ivalue::plain_value(Val::Null)),
            Tok::True => Ok(Ivalue::plain_value(Val::Bool(true))),
            Tok::False => Ok(Ivalue::plain_value(Val::Bool(false))),
            Tok::Number => Ok(Ivalue::plain_value(Val::Num(tk.num))),
            Tok::Str => Ok(Ivalue::plain_value(Val::Str(tk.sym.expect("string payload")))),
            Tok::Regexp => {
                // The pattern source and flags become constants; the regexp
                // engine compiles them when the value is instantiated.
                let reg_temp = self.alloc_temp()?;
                let const_source = self.get_const(Val::Str(tk.sym.expect("regexp pattern")))?;
                let const_flags = self.get_const(Val::Str(tk.sym2.expect("regexp flags")))?;
                self.emit_a_b_c(Op::RegExp as u32, reg_temp, const_source, const_flags)?;
                Ok(Ivalue::plain_reg(reg_temp))
            }
            Tok::LBracket => self.nud_array_literal(),
            Tok::LBrace => self.nud_object_literal(),
            Tok::LParen => {
                self.func.paren_level += 1;
                let prev_allow_in = self.func.allow_in;
                self.func.allow_in = true;
                let res = self.expr(BP_FOR_EXPR)?;
                self.advance_expect(Tok::RParen)?;
                self.func.allow_in = prev_allow_in;
                self.func.paren_level -= 1;
                Ok(res)
            }

            // Member/new/call expressions
            Tok::New => {
                // Parse the constructor target at MEMBER-but-not-CALL
                // precedence so that 'new a.b.c(x)' binds the argument
                // list to the 'new', while 'new (f())' still works via
                // the parenthesized nud.
                let reg_target = self.alloc_temp()?;
                self.expr_toforcedreg(BP_CALL, reg_target)?;
                self.set_temp(reg_target + 1);
                let nargs = if self.curr_token.tok == Tok::LParen {
                    self.advance()?;
                    self.parse_arguments()?
                } else {
                    0
                };
                // Slot C carries the argument count, not an index.
                self.emit_a_b_c(
                    Op::New as u32 | EMIT_FLAG_NO_SHUFFLE_A | EMIT_FLAG_NO_SHUFFLE_C,
                    0,
                    reg_target,
                    nargs,
                )?;
                Ok(Ivalue::plain_reg(reg_target))
            }

            Tok::Function => {
                // Function expression; statements beginning with
                // 'function' never reach the expression parser.
                let reg_temp = self.alloc_temp()?;
                let fnum = self.parse_func_like_fnum(false, false)?;
                self.emit_a_bc(Op::Closure as u32, reg_temp, fnum)?;
                Ok(Ivalue::plain_reg(reg_temp))
            }

            // Unary expressions
            Tok::Delete => {
                let mut res = self.expr(BP_MULTIPLICATIVE)?;
                match res {
                    Ivalue::Var(name) => {
                        // Strict mode rejects deleting an identifier
                        // outright; non-strict DELVAR covers resolving and
                        // non-resolving names alike.
                        if self.func.is_strict {
                            return Err(CompileError::syntax("cannot delete identifier"));
                        }
                        self.set_temp(temp_at_entry);
                        let reg_temp = self.alloc_temp()?;
                        match self.lookup_lhs(name)? {
                            LhsBinding::Register(_) => {
                                // Register-bound bindings are never
                                // configurable, so the result is false.
                                self.emit_extraop_bc(ExtraOp::LdFalse, reg_temp)?;
                            }
                            LhsBinding::Slow(name_const) => {
                                self.emit_a_b(Op::DelVar as u32, reg_temp, name_const)?;
                            }
                        }
                        Ok(Ivalue::plain_reg(reg_temp))
                    }
                    Ivalue::Prop { obj, key } => {
                        self.set_temp(temp_at_entry);
                        let reg_temp = self.alloc_temp()?;
                        let reg_obj = self.ispec_to_regconst_raw(obj, None, 0)?;
                        let reg_key = self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST)?;
                        self.emit_a_b_c(Op::DelProp as u32, reg_temp, reg_obj, reg_key)?;
                        Ok(Ivalue::plain_reg(reg_temp))
                    }
                    _ => {
                        // Deleting a non-Reference is true even in strict
                        // mode; still evaluate for side effects.
                        self.ivalue_to_plain_ignore(&mut res)?;
                        Ok(Ivalue::plain_value(Val::Bool(true)))
                    }
                }
            }
            Tok::Void => {
                self.expr_toplain_ignore(BP_MULTIPLICATIVE)?;
                Ok(Ivalue::plain_value(Val::Undef))
            }
            Tok::Typeof => {
                let res = self.expr(BP_MULTIPLICATIVE)?;
                if let Ivalue::Var(name) = &res {
                    let name = *name;
                    if let LhsBinding::Slow(name_const) = self.lookup_lhs(name)? {
                        // typeof must not throw for unresolvable names, so
                        // slow path identifiers get a dedicated opcode.
                        let tr = self.alloc_temp()?;
                        self.emit_extraop_b_c(
                            ExtraOp::TypeofId as u32 | EMIT_FLAG_B_IS_TARGET,
                            tr,
                            name_const,
                        )?;
                        return Ok(Ivalue::plain_reg(tr));
                    }
                }
                self.nud_unary_extraop(res, ExtraOp::Typeof)
            }
            Tok::Increment => self.nud_preincdec(ExtraOp::Inc),
            Tok::Decrement => self.nud_preincdec(ExtraOp::Dec),
            Tok::Add => {
                // Unary plus of a number literal is the identity.
                let res = self.expr(BP_MULTIPLICATIVE)?;
                if matches!(res, Ivalue::Plain(Ispec::Value(Val::Num(_)))) {
                    Ok(res)
                } else {
                    self.nud_unary_extraop(res, ExtraOp::Unp)
                }
            }
            Tok::Sub => {
                // Negative literals are not part of the lexical grammar;
                // folding here produces them.
                let res = self.expr(BP_MULTIPLICATIVE)?;
                if let Ivalue::Plain(Ispec::Value(Val::Num(n))) = res {
                    Ok(Ivalue::plain_value(Val::Num(-n)))
                } else {
                    self.nud_unary_extraop(res, ExtraOp::Unm)
                }
            }
            Tok::BNot => {
                let res = self.expr(BP_MULTIPLICATIVE)?;
                self.nud_unary(res, Op::BNot)
            }
            Tok::LNot => {
                let res = self.expr(BP_MULTIPLICATIVE)?;
                self.nud_unary(res, Op::LNot)
            }

            _ => Err(CompileError::syntax(format!(
                "unexpected token in expression: {:?}",
                tk.tok
            ))),
        }
    }

    /// Unary operator sharing: coerce to a mutable temp so that "!x" does
    /// not clobber a register-bound x, and operate in place.
    fn nud_unary(&mut self, mut res: Ivalue, op: Op) -> Result<Ivalue, CompileError> {
        let tr = self.ivalue_to_tempreg(&mut res)?;
        self.emit_a_b(op as u32, tr, tr)?;
        Ok(Ivalue::plain_reg(tr))
    }

    fn nud_unary_extraop(&mut self, mut res: Ivalue, xop: ExtraOp) -> Result<Ivalue, CompileError> {
        let tr = self.ivalue_to_tempreg(&mut res)?;
        self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, tr, tr)?;
        Ok(Ivalue::plain_reg(tr))
    }

    /// Prefix increment/decrement.
    fn nud_preincdec(&mut self, xop: ExtraOp) -> Result<Ivalue, CompileError> {
        let reg_res = self.alloc_temp()?;
        let mut res = self.expr(BP_MULTIPLICATIVE)?;
        match res {
            Ivalue::Var(name) => {
                if self.is_eval_or_arguments_in_strict_mode(name) {
                    return Err(CompileError::syntax("invalid increment/decrement operand"));
                }
                match self.lookup_lhs(name)? {
                    LhsBinding::Register(reg_varbind) => {
                        self.emit_extraop_b_c(
                            xop as u32 | EMIT_FLAG_B_IS_TARGET,
                            reg_varbind,
                            reg_varbind,
                        )?;
                        self.emit_a_bc(Op::LdReg as u32, reg_res, reg_varbind)?;
                    }
                    LhsBinding::Slow(name_const) => {
                        self.emit_a_bc(Op::GetVar as u32, reg_res, name_const)?;
                        self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                        self.emit_a_bc(
                            Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE,
                            reg_res,
                            name_const,
                        )?;
                    }
                }
            }
            Ivalue::Prop { obj, key } => {
                let reg_obj = self.ispec_to_regconst_raw(obj, None, 0)?;
                let reg_key = self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST)?;
                self.emit_a_b_c(Op::GetProp as u32, reg_res, reg_obj, reg_key)?;
                self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                self.emit_a_b_c(Op::PutProp as u32, reg_obj, reg_key, reg_res)?;
            }
            _ => {
                // INVLHS throws unconditionally, but the coercion must
                // still happen for its side effects.
                self.ivalue_to_forcedreg(&mut res, reg_res)?;
                self.emit_extraop_b_c(ExtraOp::ToNum as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                self.emit_extraop_only(ExtraOp::InvLhs as u32)?;
            }
        }
        self.set_temp(reg_res + 1);
        Ok(Ivalue::plain_reg(reg_res))
    }

    /*
     *  Left denotation: prev_token continues an expression.
     */

    fn expr_led(&mut self, mut left: Ivalue) -> Result<Ivalue, CompileError> {
        self.func.led_count += 1;

        let tok = self.prev_token.tok;
        match tok {
            Tok::Period => {
                self.ivalue_to_plain(&mut left)?;
                // Reserved words are valid property names.
                if self.curr_token.tok_nores != Tok::Ident {
                    return Err(CompileError::syntax("expecting identifier name"));
                }
                let key = self.curr_token.sym.expect("identifier payload");
                let obj = self.plain_spec(left)?;
                // A '/' after an IdentifierName is division ("a.in / b").
                self.func.reject_regexp_in_adv = true;
                self.advance()?;
                Ok(Ivalue::Prop {
                    obj,
                    key: Ispec::Value(Val::Str(key)),
                })
            }
            Tok::LBracket => {
                self.ivalue_to_plain(&mut left)?;
                let res = self.expr_toplain(BP_FOR_EXPR)?;
                self.advance_expect(Tok::RBracket)?;
                Ok(Ivalue::Prop {
                    obj: self.plain_spec(left)?,
                    key: self.plain_spec(res)?,
                })
            }
            Tok::LParen => self.led_call(left),
            Tok::Increment => self.led_postincdec(left, ExtraOp::Inc),
            Tok::Decrement => self.led_postincdec(left, ExtraOp::Dec),

            Tok::Mul => self.led_binary(left, Op::Mul, BP_MULTIPLICATIVE),
            Tok::Div => self.led_binary(left, Op::Div, BP_MULTIPLICATIVE),
            Tok::Mod => self.led_binary(left, Op::Mod, BP_MULTIPLICATIVE),
            Tok::Add => self.led_binary(left, Op::Add, BP_ADDITIVE),
            Tok::Sub => self.led_binary(left, Op::Sub, BP_ADDITIVE),
            Tok::Alshift => self.led_binary(left, Op::Basl, BP_SHIFT),
            Tok::Arshift => self.led_binary(left, Op::Basr, BP_SHIFT),
            Tok::Rshift => self.led_binary(left, Op::Blsr, BP_SHIFT),
            Tok::Lt => self.led_binary(left, Op::Lt, BP_RELATIONAL),
            Tok::Gt => self.led_binary(left, Op::Gt, BP_RELATIONAL),
            Tok::Le => self.led_binary(left, Op::Le, BP_RELATIONAL),
            Tok::Ge => self.led_binary(left, Op::Ge, BP_RELATIONAL),
            Tok::Instanceof => self.led_binary(left, Op::InstOf, BP_RELATIONAL),
            Tok::In => self.led_binary(left, Op::In, BP_RELATIONAL),
            Tok::Eq => self.led_binary(left, Op::Eq, BP_EQUALITY),
            Tok::Neq => self.led_binary(left, Op::Neq, BP_EQUALITY),
            Tok::Seq => self.led_binary(left, Op::Seq, BP_EQUALITY),
            Tok::Sneq => self.led_binary(left, Op::Sneq, BP_EQUALITY),
            Tok::BAnd => self.led_binary(left, Op::BAnd, BP_BAND),
            Tok::BXor => self.led_binary(left, Op::BXor, BP_BXOR),
            Tok::BOr => self.led_binary(left, Op::BOr, BP_BOR),

            // Logical AND/OR compile as right-associative so one skip
            // jump covers the whole tail.
            Tok::LAnd => self.led_binary_logical(left, true, BP_LAND - 1),
            Tok::LOr => self.led_binary_logical(left, false, BP_LOR - 1),

            Tok::Question => {
                let reg_temp = self.alloc_temp()?;
                self.ivalue_to_forcedreg(&mut left, reg_temp)?;
                self.emit_if_true_skip(reg_temp)?;
                let pc_jump1 = self.emit_jump_empty();
                self.expr_toforcedreg(BP_COMMA, reg_temp)?;
                self.advance_expect(Tok::Colon)?;
                let pc_jump2 = self.emit_jump_empty();
                self.patch_jump_here(Some(pc_jump1));
                self.expr_toforcedreg(BP_COMMA, reg_temp)?;
                self.patch_jump_here(Some(pc_jump2));
                self.set_temp(reg_temp + 1);
                Ok(Ivalue::plain_reg(reg_temp))
            }

            // Assignment is right-associative: rbp is own power minus one.
            Tok::Assign => self.led_assign(left, None),
            Tok::AddAssign => self.led_assign(left, Some(Op::Add)),
            Tok::SubAssign => self.led_assign(left, Some(Op::Sub)),
            Tok::MulAssign => self.led_assign(left, Some(Op::Mul)),
            Tok::DivAssign => self.led_assign(left, Some(Op::Div)),
            Tok::ModAssign => self.led_assign(left, Some(Op::Mod)),
            Tok::AlshiftAssign => self.led_assign(left, Some(Op::Basl)),
            Tok::ArshiftAssign => self.led_assign(left, Some(Op::Basr)),
            Tok::RshiftAssign => self.led_assign(left, Some(Op::Blsr)),
            Tok::BAndAssign => self.led_assign(left, Some(Op::BAnd)),
            Tok::BOrAssign => self.led_assign(left, Some(Op::BOr)),
            Tok::BXorAssign => self.led_assign(left, Some(Op::BXor)),

            Tok::Comma => {
                // Evaluate-and-discard the left side; the right side is
                // the expression value.  Right-associative.
                self.ivalue_to_plain_ignore(&mut left)?;
                self.expr_toplain(BP_COMMA - 1)
            }

            _ => Err(CompileError::syntax(format!(
                "unexpected operator token: {:?}",
                tok
            ))),
        }
    }

    fn plain_spec(&self, v: Ivalue) -> Result<Ispec, CompileError> {
        match v {
            Ivalue::Plain(spec) => Ok(spec),
            _ => Err(CompileError::internal("expected plain intermediate value")),
        }
    }

    fn led_binary(&mut self, mut left: Ivalue, op: Op, rbp: u32) -> Result<Ivalue, CompileError> {
        self.ivalue_to_plain(&mut left)?;
        let right = self.expr_toplain(rbp)?;
        Ok(Ivalue::Arith {
            op,
            left: self.plain_spec(left)?,
            right: self.plain_spec(right)?,
        })
    }

    /// Shared handling for '&&' and '||'.  The left value lands in a temp;
    /// a conditional skip either falls into the right-hand side (which
    /// overwrites the same temp) or jumps past it, keeping the left value.
    fn led_binary_logical(
        &mut self,
        mut left: Ivalue,
        truthval: bool,
        rbp: u32,
    ) -> Result<Ivalue, CompileError> {
        let reg_temp = self.alloc_temp()?;
        self.ivalue_to_forcedreg(&mut left, reg_temp)?;
        self.emit_a_b(Op::If as u32, truthval as u32, reg_temp)?;
        let pc_jump = self.emit_jump_empty();
        self.expr_toforcedreg(rbp, reg_temp)?;
        self.patch_jump_here(Some(pc_jump));
        Ok(Ivalue::plain_reg(reg_temp))
    }

    /// Assignment.  `op` is the compound arithmetic opcode, or None for a
    /// plain assignment.  Invalid left-hand sides are not syntax errors:
    /// both sides still evaluate and INVLHS raises at runtime.
    fn led_assign(&mut self, mut left: Ivalue, op: Option<Op>) -> Result<Ivalue, CompileError> {
        let rbp = BP_ASSIGNMENT - 1;
        match left {
            Ivalue::Var(name) => {
                let mut res = self.expr(rbp)?;
                let reg_rhs = self.ivalue_to_reg(&mut res)?;

                if self.is_eval_or_arguments_in_strict_mode(name) {
                    return Err(CompileError::syntax("invalid assignment target"));
                }

                let binding = self.lookup_lhs(name)?;
                let mut reg_res = match (op, binding) {
                    (None, _) => reg_rhs,
                    (Some(op), LhsBinding::Register(reg_varbind)) => {
                        let reg_temp = self.alloc_temp()?;
                        self.emit_a_b_c(op as u32, reg_temp, reg_varbind, reg_rhs)?;
                        reg_temp
                    }
                    (Some(op), LhsBinding::Slow(name_const)) => {
                        let reg_temp = self.alloc_temp()?;
                        self.emit_a_bc(Op::GetVar as u32, reg_temp, name_const)?;
                        self.emit_a_b_c(op as u32, reg_temp, reg_temp, reg_rhs)?;
                        reg_temp
                    }
                };

                match binding {
                    LhsBinding::Register(reg_varbind) => {
                        self.emit_a_bc(Op::LdReg as u32, reg_varbind, reg_res)?;
                    }
                    LhsBinding::Slow(name_const) => {
                        // Slot A of PUTVAR only takes a register.
                        if rc_is_const(reg_res) {
                            let reg_temp = self.alloc_temp()?;
                            self.emit_a_bc(Op::LdConst as u32, reg_temp, reg_res)?;
                            reg_res = reg_temp;
                        }
                        self.emit_a_bc(Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE, reg_res, name_const)?;
                    }
                }
                Ok(Ivalue::plain_reg(reg_res))
            }
            Ivalue::Prop { obj, key } => {
                let mut res = self.expr(rbp)?;
                let rc_rhs = self.ivalue_to_regconst(&mut res)?;

                // The object goes into slot A of PUTPROP, so a constant is
                // not acceptable even for literals.
                let reg_obj = self.ispec_to_regconst_raw(obj, None, 0)?;
                let reg_key = self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST)?;

                let reg_res = match op {
                    None => rc_rhs,
                    Some(op) => {
                        let reg_temp = self.alloc_temp()?;
                        self.emit_a_b_c(Op::GetProp as u32, reg_temp, reg_obj, reg_key)?;
                        self.emit_a_b_c(op as u32, reg_temp, reg_temp, rc_rhs)?;
                        reg_temp
                    }
                };
                self.emit_a_b_c(Op::PutProp as u32, reg_obj, reg_key, reg_res)?;
                Ok(Ivalue::plain_reg(reg_res))
            }
            _ => {
                // E.g. "f() = g()": evaluate left, then right, then raise.
                self.ivalue_to_plain_ignore(&mut left)?;
                let mut res = self.expr(rbp)?;
                let reg_res = self.ivalue_to_regconst(&mut res)?;
                self.emit_extraop_only(ExtraOp::InvLhs as u32)?;
                Ok(Ivalue::plain_reg(reg_res))
            }
        }
    }

    /// Postfix increment/decrement: the result is the ToNumber-coerced old
    /// value, so the old value is read into the result register first.
    fn led_postincdec(&mut self, mut left: Ivalue, xop: ExtraOp) -> Result<Ivalue, CompileError> {
        let reg_res = self.alloc_temp()?;
        match left {
            Ivalue::Var(name) => {
                if self.is_eval_or_arguments_in_strict_mode(name) {
                    return Err(CompileError::syntax("invalid increment/decrement operand"));
                }
                match self.lookup_lhs(name)? {
                    LhsBinding::Register(reg_varbind) => {
                        self.emit_a_bc(Op::LdReg as u32, reg_res, reg_varbind)?;
                        self.emit_extraop_b_c(ExtraOp::ToNum as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                        self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, reg_varbind, reg_res)?;
                    }
                    LhsBinding::Slow(name_const) => {
                        let reg_temp = self.alloc_temp()?;
                        self.emit_a_bc(Op::GetVar as u32, reg_res, name_const)?;
                        self.emit_extraop_b_c(ExtraOp::ToNum as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                        self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, reg_temp, reg_res)?;
                        self.emit_a_bc(Op::PutVar as u32 | EMIT_FLAG_A_IS_SOURCE, reg_temp, name_const)?;
                    }
                }
            }
            Ivalue::Prop { obj, key } => {
                let reg_temp = self.alloc_temp()?;
                let reg_obj = self.ispec_to_regconst_raw(obj, None, 0)?;
                let reg_key = self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST)?;
                self.emit_a_b_c(Op::GetProp as u32, reg_res, reg_obj, reg_key)?;
                self.emit_extraop_b_c(ExtraOp::ToNum as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                self.emit_extraop_b_c(xop as u32 | EMIT_FLAG_B_IS_TARGET, reg_temp, reg_res)?;
                self.emit_a_b_c(Op::PutProp as u32, reg_obj, reg_key, reg_temp)?;
            }
            _ => {
                self.ivalue_to_forcedreg(&mut left, reg_res)?;
                self.emit_extraop_b_c(ExtraOp::ToNum as u32 | EMIT_FLAG_B_IS_TARGET, reg_res, reg_res)?;
                self.emit_extraop_only(ExtraOp::InvLhs as u32)?;
            }
        }
        self.set_temp(reg_res + 1);
        Ok(Ivalue::plain_reg(reg_res))
    }

    /// Function call.  The call setup materializes the target and its
    /// 'this' binding into two consecutive temps; arguments follow in the
    /// next temps; the result replaces the setup pair.
    fn led_call(&mut self, mut left: Ivalue) -> Result<Ivalue, CompileError> {
        let reg_cs = self.alloc_temps(2)?;
        let mut call_flags: u32 = 0;

        match left {
            Ivalue::Var(name) => {
                if name == self.wk.eval {
                    // Potential direct eval: the interpreter decides at
                    // runtime whether the callee really is the built-in.
                    call_flags |= CALL_FLAG_EVALCALL;
                    self.func.may_direct_eval = true;
                }
                match self.lookup_lhs(name)? {
                    LhsBinding::Register(reg_varbind) => {
                        self.emit_a_b(Op::CsReg as u32, reg_cs, reg_varbind)?;
                    }
                    LhsBinding::Slow(name_const) => {
                        self.emit_a_b(Op::CsVar as u32, reg_cs, name_const)?;
                    }
                }
            }
            Ivalue::Prop { obj, key } => {
                self.ispec_to_forcedreg(obj, reg_cs)?;
                self.ispec_to_forcedreg(key, reg_cs + 1)?;
                self.emit_a_b_c(Op::CsProp as u32, reg_cs, reg_cs, reg_cs + 1)?;
            }
            _ => {
                self.ivalue_to_forcedreg(&mut left, reg_cs)?;
                self.emit_a_b(Op::CsReg as u32, reg_cs, reg_cs)?;
            }
        }

        self.set_temp(reg_cs + 2);
        let nargs = self.parse_arguments()?;

        // A carries call flags and C the argument count; neither is an
        // index, so neither may be shuffled.  A tail call back-patch may
        // later set the TAILCALL bit on this very instruction.
        self.emit_a_b_c(
            Op::Call as u32 | EMIT_FLAG_NO_SHUFFLE_A | EMIT_FLAG_NO_SHUFFLE_C,
            call_flags,
            reg_cs,
            nargs,
        )?;
        self.set_temp(reg_cs + 1);
        Ok(Ivalue::plain_reg(reg_cs))
    }

    /// Parse a parenthesized argument list into consecutive temps starting
    /// at "next temp".  The left paren is already eaten; eats the right
    /// paren.  Returns the argument count.
    pub fn parse_arguments(&mut self) -> Result<u32, CompileError> {
        let mut nargs: u32 = 0;
        loop {
            if self.curr_token.tok == Tok::RParen {
                break;
            }
            if nargs > 0 {
                self.advance_expect(Tok::Comma)?;
            }
            // Arguments must land exactly in the next temp; the forced
            // register makes sure of it even when the expression result
            // would naturally live elsewhere.
            let tr = self.alloc_temp()?;
            self.set_temp(tr);
            self.expr_toforcedreg(BP_COMMA, tr)?;
            self.set_temp(tr + 1);
            nargs += 1;
        }
        self.advance_expect(Tok::RParen)?;
        Ok(nargs)
    }

    /*
     *  Array and object literals
     */

    fn nud_array_literal(&mut self) -> Result<Ivalue, CompileError> {
        debug_assert_eq!(self.prev_token.tok, Tok::LBracket);

        let reg_obj = self.alloc_temp()?;
        self.emit_extraop_b_c(ExtraOp::NewArr as u32 | EMIT_FLAG_B_IS_TARGET, reg_obj, 0)?;
        let temp_start = self.get_temp();

        // Initializers are flushed in bounded sets.  Elided elements are
        // never written (an undefined value would be enumerable, which is
        // wrong); trailing elisions only adjust the final length.
        let mut curr_idx: u32 = 0;
        let mut init_idx: u32 = 0;
        let mut require_comma = false;

        'outer: loop {
            let mut num_values: u32 = 0;
            let mut start_idx: u32 = 0;
            self.set_temp(temp_start);

            if self.curr_token.tok == Tok::RBracket {
                break;
            }

            loop {
                if self.curr_token.tok == Tok::RBracket {
                    break;
                }

                if require_comma {
                    if self.curr_token.tok == Tok::Comma {
                        self.advance()?;
                        require_comma = false;
                        continue;
                    }
                    return Err(CompileError::syntax("invalid array literal"));
                } else if self.curr_token.tok == Tok::Comma {
                    // Elision; flush the current set.
                    curr_idx += 1;
                    self.advance()?;
                    if num_values > 0 {
                        break;
                    }
                    continue;
                }

                if num_values == 0 {
                    start_idx = curr_idx;
                    let reg_temp = self.alloc_temp()?;
                    self.emit_loadint(reg_temp, start_idx as i32)?;
                }

                let reg_temp = self.alloc_temp()?;
                self.set_temp(reg_temp);
                self.expr_toforcedreg(BP_COMMA, reg_temp)?;
                self.set_temp(reg_temp + 1);

                num_values += 1;
                curr_idx += 1;
                require_comma = true;

                if num_values >= MAX_ARRAY_INIT_VALUES {
                    break;
                }
            }

            if num_values > 0 {
                // A identifies the array (a source, shuffleable); B names
                // a register range and uses the indirect variant instead
                // of shuffling; C is a plain count.
                self.emit_a_b_c(
                    Op::MPutArr as u32 | EMIT_FLAG_NO_SHUFFLE_C | EMIT_FLAG_A_IS_SOURCE,
                    reg_obj,
                    temp_start,
                    num_values,
                )?;
                init_idx = start_idx + num_values;
            }

            if self.curr_token.tok == Tok::RBracket {
                break 'outer;
            }
        }

        self.advance_expect(Tok::RBracket)?;

        if curr_idx > init_idx {
            // Trailing elisions: set the length explicitly.
            let reg_temp = self.alloc_temp()?;
            self.emit_loadint(reg_temp, curr_idx as i32)?;
            self.emit_extraop_b_c(ExtraOp::SetALen as u32, reg_obj, reg_temp)?;
        }

        self.set_temp(temp_start);
        Ok(Ivalue::plain_reg(reg_obj))
    }

    /// Duplicate/conflicting key checks per E5 Section 11.1.5 step 4.
    fn object_literal_key_check(
        &mut self,
        seen: &mut FastHashMap<Sym, u8>,
        key: Sym,
        new_key_flags: u8,
    ) -> Result<(), CompileError> {
        let key_flags = seen.get(&key).copied().unwrap_or(0);

        if new_key_flags & OBJ_LIT_KEY_PLAIN != 0 {
            if key_flags & OBJ_LIT_KEY_PLAIN != 0 && self.func.is_strict {
                return Err(CompileError::syntax("duplicate key in object literal"));
            }
            if key_flags & (OBJ_LIT_KEY_GET | OBJ_LIT_KEY_SET) != 0 {
                return Err(CompileError::syntax("duplicate key in object literal"));
            }
        } else {
            if key_flags & OBJ_LIT_KEY_PLAIN != 0 {
                return Err(CompileError::syntax("duplicate key in object literal"));
            }
            if key_flags & new_key_flags != 0 {
                return Err(CompileError::syntax("duplicate key in object literal"));
            }
        }

        seen.insert(key, key_flags | new_key_flags);
        Ok(())
    }

    fn nud_object_literal(&mut self) -> Result<Ivalue, CompileError> {
        debug_assert_eq!(self.prev_token.tok, Tok::LBrace);

        let reg_obj = self.alloc_temp()?;
        self.emit_extraop_b_c(ExtraOp::NewObj as u32 | EMIT_FLAG_B_IS_TARGET, reg_obj, 0)?;
        let temp_start = self.get_temp();

        let mut seen: FastHashMap<Sym, u8> = FastHashMap::default();
        let mut first = true;

        'outer: loop {
            let mut num_pairs: u32 = 0;
            self.set_temp(temp_start);

            if self.curr_token.tok == Tok::RBrace {
                break;
            }

            loop {
                /*
                 *  Three element formats:
                 *    1) PropertyName : AssignmentExpression
                 *    2) get PropertyName() { FunctionBody }
                 *    3) set PropertyName(arg) { FunctionBody }
                 *
                 *  PropertyName is an IdentifierName (reserved words
                 *  included), a string, or a number.  'get'/'set' lex as
                 *  plain identifiers, so one token of lookahead separates
                 *  "{ get: 1 }" from "{ get foo() {} }".
                 */
                if self.curr_token.tok == Tok::RBrace {
                    break;
                }
                if num_pairs >= MAX_OBJECT_INIT_PAIRS {
                    break;
                }

                if first {
                    first = false;
                } else {
                    if self.curr_token.tok != Tok::Comma {
                        return Err(CompileError::syntax("invalid object literal"));
                    }
                    self.advance()?;
                    if self.curr_token.tok == Tok::RBrace {
                        // Trailing comma.
                        break;
                    }
                }

                // Step past the key candidate for one token of lookahead.
                self.advance()?;

                let prev = self.prev_token;
                let is_get = prev.tok == Tok::Ident && prev.sym == Some(self.wk.get);
                let is_set = prev.tok == Tok::Ident && prev.sym == Some(self.wk.set);

                if (is_get || is_set) && self.curr_token.tok != Tok::Colon {
                    // Getter/setter terminates the current value set.
                    let key = self.object_literal_key_sym(self.curr_token)?;
                    self.object_literal_key_check(
                        &mut seen,
                        key,
                        if is_get { OBJ_LIT_KEY_GET } else { OBJ_LIT_KEY_SET },
                    )?;
                    let reg_key = self.get_const(Val::Str(key))?;

                    if num_pairs > 0 {
                        self.emit_a_b_c(
                            Op::MPutObj as u32 | EMIT_FLAG_NO_SHUFFLE_C | EMIT_FLAG_A_IS_SOURCE,
                            reg_obj,
                            temp_start,
                            num_pairs,
                        )?;
                        num_pairs = 0;
                        self.set_temp(temp_start);
                    }

                    let fnum = self.parse_func_like_fnum(false, true)?;

                    debug_assert_eq!(self.get_temp(), temp_start);
                    let reg_temp = self.alloc_temp()?;
                    self.emit_a_bc(Op::LdConst as u32, reg_temp, reg_key)?;
                    let reg_temp = self.alloc_temp()?;
                    self.emit_a_bc(Op::Closure as u32, reg_temp, fnum)?;

                    // C names the key/closure register pair.
                    self.emit_extraop_b_c(
                        if is_get { ExtraOp::InitGet as u32 } else { ExtraOp::InitSet as u32 },
                        reg_obj,
                        temp_start,
                    )?;
                    self.set_temp(temp_start);
                } else {
                    // Plain key/value.
                    let key = self.object_literal_key_sym(prev)?;
                    self.object_literal_key_check(&mut seen, key, OBJ_LIT_KEY_PLAIN)?;
                    let reg_key = self.get_const(Val::Str(key))?;

                    let reg_temp = self.alloc_temp()?;
                    self.emit_a_bc(Op::LdConst as u32, reg_temp, reg_key)?;
                    self.advance_expect(Tok::Colon)?;

                    let reg_temp = self.alloc_temp()?;
                    self.set_temp(reg_temp);
                    self.expr_toforcedreg(BP_COMMA, reg_temp)?;
                    self.set_temp(reg_temp + 1);

                    num_pairs += 1;
                }
            }

            if num_pairs > 0 {
                self.emit_a_b_c(
                    Op::MPutObj as u32 | EMIT_FLAG_NO_SHUFFLE_C | EMIT_FLAG_A_IS_SOURCE,
                    reg_obj,
                    temp_start,
                    num_pairs,
                )?;
            }

            if self.curr_token.tok == Tok::RBrace {
                break 'outer;
            }
        }

        self.advance_expect(Tok::RBrace)?;
        self.set_temp(temp_start);
        Ok(Ivalue::plain_reg(reg_obj))
    }

    /// Coerce an object literal key token to its string form.  Numeric
    /// keys become string constants at compile time ("{1: 'x'}" keys "1").
    fn object_literal_key_sym(&mut self, tk: crate::token::Token) -> Result<Sym, CompileError> {
        if tk.tok_nores == Tok::Ident || tk.tok_nores == Tok::Str {
            Ok(tk.sym.expect("key payload"))
        } else if tk.tok == Tok::Number {
            let text = crate::val::number_to_key_string(tk.num);
            Ok(self.interner.intern(&text))
        } else {
            Err(CompileError::syntax("invalid object literal key"))
        }
    }
}
