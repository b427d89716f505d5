use super::func::{Compiler, rc_is_const};
use crate::error::CompileError;
use crate::val::{Sym, Val};
use crate::vm::bytecode::{ExtraOp, Op};

// Flags for intermediate value materialization.
/// The result may be a constant pool index.
pub(crate) const IVAL_FLAG_ALLOW_CONST: u32 = 1 << 0;
/// The result register must be a freely mutable temp, never a register
/// holding a named binding.
pub(crate) const IVAL_FLAG_REQUIRE_TEMP: u32 = 1 << 1;
/// The result must fit the 8-bit B/C slot.  Oversized operands are fixed
/// up by the emitter's shuffle protocol, so this is advisory.
pub(crate) const IVAL_FLAG_REQUIRE_SHORT: u32 = 1 << 2;

/// A value or a register/constant reference; the leaf of the deferred
/// expression representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Ispec {
    Value(Val),
    RegConst(u32),
}

impl Default for Ispec {
    fn default() -> Self {
        Ispec::Value(Val::Undef)
    }
}

/// Deferred result of parsing an expression.  Nothing is materialized
/// until a coercion forces it, which lets the compiler fold literal
/// arithmetic, collapse register-bound variable reads, and choose result
/// registers late.
#[derive(Debug, Clone, Default)]
pub(crate) enum Ivalue {
    #[default]
    None,
    Plain(Ispec),
    /// A pending binary operation.
    Arith { op: Op, left: Ispec, right: Ispec },
    /// A pending property access (`obj[key]`).
    Prop { obj: Ispec, key: Ispec },
    /// A pending identifier access, not yet resolved to a register or a
    /// slow path lookup.
    Var(Sym),
}

impl Ivalue {
    pub fn plain_reg(reg: u32) -> Ivalue {
        Ivalue::Plain(Ispec::RegConst(reg))
    }

    pub fn plain_value(v: Val) -> Ivalue {
        Ivalue::Plain(Ispec::Value(v))
    }
}

/// How an identifier resolved at compile time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LhsBinding {
    /// Bound to a frame register.
    Register(u32),
    /// Slow path through the environment chain; carries the name constant.
    Slow(u32),
}

fn whole_i32(x: f64) -> Option<i32> {
    // Zero is deliberately excluded: LDINT cannot represent negative zero,
    // so both zeros go through the constant pool where SameValue keeps
    // them apart.
    if x.classify() != std::num::FpCategory::Normal {
        return None;
    }
    let t = x as i32;
    if t as f64 == x { Some(t) } else { None }
}

impl<'src, 'i> Compiler<'src, 'i> {
    /// Materialize an ispec into a register or (if allowed) a constant,
    /// emitting the load code as needed.
    pub fn ispec_to_regconst_raw(
        &mut self,
        x: Ispec,
        forced_reg: Option<u32>,
        flags: u32,
    ) -> Result<u32, CompileError> {
        match x {
            Ispec::Value(v) => match v {
                // There is no 'undefined' literal but undefined values
                // arise during compilation, e.g. from 'void'.
                Val::Undef => {
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_extraop_bc(ExtraOp::LdUndef, dest)?;
                    Ok(dest)
                }
                Val::Null => {
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_extraop_bc(ExtraOp::LdNull, dest)?;
                    Ok(dest)
                }
                Val::Bool(b) => {
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_extraop_bc(if b { ExtraOp::LdTrue } else { ExtraOp::LdFalse }, dest)?;
                    Ok(dest)
                }
                Val::Num(n) => {
                    if flags & IVAL_FLAG_ALLOW_CONST == 0 {
                        // LDINT(+LDINTX) is preferred over a constant when
                        // the caller needs a register anyway.
                        if let Some(ival) = whole_i32(n) {
                            let dest = match forced_reg {
                                Some(r) => r,
                                None => self.alloc_temp()?,
                            };
                            self.emit_loadint(dest, ival)?;
                            return Ok(dest);
                        }
                    }
                    let constidx = self.get_const(Val::Num(n))?;
                    if flags & IVAL_FLAG_ALLOW_CONST != 0 {
                        return Ok(constidx);
                    }
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_a_bc(Op::LdConst as u32, dest, constidx)?;
                    Ok(dest)
                }
                Val::Str(s) => {
                    let constidx = self.get_const(Val::Str(s))?;
                    if flags & IVAL_FLAG_ALLOW_CONST != 0 {
                        return Ok(constidx);
                    }
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_a_bc(Op::LdConst as u32, dest, constidx)?;
                    Ok(dest)
                }
            },
            Ispec::RegConst(rc) => {
                if rc_is_const(rc) && flags & IVAL_FLAG_ALLOW_CONST == 0 {
                    let dest = match forced_reg {
                        Some(r) => r,
                        None => self.alloc_temp()?,
                    };
                    self.emit_a_bc(Op::LdConst as u32, dest, rc)?;
                    Ok(dest)
                } else if let Some(forced) = forced_reg {
                    if rc != forced {
                        self.emit_a_bc(Op::LdReg as u32, forced, rc)?;
                    }
                    Ok(forced)
                } else if flags & IVAL_FLAG_REQUIRE_TEMP != 0 && !self.is_temp(rc) {
                    let dest = self.alloc_temp()?;
                    self.emit_a_bc(Op::LdReg as u32, dest, rc)?;
                    Ok(dest)
                } else {
                    Ok(rc)
                }
            }
        }
    }

    pub fn ispec_to_forcedreg(&mut self, x: Ispec, forced_reg: u32) -> Result<u32, CompileError> {
        self.ispec_to_regconst_raw(x, Some(forced_reg), 0)
    }

    /// Collapse an ivalue to `Plain` by folding literals or by emitting
    /// the arithmetic / property read / variable read it stands for.
    pub fn ivalue_to_plain_raw(
        &mut self,
        x: &mut Ivalue,
        forced_reg: Option<u32>,
    ) -> Result<(), CompileError> {
        match std::mem::take(x) {
            Ivalue::Plain(p) => {
                *x = Ivalue::Plain(p);
                Ok(())
            }
            Ivalue::Arith { op, left, right } => {
                // Compile-time folding for literal operands.
                if let (Ispec::Value(v1), Ispec::Value(v2)) = (&left, &right) {
                    if let (Val::Num(d1), Val::Num(d2)) = (v1, v2) {
                        let folded = match op {
                            Op::Add => Some(d1 + d2),
                            Op::Sub => Some(d1 - d2),
                            Op::Mul => Some(d1 * d2),
                            Op::Div => Some(d1 / d2),
                            _ => None,
                        };
                        if let Some(mut d3) = folded {
                            // Normalize any NaN to the canonical quiet NaN
                            // so folded results match runtime arithmetic.
                            if d3.is_nan() {
                                d3 = f64::NAN;
                            }
                            *x = Ivalue::plain_value(Val::Num(d3));
                            return Ok(());
                        }
                    }
                    if op == Op::Add {
                        if let (Val::Str(s1), Val::Str(s2)) = (v1, v2) {
                            let mut joined = self.interner.resolve(*s1).to_string();
                            joined.push_str(self.interner.resolve(*s2));
                            let sym = self.interner.intern(&joined);
                            *x = Ivalue::plain_value(Val::Str(sym));
                            return Ok(());
                        }
                    }
                }

                let arg1 =
                    self.ispec_to_regconst_raw(left, None, IVAL_FLAG_ALLOW_CONST | IVAL_FLAG_REQUIRE_SHORT)?;
                let arg2 =
                    self.ispec_to_regconst_raw(right, None, IVAL_FLAG_ALLOW_CONST | IVAL_FLAG_REQUIRE_SHORT)?;

                // Prefer writing over one of the coerced operands when it
                // is a temp; named binding registers must not be clobbered.
                let dest = match forced_reg {
                    Some(r) => r,
                    None if self.is_temp(arg1) => arg1,
                    None if self.is_temp(arg2) => arg2,
                    None => self.alloc_temp()?,
                };
                self.emit_a_b_c(op as u32, dest, arg1, arg2)?;
                *x = Ivalue::plain_reg(dest);
                Ok(())
            }
            Ivalue::Prop { obj, key } => {
                let arg1 =
                    self.ispec_to_regconst_raw(obj, None, IVAL_FLAG_ALLOW_CONST | IVAL_FLAG_REQUIRE_SHORT)?;
                let arg2 =
                    self.ispec_to_regconst_raw(key, None, IVAL_FLAG_ALLOW_CONST | IVAL_FLAG_REQUIRE_SHORT)?;
                let dest = match forced_reg {
                    Some(r) => r,
                    None if self.is_temp(arg1) => arg1,
                    None if self.is_temp(arg2) => arg2,
                    None => self.alloc_temp()?,
                };
                self.emit_a_b_c(Op::GetProp as u32, dest, arg1, arg2)?;
                *x = Ivalue::plain_reg(dest);
                Ok(())
            }
            Ivalue::Var(name) => {
                match self.lookup_lhs(name)? {
                    LhsBinding::Register(reg) => {
                        // Register-bound variable reads cost nothing.
                        *x = Ivalue::plain_reg(reg);
                    }
                    LhsBinding::Slow(name_const) => {
                        let dest = match forced_reg {
                            Some(r) => r,
                            None => self.alloc_temp()?,
                        };
                        self.emit_a_bc(Op::GetVar as u32, dest, name_const)?;
                        *x = Ivalue::plain_reg(dest);
                    }
                }
                Ok(())
            }
            Ivalue::None => Err(CompileError::internal("cannot coerce empty intermediate value")),
        }
    }

    pub fn ivalue_to_plain(&mut self, x: &mut Ivalue) -> Result<(), CompileError> {
        self.ivalue_to_plain_raw(x, None)
    }

    /// Coerce for side effects only; any temps used are released.
    pub fn ivalue_to_plain_ignore(&mut self, x: &mut Ivalue) -> Result<(), CompileError> {
        let temp = self.get_temp();
        self.ivalue_to_plain_raw(x, None)?;
        self.set_temp(temp);
        Ok(())
    }

    pub fn ivalue_to_regconst_raw(
        &mut self,
        x: &mut Ivalue,
        forced_reg: Option<u32>,
        flags: u32,
    ) -> Result<u32, CompileError> {
        self.ivalue_to_plain_raw(x, forced_reg)?;
        let Ivalue::Plain(spec) = x.clone() else {
            return Err(CompileError::internal("expected plain intermediate value"));
        };
        let reg = self.ispec_to_regconst_raw(spec, forced_reg, flags)?;
        *x = Ivalue::plain_reg(reg);
        Ok(reg)
    }

    pub fn ivalue_to_reg(&mut self, x: &mut Ivalue) -> Result<u32, CompileError> {
        self.ivalue_to_regconst_raw(x, None, 0)
    }

    pub fn ivalue_to_tempreg(&mut self, x: &mut Ivalue) -> Result<u32, CompileError> {
        self.ivalue_to_regconst_raw(x, None, IVAL_FLAG_REQUIRE_TEMP)
    }

    pub fn ivalue_to_forcedreg(&mut self, x: &mut Ivalue, forced_reg: u32) -> Result<u32, CompileError> {
        self.ivalue_to_regconst_raw(x, Some(forced_reg), 0)
    }

    pub fn ivalue_to_regconst(&mut self, x: &mut Ivalue) -> Result<u32, CompileError> {
        self.ivalue_to_regconst_raw(x, None, IVAL_FLAG_ALLOW_CONST)
    }

    /*
     *  Identifier resolution
     */

    /// Resolve an identifier to a register binding if possible.  Failures
    /// to resolve are not errors; they flag the function as needing slow
    /// path access and fall through to GETVAR/PUTVAR at runtime.
    pub fn lookup_active_register_binding(&mut self, name: Sym) -> Option<u32> {
        if name == self.wk.arguments {
            self.func.id_access_arguments = true;
        }
        // Inside any 'with' statement every lookup is dynamic.
        if self.func.with_depth > 0 {
            self.func.id_access_slow = true;
            return None;
        }
        match self.func.varmap.get(name) {
            Some(super::func::VarEntry::Reg(r)) => Some(r),
            _ => {
                self.func.id_access_slow = true;
                None
            }
        }
    }

    pub fn lookup_lhs(&mut self, name: Sym) -> Result<LhsBinding, CompileError> {
        match self.lookup_active_register_binding(name) {
            Some(reg) => Ok(LhsBinding::Register(reg)),
            None => {
                let name_const = self.get_const(Val::Str(name))?;
                Ok(LhsBinding::Slow(name_const))
            }
        }
    }
}
