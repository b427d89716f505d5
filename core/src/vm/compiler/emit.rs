use tracing::trace;

use super::func::{CONST_MARKER, Compiler, CompilerInstr, rc_index, rc_is_const};
use crate::error::CompileError;
use crate::vm::bytecode::{
    self, A_MAX, B_MAX, BC_MAX, C_MAX, Instr, JUMP_BIAS, LDINT_BIAS, LDINTX_SHIFT, Op, SLOT_CONST_BIT,
    enc_op_a_b_c, enc_op_a_bc, enc_op_abc,
};
use crate::vm::bytecode::ExtraOp;

// Emission flags, passed in the high bits of the op word ("op_flags").
// The low 8 bits carry the opcode (or extra opcode) itself.
pub(crate) const EMIT_FLAG_NO_SHUFFLE_A: u32 = 1 << 8;
pub(crate) const EMIT_FLAG_NO_SHUFFLE_B: u32 = 1 << 9;
pub(crate) const EMIT_FLAG_NO_SHUFFLE_C: u32 = 1 << 10;
/// Slot A is a source (default: target).
pub(crate) const EMIT_FLAG_A_IS_SOURCE: u32 = 1 << 11;
/// Slot B is a target (default: source).
pub(crate) const EMIT_FLAG_B_IS_TARGET: u32 = 1 << 12;
/// Slot C is a target (default: source).
pub(crate) const EMIT_FLAG_C_IS_TARGET: u32 = 1 << 13;

const OP_FLAGS_OP_MASK: u32 = 0xff;

impl<'src, 'i> Compiler<'src, 'i> {
    #[inline]
    pub fn get_current_pc(&self) -> usize {
        self.func.code.len()
    }

    /// Append one instruction, tagging it with the current token's line
    /// (an approximation, close enough for error reporting).
    pub fn emit(&mut self, ins: Instr) {
        let line = self.curr_token.start_line;
        self.func.code.push(CompilerInstr { ins, line });
    }

    fn out_of_regs(&self) -> CompileError {
        CompileError::range("out of registers")
    }

    /// Emit an A/B/C-form instruction, shuffling oversized operands
    /// through the reserved shuffle registers.
    ///
    /// Input shuffling (loads into shuffle registers) happens before the
    /// main operation; output shuffling (a store from the shuffle
    /// register to the true target) happens after it.  Opcodes whose B or
    /// C operand names a register *range* rather than a single register
    /// cannot be shuffled that way; they switch to their indirect variant
    /// (opcode + 1) with the true index loaded into the shuffle register.
    pub fn emit_a_b_c(&mut self, op_flags: u32, a: u32, b: u32, c: u32) -> Result<(), CompileError> {
        let mut op = (op_flags & OP_FLAGS_OP_MASK) as u8;
        let mut a = a;
        let mut b = b;
        let mut c = c;
        let mut a_out: Option<u32> = None;
        let mut b_out: Option<u32> = None;
        let mut c_out: Option<u32> = None;
        let mut ins: Instr = 0;

        // Slot A.
        if a <= A_MAX {
            // fits
        } else if op_flags & EMIT_FLAG_NO_SHUFFLE_A != 0 {
            return Err(self.out_of_regs());
        } else if a <= BC_MAX {
            self.func.needs_shuffle = true;
            let tmp = self.func.shuffle1;
            if op_flags & EMIT_FLAG_A_IS_SOURCE != 0 {
                self.emit(enc_op_a_bc(Op::LdReg as u8, tmp, a));
            } else if op == Op::CsVar as u8 || op == Op::CsReg as u8 || op == Op::CsProp as u8 {
                // Call setup names a register pair through A; express the
                // target indirectly instead of storing afterwards.
                self.emit_loadint(tmp, a as i32)?;
                op += 1;
            } else {
                a_out = Some(a);
            }
            a = tmp;
        } else {
            return Err(self.out_of_regs());
        }

        // Slot B.
        if rc_is_const(b) {
            debug_assert!(op_flags & (EMIT_FLAG_NO_SHUFFLE_B | EMIT_FLAG_B_IS_TARGET) == 0);
            b = rc_index(b);
            if b <= 0xff {
                ins |= SLOT_CONST_BIT << bytecode::B_SHIFT;
            } else if b <= BC_MAX {
                self.func.needs_shuffle = true;
                let tmp = self.func.shuffle2;
                self.emit(enc_op_a_bc(Op::LdConst as u8, tmp, b));
                b = tmp;
            } else {
                return Err(self.out_of_regs());
            }
        } else if b <= 0xff {
            // fits
        } else if op_flags & EMIT_FLAG_NO_SHUFFLE_B != 0 {
            if b > B_MAX {
                return Err(self.out_of_regs());
            }
        } else if b <= BC_MAX {
            self.func.needs_shuffle = true;
            let tmp = self.func.shuffle2;
            if op_flags & EMIT_FLAG_B_IS_TARGET != 0 {
                b_out = Some(b);
            } else if op == Op::Call as u8
                || op == Op::New as u8
                || op == Op::MPutObj as u8
                || op == Op::MPutArr as u8
            {
                // B names the first register of a range; switch to the
                // indirect opcode with the range start loaded by value.
                self.emit_loadint(tmp, b as i32)?;
                op += 1;
            } else {
                self.emit(enc_op_a_bc(Op::LdReg as u8, tmp, b));
            }
            b = tmp;
        } else {
            return Err(self.out_of_regs());
        }

        // Slot C.
        if rc_is_const(c) {
            debug_assert!(op_flags & (EMIT_FLAG_NO_SHUFFLE_C | EMIT_FLAG_C_IS_TARGET) == 0);
            c = rc_index(c);
            if c <= 0xff {
                ins |= SLOT_CONST_BIT << bytecode::C_SHIFT;
            } else if c <= BC_MAX {
                self.func.needs_shuffle = true;
                let tmp = self.func.shuffle3;
                self.emit(enc_op_a_bc(Op::LdConst as u8, tmp, c));
                c = tmp;
            } else {
                return Err(self.out_of_regs());
            }
        } else if c <= 0xff {
            // fits
        } else if op_flags & EMIT_FLAG_NO_SHUFFLE_C != 0 {
            if c > C_MAX {
                return Err(self.out_of_regs());
            }
        } else if c <= BC_MAX {
            self.func.needs_shuffle = true;
            let tmp = self.func.shuffle3;
            if op_flags & EMIT_FLAG_C_IS_TARGET != 0 {
                c_out = Some(c);
            } else if op == Op::Extra as u8
                && (a == ExtraOp::InitGet as u32 || a == ExtraOp::InitSet as u32)
            {
                // C names a key/closure register pair; use the indirect
                // extra op.
                self.emit_loadint(tmp, c as i32)?;
                a += 1;
            } else {
                self.emit(enc_op_a_bc(Op::LdReg as u8, tmp, c));
            }
            c = tmp;
        } else {
            return Err(self.out_of_regs());
        }

        debug_assert!(a <= A_MAX && b <= B_MAX && c <= C_MAX);
        ins |= enc_op_a_b_c(op, a, b, c);
        trace!(pc = self.get_current_pc(), ins, "emit");
        self.emit(ins);

        // At most one output shuffle is possible per instruction.
        if let Some(out) = a_out {
            self.emit(enc_op_a_bc(Op::StReg as u8, a, out));
        } else if let Some(out) = b_out {
            self.emit(enc_op_a_bc(Op::StReg as u8, b, out));
        } else if let Some(out) = c_out {
            self.emit(enc_op_a_bc(Op::StReg as u8, c, out));
        }
        Ok(())
    }

    pub fn emit_a_b(&mut self, op_flags: u32, a: u32, b: u32) -> Result<(), CompileError> {
        self.emit_a_b_c(op_flags, a, b, 0)
    }

    pub fn emit_a_bc(&mut self, op_flags: u32, a: u32, bc: u32) -> Result<(), CompileError> {
        // Callers may hand over a constant with the marker still attached.
        let bc = bc & !CONST_MARKER;
        if bc > BC_MAX {
            return Err(self.out_of_regs());
        }
        let op = (op_flags & OP_FLAGS_OP_MASK) as u8;

        if a <= A_MAX {
            self.emit(enc_op_a_bc(op, a, bc));
        } else if op_flags & EMIT_FLAG_NO_SHUFFLE_A != 0 {
            return Err(self.out_of_regs());
        } else if a <= BC_MAX {
            self.func.needs_shuffle = true;
            let tmp = self.func.shuffle1;
            let ins = enc_op_a_bc(op, tmp, bc);
            if op_flags & EMIT_FLAG_A_IS_SOURCE != 0 {
                self.emit(enc_op_a_bc(Op::LdReg as u8, tmp, a));
                self.emit(ins);
            } else {
                self.emit(ins);
                self.emit(enc_op_a_bc(Op::StReg as u8, tmp, a));
            }
        } else {
            return Err(self.out_of_regs());
        }
        Ok(())
    }

    pub fn emit_op_abc(&mut self, op: Op, abc: u32) {
        debug_assert!(abc <= bytecode::ABC_MAX);
        self.emit(enc_op_abc(op as u8, abc));
    }

    pub fn emit_extraop_b_c(&mut self, extraop_flags: u32, b: u32, c: u32) -> Result<(), CompileError> {
        self.emit_a_b_c(
            (Op::Extra as u32) | (extraop_flags & !OP_FLAGS_OP_MASK),
            extraop_flags & OP_FLAGS_OP_MASK,
            b,
            c,
        )
    }

    pub fn emit_extraop_b(&mut self, extraop_flags: u32, b: u32) -> Result<(), CompileError> {
        self.emit_extraop_b_c(extraop_flags, b, 0)
    }

    pub fn emit_extraop_bc(&mut self, extraop: ExtraOp, bc: u32) -> Result<(), CompileError> {
        self.emit_a_bc(Op::Extra as u32, extraop as u32, bc)
    }

    pub fn emit_extraop_only(&mut self, extraop_flags: u32) -> Result<(), CompileError> {
        self.emit_extraop_b_c(extraop_flags, 0, 0)
    }

    /// Load a signed integer into a register without touching the constant
    /// pool: one LDINT for 18-bit-biased values, LDINT+LDINTX for the full
    /// 24-bit-plus range.
    pub fn emit_loadint(&mut self, reg: u32, val: i32) -> Result<(), CompileError> {
        if val >= -LDINT_BIAS && val <= (BC_MAX as i32) - LDINT_BIAS {
            self.emit_a_bc(Op::LdInt as u32, reg, (val + LDINT_BIAS) as u32)
        } else {
            let hi = val >> LDINTX_SHIFT;
            let lo = (val & ((1i32 << LDINTX_SHIFT) - 1)) as u32;
            self.emit_a_bc(Op::LdInt as u32, reg, (hi + LDINT_BIAS) as u32)?;
            self.emit_a_bc(Op::LdIntX as u32, reg, lo)
        }
    }

    pub fn emit_jump_to(&mut self, target_pc: usize) {
        let curr_pc = self.get_current_pc();
        let offset = target_pc as i64 - curr_pc as i64 - 1;
        debug_assert!(offset + JUMP_BIAS as i64 >= 0);
        debug_assert!(offset + JUMP_BIAS as i64 <= bytecode::ABC_MAX as i64);
        self.emit_op_abc(Op::Jump, (offset + JUMP_BIAS as i64) as u32);
    }

    /// Emit a jump whose target is patched later; returns its PC.
    pub fn emit_jump_empty(&mut self) -> usize {
        let pc = self.get_current_pc();
        self.emit_op_abc(Op::Jump, 0);
        pc
    }

    /// Insert an empty jump in the middle of already-emitted code.  Only
    /// valid while no emitted jump crosses the insertion point; needed for
    /// the for-in header, whose control flow is discovered after the
    /// left-hand side has been emitted.
    pub fn insert_jump_entry(&mut self, jump_pc: usize) {
        let line = self.curr_token.start_line;
        self.func.code.insert(
            jump_pc,
            CompilerInstr {
                ins: enc_op_abc(Op::Jump as u8, 0),
                line,
            },
        );
    }

    /// Patch the jump at `jump_pc` to land on `target_pc`.  `None` is a
    /// no-op so omitted patch sites need no special casing.  The slot is
    /// overwritten unconditionally: label sites park INVALID opcodes in
    /// their jump slots and those become real jumps here.
    pub fn patch_jump(&mut self, jump_pc: Option<usize>, target_pc: usize) {
        let Some(jump_pc) = jump_pc else {
            return;
        };
        let offset = target_pc as i64 - jump_pc as i64 - 1;
        self.func.code[jump_pc].ins = enc_op_abc(Op::Jump as u8, (offset + JUMP_BIAS as i64) as u32);
    }

    pub fn patch_jump_here(&mut self, jump_pc: Option<usize>) {
        let target = self.get_current_pc();
        self.patch_jump(jump_pc, target);
    }

    /// Rewrite the TRYCATCH placeholder once the catch register, variable
    /// name constant, and shape flags are known.
    pub fn patch_trycatch(
        &mut self,
        trycatch_pc: usize,
        reg_catch: u32,
        const_varname: u32,
        flags: u32,
    ) -> Result<(), CompileError> {
        let mut ins_extra: Instr = 0;
        let c = if rc_is_const(const_varname) {
            let idx = rc_index(const_varname);
            if idx > 0xff {
                // The placeholder is patched in hindsight; no shuffle
                // sequence can be inserted here any more.
                return Err(self.out_of_regs());
            }
            ins_extra |= SLOT_CONST_BIT << bytecode::C_SHIFT;
            idx
        } else {
            const_varname
        };
        if reg_catch > 0xff || c > 0xff {
            return Err(self.out_of_regs());
        }
        self.func.code[trycatch_pc].ins = enc_op_a_b_c(Op::TryCatch as u8, flags, reg_catch, c) | ins_extra;
        Ok(())
    }

    /// IF with a false truth flag: skip the next instruction when the
    /// operand coerces to false.
    pub fn emit_if_false_skip(&mut self, regconst: u32) -> Result<(), CompileError> {
        self.emit_a_b_c(Op::If as u32, 0, regconst, 0)
    }

    pub fn emit_if_true_skip(&mut self, regconst: u32) -> Result<(), CompileError> {
        self.emit_a_b_c(Op::If as u32, 1, regconst, 0)
    }

    pub fn emit_invalid(&mut self) {
        self.emit_op_abc(Op::Invalid, 0);
    }
}
