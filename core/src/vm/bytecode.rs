use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::val::{Sym, Val};

/// One bytecode instruction: a packed 32-bit word.
///
/// Three layouts share the low 6 opcode bits:
///
/// ```text
///   OP(6) A(8) B(9) C(9)      three-operand ops; B and C reserve their
///                             top bit as an "operand is a constant" flag
///   OP(6) A(8) BC(18)         wide second operand, no constant flag
///   OP(6) ABC(26)             jumps; biased signed offset
/// ```
pub type Instr = u32;

pub const OP_MASK: u32 = 0x3f;
pub const A_SHIFT: u32 = 6;
pub const B_SHIFT: u32 = 14;
pub const C_SHIFT: u32 = 23;
pub const BC_SHIFT: u32 = 14;
pub const ABC_SHIFT: u32 = 6;

pub const A_MAX: u32 = 0xff;
pub const B_MAX: u32 = 0x1ff;
pub const C_MAX: u32 = 0x1ff;
pub const BC_MAX: u32 = 0x3ffff;
pub const ABC_MAX: u32 = 0x3ff_ffff;

/// Constant flag bit inside the 9-bit B/C slots.
pub const SLOT_CONST_BIT: u32 = 0x100;

/// Jump offsets are stored biased so the ABC field stays unsigned.
pub const JUMP_BIAS: i32 = 1 << 25;

/// LDINT loads `BC - LDINT_BIAS`; LDINTX shifts the previous value left by
/// `LDINTX_SHIFT` and ors in an unbiased BC, giving 24-bit signed range in
/// two instructions.
pub const LDINT_BIAS: i32 = 1 << 17;
pub const LDINTX_SHIFT: u32 = 18;

#[inline]
pub const fn enc_op_a_b_c(op: u8, a: u32, b: u32, c: u32) -> Instr {
    (op as u32) | (a << A_SHIFT) | (b << B_SHIFT) | (c << C_SHIFT)
}

#[inline]
pub const fn enc_op_a_bc(op: u8, a: u32, bc: u32) -> Instr {
    (op as u32) | (a << A_SHIFT) | (bc << BC_SHIFT)
}

#[inline]
pub const fn enc_op_abc(op: u8, abc: u32) -> Instr {
    (op as u32) | (abc << ABC_SHIFT)
}

#[inline]
pub const fn dec_op(ins: Instr) -> u8 {
    (ins & OP_MASK) as u8
}

#[inline]
pub const fn dec_a(ins: Instr) -> u32 {
    (ins >> A_SHIFT) & 0xff
}

#[inline]
pub const fn dec_b(ins: Instr) -> u32 {
    (ins >> B_SHIFT) & 0x1ff
}

#[inline]
pub const fn dec_c(ins: Instr) -> u32 {
    (ins >> C_SHIFT) & 0x1ff
}

#[inline]
pub const fn dec_bc(ins: Instr) -> u32 {
    (ins >> BC_SHIFT) & BC_MAX
}

#[inline]
pub const fn dec_abc(ins: Instr) -> u32 {
    (ins >> ABC_SHIFT) & ABC_MAX
}

/// Decode a jump target: `pc + 1 + (abc - bias)`.
#[inline]
pub fn jump_target(pc: usize, ins: Instr) -> i64 {
    pc as i64 + 1 + (dec_abc(ins) as i64 - JUMP_BIAS as i64)
}

/// Main opcodes.  Indirect variants must stay exactly one past their
/// direct counterpart: the emitter switches `op -> op + 1` when a
/// register-range operand has to be read through a pointer register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    LdReg = 0,
    StReg = 1,
    LdConst = 2,
    LdInt = 3,
    LdIntX = 4,
    MPutObj = 5,
    MPutObjI = 6,
    MPutArr = 7,
    MPutArrI = 8,
    New = 9,
    NewI = 10,
    RegExp = 11,
    CsReg = 12,
    CsRegI = 13,
    CsVar = 14,
    CsVarI = 15,
    CsProp = 16,
    CsPropI = 17,
    GetVar = 18,
    PutVar = 19,
    DeclVar = 20,
    DelVar = 21,
    GetProp = 22,
    PutProp = 23,
    DelProp = 24,
    Add = 25,
    Sub = 26,
    Mul = 27,
    Div = 28,
    Mod = 29,
    BAnd = 30,
    BOr = 31,
    BXor = 32,
    Basl = 33,
    Basr = 34,
    Blsr = 35,
    Eq = 36,
    Neq = 37,
    Seq = 38,
    Sneq = 39,
    Gt = 40,
    Ge = 41,
    Lt = 42,
    Le = 43,
    In = 44,
    InstOf = 45,
    BNot = 46,
    LNot = 47,
    If = 48,
    Jump = 49,
    Return = 50,
    Call = 51,
    CallI = 52,
    TryCatch = 53,
    Label = 54,
    EndLabel = 55,
    Break = 56,
    Continue = 57,
    Closure = 58,
    Extra = 59,
    Invalid = 60,
}

impl Op {
    pub fn from_raw(raw: u8) -> Option<Op> {
        if raw <= Op::Invalid as u8 {
            // Discriminants are dense from zero.
            Some(unsafe { std::mem::transmute::<u8, Op>(raw) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::LdReg => "LDREG",
            Op::StReg => "STREG",
            Op::LdConst => "LDCONST",
            Op::LdInt => "LDINT",
            Op::LdIntX => "LDINTX",
            Op::MPutObj => "MPUTOBJ",
            Op::MPutObjI => "MPUTOBJI",
            Op::MPutArr => "MPUTARR",
            Op::MPutArrI => "MPUTARRI",
            Op::New => "NEW",
            Op::NewI => "NEWI",
            Op::RegExp => "REGEXP",
            Op::CsReg => "CSREG",
            Op::CsRegI => "CSREGI",
            Op::CsVar => "CSVAR",
            Op::CsVarI => "CSVARI",
            Op::CsProp => "CSPROP",
            Op::CsPropI => "CSPROPI",
            Op::GetVar => "GETVAR",
            Op::PutVar => "PUTVAR",
            Op::DeclVar => "DECLVAR",
            Op::DelVar => "DELVAR",
            Op::GetProp => "GETPROP",
            Op::PutProp => "PUTPROP",
            Op::DelProp => "DELPROP",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::BAnd => "BAND",
            Op::BOr => "BOR",
            Op::BXor => "BXOR",
            Op::Basl => "BASL",
            Op::Basr => "BASR",
            Op::Blsr => "BLSR",
            Op::Eq => "EQ",
            Op::Neq => "NEQ",
            Op::Seq => "SEQ",
            Op::Sneq => "SNEQ",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::In => "IN",
            Op::InstOf => "INSTOF",
            Op::BNot => "BNOT",
            Op::LNot => "LNOT",
            Op::If => "IF",
            Op::Jump => "JUMP",
            Op::Return => "RETURN",
            Op::Call => "CALL",
            Op::CallI => "CALLI",
            Op::TryCatch => "TRYCATCH",
            Op::Label => "LABEL",
            Op::EndLabel => "ENDLABEL",
            Op::Break => "BREAK",
            Op::Continue => "CONTINUE",
            Op::Closure => "CLOSURE",
            Op::Extra => "EXTRA",
            Op::Invalid => "INVALID",
        }
    }
}

/// Extra opcodes dispatched through `Op::Extra` with the extra op in
/// slot A.  The same one-past rule applies to the indirect INITGET/INITSET
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtraOp {
    Nop = 0,
    LdThis = 1,
    LdUndef = 2,
    LdNull = 3,
    LdTrue = 4,
    LdFalse = 5,
    NewObj = 6,
    NewArr = 7,
    SetALen = 8,
    Typeof = 9,
    TypeofId = 10,
    ToNum = 11,
    InitEnum = 12,
    NextEnum = 13,
    InitGet = 14,
    InitGetI = 15,
    InitSet = 16,
    InitSetI = 17,
    EndTry = 18,
    EndCatch = 19,
    EndFin = 20,
    Throw = 21,
    InvLhs = 22,
    Unm = 23,
    Unp = 24,
    Inc = 25,
    Dec = 26,
}

impl ExtraOp {
    pub fn from_raw(raw: u8) -> Option<ExtraOp> {
        if raw <= ExtraOp::Dec as u8 {
            Some(unsafe { std::mem::transmute::<u8, ExtraOp>(raw) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExtraOp::Nop => "NOP",
            ExtraOp::LdThis => "LDTHIS",
            ExtraOp::LdUndef => "LDUNDEF",
            ExtraOp::LdNull => "LDNULL",
            ExtraOp::LdTrue => "LDTRUE",
            ExtraOp::LdFalse => "LDFALSE",
            ExtraOp::NewObj => "NEWOBJ",
            ExtraOp::NewArr => "NEWARR",
            ExtraOp::SetALen => "SETALEN",
            ExtraOp::Typeof => "TYPEOF",
            ExtraOp::TypeofId => "TYPEOFID",
            ExtraOp::ToNum => "TONUM",
            ExtraOp::InitEnum => "INITENUM",
            ExtraOp::NextEnum => "NEXTENUM",
            ExtraOp::InitGet => "INITGET",
            ExtraOp::InitGetI => "INITGETI",
            ExtraOp::InitSet => "INITSET",
            ExtraOp::InitSetI => "INITSETI",
            ExtraOp::EndTry => "ENDTRY",
            ExtraOp::EndCatch => "ENDCATCH",
            ExtraOp::EndFin => "ENDFIN",
            ExtraOp::Throw => "THROW",
            ExtraOp::InvLhs => "INVLHS",
            ExtraOp::Unm => "UNM",
            ExtraOp::Unp => "UNP",
            ExtraOp::Inc => "INC",
            ExtraOp::Dec => "DEC",
        }
    }
}

// CALL flags, slot A.
pub const CALL_FLAG_EVALCALL: u32 = 1 << 0;
pub const CALL_FLAG_TAILCALL: u32 = 1 << 1;

// RETURN flags, slot A.
pub const RETURN_FLAG_FAST: u32 = 1 << 0;
pub const RETURN_FLAG_HAVE_RETVAL: u32 = 1 << 1;

// DECLVAR flags, slot A: property descriptor bits plus declaration extras.
pub const PROP_FLAG_WRITABLE: u32 = 1 << 0;
pub const PROP_FLAG_ENUMERABLE: u32 = 1 << 1;
pub const PROP_FLAG_CONFIGURABLE: u32 = 1 << 2;
pub const DECLVAR_FLAG_UNDEF_VALUE: u32 = 1 << 4;
pub const DECLVAR_FLAG_FUNC_DECL: u32 = 1 << 5;

// TRYCATCH flags, slot A.
pub const TRYCATCH_FLAG_HAVE_CATCH: u32 = 1 << 0;
pub const TRYCATCH_FLAG_HAVE_FINALLY: u32 = 1 << 1;
pub const TRYCATCH_FLAG_CATCH_BINDING: u32 = 1 << 2;
pub const TRYCATCH_FLAG_WITH_BINDING: u32 = 1 << 3;

/// One run of the packed PC-to-line table: instruction `pc` and all
/// following instructions up to the next entry were emitted for `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcLine {
    pub pc: u32,
    pub line: u32,
}

/// Immutable compilation result for one function.  The interpreter executes
/// `code` against a frame of `nregs` registers, the first `nargs` of which
/// are seeded from call arguments.
#[derive(Debug, Clone)]
pub struct FuncTemplate {
    pub code: Vec<Instr>,
    pub consts: Vec<Val>,
    pub funcs: Vec<Rc<FuncTemplate>>,
    pub nregs: u32,
    pub nargs: u32,
    pub name: Option<Sym>,
    pub filename: Option<Sym>,
    /// Name-to-register map, present only when slow path identifier access
    /// is possible (direct eval, `with`, unresolvable names).
    pub varmap: Option<Vec<(Sym, u32)>>,
    /// Formal argument names, present only when an arguments object may
    /// have to be created at call time.
    pub formals: Option<Vec<Sym>>,
    pub pc2line: Vec<PcLine>,
    pub is_strict: bool,
    /// Named function expression: the name must be bound in a dedicated
    /// environment record visible inside the function.
    pub name_binding: bool,
    /// Call sites must materialize an arguments object.
    pub create_args: bool,
}

impl FuncTemplate {
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        let mut line = None;
        for entry in &self.pc2line {
            if entry.pc > pc {
                break;
            }
            line = Some(entry.line);
        }
        line
    }
}

#[cfg(test)]
#[path = "bytecode_test.rs"]
mod bytecode_test;
