pub mod bytecode;
pub mod compiler;

pub use bytecode::{ExtraOp, FuncTemplate, Instr, Op, PcLine};
