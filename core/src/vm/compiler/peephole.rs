use tracing::debug;

use super::func::Compiler;
use crate::vm::bytecode::{JUMP_BIAS, Op, dec_abc, dec_op, enc_op_abc};

/// Pass cap for jump flattening.  Termination must not depend on the
/// bytecode shape: a jump chained to itself would otherwise loop forever.
const PEEPHOLE_MAXITER: u32 = 3;

impl<'src, 'i> Compiler<'src, 'i> {
    /// Straighten chains of unconditional jumps: a JUMP whose target is
    /// another JUMP is rewritten to jump directly to the final target.
    /// Instructions are never removed, so no other offsets change.  Label
    /// sites and break/continue slots generate most of these chains.
    pub fn peephole_optimize_bytecode(&mut self) {
        let n = self.func.code.len();

        for iter in 0..PEEPHOLE_MAXITER {
            let mut count_opt = 0u32;

            for i in 0..n {
                let ins = self.func.code[i].ins;
                if dec_op(ins) != Op::Jump as u8 {
                    continue;
                }

                let target_pc1 = (i as i64 + 1 + dec_abc(ins) as i64 - JUMP_BIAS as i64) as usize;
                debug_assert!(target_pc1 < n);

                // A jump to itself is not special-cased; the iteration cap
                // bounds it.
                let ins2 = self.func.code[target_pc1].ins;
                if dec_op(ins2) != Op::Jump as u8 {
                    continue;
                }

                let target_pc2 = target_pc1 as i64 + 1 + dec_abc(ins2) as i64 - JUMP_BIAS as i64;

                self.func.code[i].ins = enc_op_abc(
                    Op::Jump as u8,
                    (target_pc2 - (i as i64 + 1) + JUMP_BIAS as i64) as u32,
                );
                count_opt += 1;
            }

            debug!(round = iter + 1, optimized = count_opt, "peephole jump pass");
            if count_opt == 0 {
                break;
            }
        }
    }
}
