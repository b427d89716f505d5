use super::*;

#[test]
fn abc_round_trip() {
    let ins = enc_op_a_b_c(Op::Add as u8, 7, 0x1ff, 0x100);
    assert_eq!(dec_op(ins), Op::Add as u8);
    assert_eq!(dec_a(ins), 7);
    assert_eq!(dec_b(ins), 0x1ff);
    assert_eq!(dec_c(ins), 0x100);
}

#[test]
fn bc_round_trip() {
    let ins = enc_op_a_bc(Op::LdConst as u8, 255, BC_MAX);
    assert_eq!(dec_op(ins), Op::LdConst as u8);
    assert_eq!(dec_a(ins), 255);
    assert_eq!(dec_bc(ins), BC_MAX);
}

#[test]
fn jump_bias_round_trip() {
    // Backward jump by 3 from pc 10 lands on pc 8.
    let offset = -3i32;
    let ins = enc_op_abc(Op::Jump as u8, (offset + JUMP_BIAS) as u32);
    assert_eq!(jump_target(10, ins), 8);

    let ins = enc_op_abc(Op::Jump as u8, JUMP_BIAS as u32);
    assert_eq!(jump_target(10, ins), 11);
}

#[test]
fn indirect_opcodes_are_one_past_direct() {
    assert_eq!(Op::CallI as u8, Op::Call as u8 + 1);
    assert_eq!(Op::NewI as u8, Op::New as u8 + 1);
    assert_eq!(Op::MPutObjI as u8, Op::MPutObj as u8 + 1);
    assert_eq!(Op::MPutArrI as u8, Op::MPutArr as u8 + 1);
    assert_eq!(Op::CsRegI as u8, Op::CsReg as u8 + 1);
    assert_eq!(Op::CsVarI as u8, Op::CsVar as u8 + 1);
    assert_eq!(Op::CsPropI as u8, Op::CsProp as u8 + 1);
    assert_eq!(ExtraOp::InitGetI as u8, ExtraOp::InitGet as u8 + 1);
    assert_eq!(ExtraOp::InitSetI as u8, ExtraOp::InitSet as u8 + 1);
}

#[test]
fn opcode_fits_six_bits() {
    assert!((Op::Invalid as u8 as u32) <= OP_MASK);
}

#[test]
fn from_raw_round_trip() {
    for raw in 0..=Op::Invalid as u8 {
        let op = Op::from_raw(raw).expect("dense opcode space");
        assert_eq!(op as u8, raw);
    }
    assert!(Op::from_raw(Op::Invalid as u8 + 1).is_none());
}

#[test]
fn line_for_pc_runs() {
    let tpl = FuncTemplate {
        code: vec![],
        consts: vec![],
        funcs: vec![],
        nregs: 0,
        nargs: 0,
        name: None,
        filename: None,
        varmap: None,
        formals: None,
        pc2line: vec![PcLine { pc: 0, line: 1 }, PcLine { pc: 3, line: 2 }],
        is_strict: false,
        name_binding: false,
        create_args: false,
    };
    assert_eq!(tpl.line_for_pc(0), Some(1));
    assert_eq!(tpl.line_for_pc(2), Some(1));
    assert_eq!(tpl.line_for_pc(3), Some(2));
    assert_eq!(tpl.line_for_pc(9), Some(2));
}
