use std::rc::Rc;

use super::driver::{CompileOptions, compile};
use super::emit::{EMIT_FLAG_NO_SHUFFLE_A, EMIT_FLAG_NO_SHUFFLE_C};
use super::func::{CONST_MARKER, Compiler};
use crate::error::ErrorKind;
use crate::val::{Interner, Val};
use crate::vm::bytecode::{
    CALL_FLAG_EVALCALL, CALL_FLAG_TAILCALL, DECLVAR_FLAG_UNDEF_VALUE, ExtraOp, FuncTemplate, Op,
    PROP_FLAG_ENUMERABLE, PROP_FLAG_WRITABLE, RETURN_FLAG_FAST, RETURN_FLAG_HAVE_RETVAL,
    SLOT_CONST_BIT, TRYCATCH_FLAG_CATCH_BINDING, TRYCATCH_FLAG_HAVE_CATCH,
    TRYCATCH_FLAG_HAVE_FINALLY, dec_a, dec_b, dec_bc, dec_c, dec_op, jump_target,
};

fn compile_program(src: &str) -> (Rc<FuncTemplate>, Interner) {
    compile(src, None, &CompileOptions::default()).expect("program should compile")
}

fn compile_funcexpr(src: &str) -> (Rc<FuncTemplate>, Interner) {
    let options = CompileOptions {
        funcexpr: true,
        ..Default::default()
    };
    compile(src, None, &options).expect("function expression should compile")
}

fn compile_err(src: &str) -> crate::error::CompileError {
    compile(src, None, &CompileOptions::default()).expect_err("compilation should fail")
}

fn find_op(tpl: &FuncTemplate, op: Op) -> Option<(usize, u32)> {
    tpl.code
        .iter()
        .enumerate()
        .find(|&(_, &ins)| dec_op(ins) == op as u8)
        .map(|(pc, &ins)| (pc, ins))
}

fn has_op(tpl: &FuncTemplate, op: Op) -> bool {
    find_op(tpl, op).is_some()
}

fn find_extraop(tpl: &FuncTemplate, xop: ExtraOp) -> Option<(usize, u32)> {
    tpl.code
        .iter()
        .enumerate()
        .find(|&(_, &ins)| dec_op(ins) == Op::Extra as u8 && dec_a(ins) == xop as u32)
        .map(|(pc, &ins)| (pc, ins))
}

fn has_extraop(tpl: &FuncTemplate, xop: ExtraOp) -> bool {
    find_extraop(tpl, xop).is_some()
}

fn const_str_index(tpl: &FuncTemplate, interner: &Interner, text: &str) -> Option<usize> {
    tpl.consts.iter().position(|v| match v {
        Val::Str(s) => interner.resolve(*s) == text,
        _ => false,
    })
}

fn assert_invariants(tpl: &FuncTemplate) {
    assert!(tpl.nregs >= tpl.nargs, "frame must cover the formals");
    let n = tpl.code.len() as i64;
    for (pc, &ins) in tpl.code.iter().enumerate() {
        let op = Op::from_raw(dec_op(ins)).expect("unknown opcode in emitted code");
        if op == Op::Jump {
            let target = jump_target(pc, ins);
            assert!(target >= 0 && target <= n, "jump target out of bounds");
        }
    }
    for inner in &tpl.funcs {
        assert_invariants(inner);
    }
}

fn assert_no_jump_to_jump(tpl: &FuncTemplate) {
    for (pc, &ins) in tpl.code.iter().enumerate() {
        if dec_op(ins) != Op::Jump as u8 {
            continue;
        }
        let target = jump_target(pc, ins) as usize;
        if target < tpl.code.len() {
            assert_ne!(
                dec_op(tpl.code[target]),
                Op::Jump as u8,
                "jump at pc {} still chains through pc {}",
                pc,
                target
            );
        }
    }
}

/*
 *  End-to-end scenarios
 */

#[test]
fn use_strict_directive_and_global_var_binding() {
    let (tpl, interner) = compile_program("\"use strict\"; var x = 1;");

    assert!(tpl.is_strict);
    assert!(const_str_index(&tpl, &interner, "use strict").is_some());

    // Global code declares 'x' through DECLVAR with a name constant.
    let (_, declvar) = find_op(&tpl, Op::DeclVar).expect("prologue DECLVAR");
    assert_eq!(
        dec_a(declvar),
        PROP_FLAG_WRITABLE | PROP_FLAG_ENUMERABLE | DECLVAR_FLAG_UNDEF_VALUE
    );
    assert_ne!(dec_b(declvar) & SLOT_CONST_BIT, 0, "name operand is a constant");
    let name_idx = (dec_b(declvar) & 0xff) as usize;
    assert_eq!(interner.resolve(match tpl.consts[name_idx] {
        Val::Str(s) => s,
        _ => panic!("name constant should be a string"),
    }), "x");

    // The assignment goes through the slow path.
    assert!(has_op(&tpl, Op::PutVar));

    // Program code ends in a fast return carrying the implicit value.
    let last = *tpl.code.last().expect("nonempty code");
    assert_eq!(dec_op(last), Op::Return as u8);
    assert_eq!(dec_a(last), RETURN_FLAG_HAVE_RETVAL | RETURN_FLAG_FAST);

    assert_invariants(&tpl);
}

#[test]
fn two_arg_function_compiles_to_add_and_return() {
    let (tpl, interner) = compile_funcexpr("function f(a,b){ return a+b; }");

    assert_eq!(tpl.nargs, 2);
    assert_eq!(tpl.nregs, 3);
    assert_eq!(interner.resolve(tpl.name.expect("named function")), "f");
    assert!(tpl.name_binding);
    assert!(!has_op(&tpl, Op::StReg), "no shuffling in a tiny function");

    // ADD r2, r0, r1
    assert_eq!(dec_op(tpl.code[0]), Op::Add as u8);
    assert_eq!(dec_a(tpl.code[0]), 2);
    assert_eq!(dec_b(tpl.code[0]), 0);
    assert_eq!(dec_c(tpl.code[0]), 1);

    // RETURN HAVE_RETVAL|FAST r2
    assert_eq!(dec_op(tpl.code[1]), Op::Return as u8);
    assert_eq!(dec_a(tpl.code[1]), RETURN_FLAG_HAVE_RETVAL | RETURN_FLAG_FAST);
    assert_eq!(dec_b(tpl.code[1]), 2);

    assert_invariants(&tpl);
}

#[test]
fn for_loop_emits_label_test_body_update() {
    let (tpl, _) = compile_program("for (var i = 0; i < 10; i++) { x[i]; }");

    let (pc_label, _) = find_op(&tpl, Op::Label).expect("loop label site");
    let (pc_lt, _) = find_op(&tpl, Op::Lt).expect("loop condition");
    let (pc_getprop, _) = find_op(&tpl, Op::GetProp).expect("body property read");
    let (pc_endlabel, _) = find_op(&tpl, Op::EndLabel).expect("label pop");

    assert!(pc_label < pc_lt);
    assert!(pc_lt < pc_getprop);
    assert!(pc_getprop < pc_endlabel);

    assert!(has_op(&tpl, Op::DeclVar), "global var i declared in prologue");
    assert!(has_extraop(&tpl, ExtraOp::Inc), "i++ increments");
    assert!(has_op(&tpl, Op::Jump));

    assert_invariants(&tpl);
    assert_no_jump_to_jump(&tpl);
}

#[test]
fn try_catch_finally_shape() {
    let (tpl, interner) = compile_program("try { f(); } catch (e) { throw e; } finally { g(); }");

    let (pc, trycatch) = find_op(&tpl, Op::TryCatch).expect("TRYCATCH emitted");
    assert_eq!(
        dec_a(trycatch),
        TRYCATCH_FLAG_HAVE_CATCH | TRYCATCH_FLAG_HAVE_FINALLY | TRYCATCH_FLAG_CATCH_BINDING
    );
    // Slot C carries the catch variable name constant.
    assert_ne!(dec_c(trycatch) & SLOT_CONST_BIT, 0);
    let name_idx = (dec_c(trycatch) & 0xff) as usize;
    assert_eq!(
        match tpl.consts[name_idx] {
            Val::Str(s) => interner.resolve(s),
            _ => panic!("catch variable constant should be a string"),
        },
        "e"
    );

    // The two slots after TRYCATCH are patched jumps.
    assert_eq!(dec_op(tpl.code[pc + 1]), Op::Jump as u8);
    assert_eq!(dec_op(tpl.code[pc + 2]), Op::Jump as u8);

    assert!(has_extraop(&tpl, ExtraOp::EndTry));
    assert!(has_extraop(&tpl, ExtraOp::EndCatch));
    assert!(has_extraop(&tpl, ExtraOp::EndFin));
    assert!(has_extraop(&tpl, ExtraOp::Throw));
    // The caught value is written to the slow-path catch binding.
    assert!(has_op(&tpl, Op::PutVar));

    assert_invariants(&tpl);
}

#[test]
fn direct_eval_call_is_flagged() {
    let (tpl, interner) = compile_funcexpr("function f(a){ var r = eval(a); return r; }");

    let (_, call) = find_op(&tpl, Op::Call).expect("call emitted");
    assert_ne!(dec_a(call) & CALL_FLAG_EVALCALL, 0, "EVALCALL flag set");

    // A possible direct eval forces the varmap and formals into the
    // template so the runtime can resolve names and build arguments.
    let varmap = tpl.varmap.as_ref().expect("varmap retained");
    let names: Vec<&str> = varmap.iter().map(|&(s, _)| interner.resolve(s)).collect();
    assert!(names.contains(&"a"));
    assert!(names.contains(&"r"));

    assert!(tpl.create_args);
    let formals = tpl.formals.as_ref().expect("formals retained");
    assert_eq!(formals.len(), 1);
    assert_eq!(interner.resolve(formals[0]), "a");

    assert_invariants(&tpl);
}

#[test]
fn duplicate_object_keys_rejected_in_strict_mode() {
    let options = CompileOptions {
        funcexpr: true,
        ..Default::default()
    };
    let err = compile(
        "function f(){ \"use strict\"; return { a: 1, a: 2 }; }",
        None,
        &options,
    )
    .expect_err("duplicate keys are a strict-mode error");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(err.message.contains("duplicate key"), "message: {}", err.message);

    // Outside strict mode the last key wins silently.
    compile_funcexpr("function f(){ return { a: 1, a: 2 }; }");
}

/*
 *  Boundary behaviors
 */

#[test]
fn do_while_semicolon_relaxation() {
    // No semicolon after while(...) and no line terminator before the
    // next statement; accepted for compatibility.
    let (tpl, _) = compile_program("var x = 0; do { x = x + 1; } while (x < 10) x;");
    assert_invariants(&tpl);
}

#[test]
fn oversized_operands_allocate_shuffle_registers() {
    let args: Vec<String> = (0..300).map(|i| i.to_string()).collect();
    let src = format!("f({});", args.join(","));
    let (tpl, _) = compile_program(&src);

    assert!(tpl.nregs > 256, "argument temps exceed the 8-bit register space");
    assert!(has_op(&tpl, Op::StReg), "output shuffling stores through a shuffle register");
    // The three shuffle registers sit right after the implicit-return
    // register of program code, so every spill to an oversized argument
    // temp stores through register 1 (the first of the block).
    assert!(
        tpl.code
            .iter()
            .any(|&ins| dec_op(ins) == Op::StReg as u8 && dec_a(ins) == 1 && dec_bc(ins) > 255)
    );
    assert!(has_op(&tpl, Op::Call));
    assert_invariants(&tpl);
}

#[test]
fn exactly_255_temps_need_no_shuffle_registers() {
    let mut interner = Interner::new();
    let mut c = Compiler::new("", None, CompileOptions::default(), &mut interner);
    // Program-code layout: one reserved low register, then the temp
    // region.
    c.set_temp_checkmax(1);
    c.func.temp_first = 1;

    let base = c.alloc_temps(255).expect("255 temps");
    assert_eq!(base, 1);
    let top = c.get_temp() - 1;
    assert_eq!(top, 255, "the highest temp is still an 8-bit register index");

    // The highest temp is directly addressable in every slot.
    c.emit_a_b_c(Op::Add as u32, top, top, top).expect("emit");
    assert!(!c.func.needs_shuffle, "no operand exceeded its slot width");
    assert_eq!(c.func.code.len(), 1, "no spill code around the instruction");
    assert_eq!(dec_op(c.func.code[0].ins), Op::Add as u8);
}

#[test]
fn temp_256_flags_shuffling_and_spills_through_reserved_registers() {
    let mut interner = Interner::new();
    let mut c = Compiler::new("", None, CompileOptions::default(), &mut interner);
    // Same layout with one more temp: the 256th temp lands on register
    // index 256 and no longer fits an 8-bit slot.  Model the second
    // pass, where pass 1 already flagged the overflow and the prologue
    // reserved the three consecutive shuffle registers.
    c.set_temp_checkmax(1);
    c.func.temp_first = 1;
    c.func.shuffle1 = 1;
    c.func.shuffle2 = 2;
    c.func.shuffle3 = 3;

    let _ = c.alloc_temps(256).expect("256 temps");
    let top = c.get_temp() - 1;
    assert_eq!(top, 256);

    c.emit_a_b_c(Op::Add as u32, top, top, top).expect("emit");
    assert!(c.func.needs_shuffle, "operand index 256 exceeds the 8-bit slots");

    // LDREG loads feed the operation through the shuffle registers and
    // an STREG moves the result back out:
    //   LDREG s2 <- r256, LDREG s3 <- r256, ADD s1, STREG s1 -> r256
    let ops: Vec<u8> = c.func.code.iter().map(|ci| dec_op(ci.ins)).collect();
    assert_eq!(
        ops,
        vec![Op::LdReg as u8, Op::LdReg as u8, Op::Add as u8, Op::StReg as u8]
    );
    assert_eq!(dec_bc(c.func.code[0].ins), 256);
    assert_eq!(dec_a(c.func.code[2].ins), 1, "result built in the first shuffle register");
    assert_eq!(dec_a(c.func.code[3].ins), 1);
    assert_eq!(dec_bc(c.func.code[3].ins), 256, "stored to the real target register");
}

#[test]
fn small_function_has_no_shuffling() {
    let (tpl, _) = compile_funcexpr("function f(a){ return a; }");
    assert!(!has_op(&tpl, Op::StReg));
    // The frame is just the formal; no temps were ever needed.
    assert_eq!(tpl.nregs, 1);
    assert_eq!(tpl.nargs, 1);
}

#[test]
fn for_in_with_property_lhs_writes_through_putprop() {
    let (tpl, _) = compile_program("for (o[k] in y) { z; }");
    assert!(has_extraop(&tpl, ExtraOp::InitEnum));
    assert!(has_extraop(&tpl, ExtraOp::NextEnum));
    assert!(has_op(&tpl, Op::PutProp));
    assert_invariants(&tpl);
}

#[test]
fn for_in_with_var_register_binding() {
    let (tpl, _) = compile_funcexpr("function f(o){ for (var k in o) { k; } }");
    assert!(has_extraop(&tpl, ExtraOp::InitEnum));
    assert!(has_extraop(&tpl, ExtraOp::NextEnum));
    // The register-bound loop variable is written by a plain move.
    assert!(has_op(&tpl, Op::LdReg));
    assert_invariants(&tpl);
}

/*
 *  Constant pool
 */

#[test]
fn constant_pool_deduplicates_strings() {
    let (tpl, interner) = compile_program("var a = \"s\"; var b = \"s\";");
    let count = tpl
        .consts
        .iter()
        .filter(|v| matches!(v, Val::Str(s) if interner.resolve(*s) == "s"))
        .count();
    assert_eq!(count, 1);
}

#[test]
fn constant_pool_keeps_zero_signs_apart() {
    let (tpl, _) = compile_program("var a = 0; var b = -0;");
    let zeros: Vec<f64> = tpl
        .consts
        .iter()
        .filter_map(|v| match v {
            Val::Num(n) if *n == 0.0 => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(zeros.len(), 2);
    assert_eq!(zeros.iter().filter(|n| n.is_sign_negative()).count(), 1);
}

#[test]
fn literal_arithmetic_folds_at_compile_time() {
    let (tpl, _) = compile_program("var x = 1 + 2 * 3;");
    assert!(!has_op(&tpl, Op::Add));
    assert!(!has_op(&tpl, Op::Mul));
    // 7 is loaded as an immediate integer, not a constant.
    assert!(has_op(&tpl, Op::LdInt));

    let (tpl, interner) = compile_program("var s = \"a\" + \"b\";");
    assert!(!has_op(&tpl, Op::Add));
    assert!(const_str_index(&tpl, &interner, "ab").is_some());
}

/*
 *  Determinism
 */

#[test]
fn compiling_twice_yields_identical_bytecode() {
    let src = "function f(n){ var s = 0; for (var i = 0; i < n; i++) { s += i; } return s; } f(10);";
    let (tpl1, _) = compile_program(src);
    let (tpl2, _) = compile_program(src);
    assert_eq!(tpl1.code, tpl2.code);
    assert_eq!(tpl1.consts.len(), tpl2.consts.len());
    for (a, b) in tpl1.consts.iter().zip(tpl2.consts.iter()) {
        assert!(a.same_value(b));
    }
    assert_eq!(tpl1.nregs, tpl2.nregs);
}

/*
 *  Labels
 */

#[test]
fn labelled_block_break_lands_on_endlabel() {
    let (tpl, _) = compile_program("foo: { break foo; }");
    let (pc_label, _) = find_op(&tpl, Op::Label).expect("label site");
    let (pc_endlabel, _) = find_op(&tpl, Op::EndLabel).expect("label pop");

    // The site's break slot is a jump to the ENDLABEL.
    let break_slot = tpl.code[pc_label + 1];
    assert_eq!(dec_op(break_slot), Op::Jump as u8);
    assert_eq!(jump_target(pc_label + 1, break_slot), pc_endlabel as i64);
    assert_invariants(&tpl);
}

#[test]
fn duplicate_labels_rejected() {
    let err = compile_err("foo: foo: x;");
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn continue_to_non_iteration_label_rejected() {
    let err = compile_err("foo: { continue foo; }");
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn unresolvable_break_rejected() {
    let err = compile_err("break;");
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn switch_leaves_continue_slot_invalid() {
    let (tpl, _) = compile_program("switch (v) { case 1: a; break; default: b; }");
    let (pc_label, _) = find_op(&tpl, Op::Label).expect("switch label site");
    assert_eq!(dec_op(tpl.code[pc_label + 1]), Op::Jump as u8, "break slot patched");
    assert_eq!(
        dec_op(tpl.code[pc_label + 2]),
        Op::Invalid as u8,
        "continue slot never patched for a switch"
    );
    assert!(has_op(&tpl, Op::Seq), "case selectors use strict equality");
    assert_invariants(&tpl);
    assert_no_jump_to_jump(&tpl);
}

#[test]
fn labelled_loop_continue_compiles() {
    let (tpl, _) = compile_program("outer: for (var i = 0; i < 3; i++) { continue outer; }");
    assert_invariants(&tpl);
}

/*
 *  Strict mode restrictions
 */

#[test]
fn strict_mode_restrictions() {
    assert_eq!(compile_err("\"use strict\"; delete x;").kind, ErrorKind::Syntax);
    assert_eq!(compile_err("\"use strict\"; with (a) {}").kind, ErrorKind::Syntax);
    assert_eq!(compile_err("\"use strict\"; eval = 1;").kind, ErrorKind::Syntax);
    assert_eq!(compile_err("\"use strict\"; var eval;").kind, ErrorKind::Syntax);
    assert_eq!(compile_err("\"use strict\"; arguments++;").kind, ErrorKind::Syntax);
}

#[test]
fn return_outside_function_rejected() {
    assert_eq!(compile_err("return 1;").kind, ErrorKind::Syntax);
}

#[test]
fn strict_duplicate_formals_rejected_retroactively() {
    let options = CompileOptions {
        funcexpr: true,
        ..Default::default()
    };
    // The duplicate is only an error because the directive makes the
    // function strict after the formals were parsed.
    let err = compile("function f(a, a) { \"use strict\"; }", None, &options)
        .expect_err("duplicate formals in strict mode");
    assert_eq!(err.kind, ErrorKind::Syntax);

    // Without the directive the last formal wins.
    compile_funcexpr("function f(a, a) { return a; }");
}

#[test]
fn strict_function_name_checked_after_body() {
    let options = CompileOptions {
        funcexpr: true,
        ..Default::default()
    };
    let err = compile("function eval() { \"use strict\"; }", None, &options)
        .expect_err("strict function cannot be named eval");
    assert_eq!(err.kind, ErrorKind::Syntax);
}

#[test]
fn non_strict_delete_identifier_compiles() {
    let (tpl, _) = compile_program("delete x;");
    assert!(has_op(&tpl, Op::DelVar));
}

/*
 *  Tail calls
 */

#[test]
fn return_of_call_becomes_tail_call() {
    let (tpl, _) = compile_funcexpr("function f(){ return f(); }");
    let (_, call) = find_op(&tpl, Op::Call).expect("call emitted");
    assert_ne!(dec_a(call) & CALL_FLAG_TAILCALL, 0, "TAILCALL flag back-patched");

    // The explicit RETURN is suppressed; only the body-final return
    // remains and it carries no value.
    let returns: Vec<u32> = tpl
        .code
        .iter()
        .filter(|&&ins| dec_op(ins) == Op::Return as u8)
        .copied()
        .collect();
    assert_eq!(returns.len(), 1);
    assert_eq!(dec_a(returns[0]) & RETURN_FLAG_HAVE_RETVAL, 0);
}

#[test]
fn caller_property_option_disables_tail_calls() {
    let options = CompileOptions {
        funcexpr: true,
        function_caller_property: true,
        ..Default::default()
    };
    let (tpl, _) = compile("function f(){ return f(); }", None, &options).expect("compiles");
    let (_, call) = find_op(&tpl, Op::Call).expect("call emitted");
    assert_eq!(dec_a(call) & CALL_FLAG_TAILCALL, 0);
    assert!(
        tpl.code
            .iter()
            .any(|&ins| dec_op(ins) == Op::Return as u8 && dec_a(ins) & RETURN_FLAG_HAVE_RETVAL != 0),
        "an explicit RETURN carries the call result"
    );
}

#[test]
fn no_tail_call_inside_try() {
    let (tpl, _) = compile_funcexpr("function f(){ try { return f(); } finally { g(); } }");
    let (_, call) = find_op(&tpl, Op::Call).expect("call emitted");
    assert_eq!(dec_a(call) & CALL_FLAG_TAILCALL, 0, "catcher active, no tail call");
}

/*
 *  Inner functions
 */

#[test]
fn inner_functions_compile_once_and_keep_their_order() {
    let (tpl, interner) = compile_funcexpr(
        "function outer(){ function a(x){ return x; } function b(){ return a(1); } return b; }",
    );
    assert_eq!(tpl.funcs.len(), 2);
    assert_eq!(interner.resolve(tpl.funcs[0].name.expect("name")), "a");
    assert_eq!(interner.resolve(tpl.funcs[1].name.expect("name")), "b");
    assert_eq!(tpl.funcs[0].nargs, 1);
    assert!(has_op(&tpl, Op::Closure), "declarations instantiated in the prologue");
    assert_invariants(&tpl);
}

#[test]
fn function_expression_closure() {
    let (tpl, _) = compile_program("var f = function(x){ return x * 2; };");
    assert_eq!(tpl.funcs.len(), 1);
    assert!(!tpl.funcs[0].name_binding, "anonymous expression has no name binding");
    assert!(has_op(&tpl, Op::Closure));
}

#[test]
fn getter_setter_in_object_literal() {
    let (tpl, _) = compile_program("var o = { get x() { return 1; }, set x(v) { } };");
    assert_eq!(tpl.funcs.len(), 2);
    assert!(has_extraop(&tpl, ExtraOp::InitGet));
    assert!(has_extraop(&tpl, ExtraOp::InitSet));
    assert_invariants(&tpl);
}

/*
 *  Literals and expressions
 */

#[test]
fn regexp_literal_stores_source_and_flags() {
    let (tpl, interner) = compile_program("var re = /ab+c/gi;");
    assert!(has_op(&tpl, Op::RegExp));
    assert!(const_str_index(&tpl, &interner, "ab+c").is_some());
    assert!(const_str_index(&tpl, &interner, "gi").is_some());

    // After an identifier a slash is division.
    let (tpl, _) = compile_program("var x = a / b;");
    assert!(has_op(&tpl, Op::Div));
    assert!(!has_op(&tpl, Op::RegExp));
}

#[test]
fn array_literal_with_elisions_sets_length() {
    let (tpl, _) = compile_program("var a = [1,,2,,];");
    assert!(has_extraop(&tpl, ExtraOp::NewArr));
    assert!(has_op(&tpl, Op::MPutArr));
    assert!(has_extraop(&tpl, ExtraOp::SetALen), "trailing elision adjusts length");
}

#[test]
fn array_literal_without_trailing_elision_has_no_setalen() {
    let (tpl, _) = compile_program("var a = [1,2,3];");
    assert!(has_op(&tpl, Op::MPutArr));
    assert!(!has_extraop(&tpl, ExtraOp::SetALen));
}

#[test]
fn new_expression_with_and_without_arguments() {
    let (tpl, _) = compile_program("var a = new Foo(1, 2); var b = new Bar;");
    let news: Vec<u32> = tpl
        .code
        .iter()
        .filter(|&&ins| dec_op(ins) == Op::New as u8)
        .copied()
        .collect();
    assert_eq!(news.len(), 2);
    let counts: Vec<u32> = news.iter().map(|&ins| dec_c(ins)).collect();
    assert!(counts.contains(&2));
    assert!(counts.contains(&0));
}

#[test]
fn postfix_increment_after_line_terminator_terminates_expression() {
    // "a \n ++b" is two statements: 'a;' and '++b;'.
    let (tpl, _) = compile_program("a\n++\nb;");
    assert!(has_extraop(&tpl, ExtraOp::Inc));
    assert_invariants(&tpl);
}

#[test]
fn typeof_unresolvable_identifier_uses_special_opcode() {
    let (tpl, _) = compile_program("typeof missing;");
    assert!(has_extraop(&tpl, ExtraOp::TypeofId));

    let (tpl, _) = compile_funcexpr("function f(a){ return typeof a; }");
    assert!(has_extraop(&tpl, ExtraOp::Typeof));
    assert!(!has_extraop(&tpl, ExtraOp::TypeofId));
}

#[test]
fn logical_and_or_short_circuit_via_conditional_skip() {
    let (tpl, _) = compile_program("var x = a && b || c;");
    let ifs = tpl
        .code
        .iter()
        .filter(|&&ins| dec_op(ins) == Op::If as u8)
        .count();
    assert_eq!(ifs, 2);
    assert_invariants(&tpl);
}

#[test]
fn conditional_expression_two_branches() {
    let (tpl, _) = compile_program("var x = c ? 1 : 2;");
    assert!(has_op(&tpl, Op::If));
    assert!(has_op(&tpl, Op::Jump));
    assert_invariants(&tpl);
}

#[test]
fn comma_and_assignment_shapes() {
    let (tpl, _) = compile_program("var x; x = 1, x += 2;");
    assert!(has_op(&tpl, Op::Add), "compound assignment reads and adds");

    // Assigning to a call result is a runtime error, not a syntax error.
    let (tpl, _) = compile_program("f() = 1;");
    assert!(has_extraop(&tpl, ExtraOp::InvLhs));
}

/*
 *  Error reporting
 */

#[test]
fn errors_carry_line_numbers() {
    let err = compile_err("var a;\nvar b = ;");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.line, Some(2));
    assert!(err.to_string().contains("(line 2)"), "display: {}", err);
}

#[test]
fn unterminated_statement_rejected() {
    // Two expressions on one line with no separator.
    assert_eq!(compile_err("var a = 1 var b = 2").kind, ErrorKind::Syntax);
}

#[test]
fn try_without_catch_or_finally_rejected() {
    assert_eq!(compile_err("try { f(); }").kind, ErrorKind::Syntax);
}

/*
 *  Emitter and constant pool internals
 */

fn raw_compiler<'i>(interner: &'i mut Interner) -> Compiler<'static, 'i> {
    let mut c = Compiler::new("", None, CompileOptions::default(), interner);
    // Pretend the prologue reserved the shuffle registers.
    c.func.shuffle1 = 1;
    c.func.shuffle2 = 2;
    c.func.shuffle3 = 3;
    c
}

#[test]
fn emitter_shuffles_oversized_b_register() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    c.emit_a_b_c(Op::Add as u32, 0, 300, 1).expect("emit");

    assert_eq!(c.func.code.len(), 2);
    assert_eq!(dec_op(c.func.code[0].ins), Op::LdReg as u8);
    assert_eq!(dec_a(c.func.code[0].ins), 2); // shuffle2
    assert_eq!(dec_bc(c.func.code[0].ins), 300);
    assert_eq!(dec_op(c.func.code[1].ins), Op::Add as u8);
    assert_eq!(dec_b(c.func.code[1].ins), 2);
    assert!(c.func.needs_shuffle);
}

#[test]
fn emitter_shuffles_oversized_a_target_with_store() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    c.emit_a_b_c(Op::Add as u32, 300, 0, 1).expect("emit");

    assert_eq!(c.func.code.len(), 2);
    assert_eq!(dec_op(c.func.code[0].ins), Op::Add as u8);
    assert_eq!(dec_a(c.func.code[0].ins), 1); // shuffle1
    assert_eq!(dec_op(c.func.code[1].ins), Op::StReg as u8);
    assert_eq!(dec_bc(c.func.code[1].ins), 300);
}

#[test]
fn emitter_switches_call_to_indirect_variant() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    c.emit_a_b_c(
        Op::Call as u32 | EMIT_FLAG_NO_SHUFFLE_A | EMIT_FLAG_NO_SHUFFLE_C,
        0,
        300,
        2,
    )
    .expect("emit");

    assert_eq!(dec_op(c.func.code[0].ins), Op::LdInt as u8);
    assert_eq!(dec_op(c.func.code[1].ins), Op::CallI as u8);
    assert_eq!(dec_b(c.func.code[1].ins), 2); // shuffle2 holds the base
}

#[test]
fn emitter_rejects_oversized_operand_when_shuffle_prohibited() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    let err = c
        .emit_a_b_c(Op::Call as u32 | EMIT_FLAG_NO_SHUFFLE_A, 300, 0, 0)
        .expect_err("slot A carries flags, cannot shuffle");
    assert_eq!(err.kind, ErrorKind::Range);
}

#[test]
fn emitter_loads_oversized_constant_through_shuffle_register() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    c.emit_a_b_c(Op::Add as u32, 0, CONST_MARKER | 300, 1).expect("emit");

    assert_eq!(dec_op(c.func.code[0].ins), Op::LdConst as u8);
    assert_eq!(dec_bc(c.func.code[0].ins), 300);
    let add = c.func.code[1].ins;
    assert_eq!(dec_op(add), Op::Add as u8);
    assert_eq!(dec_b(add), 2); // shuffle2, no const bit
}

#[test]
fn small_constant_uses_slot_const_bit() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);
    c.emit_a_b_c(Op::Add as u32, 0, 1, CONST_MARKER | 5).expect("emit");
    let add = c.func.code[0].ins;
    assert_ne!(dec_c(add) & SLOT_CONST_BIT, 0);
    assert_eq!(dec_c(add) & 0xff, 5);
}

#[test]
fn constant_interning_uses_same_value() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);

    let a = c.get_const(Val::Num(1.0)).expect("const");
    let b = c.get_const(Val::Num(1.0)).expect("const");
    assert_eq!(a, b);

    let nan1 = c.get_const(Val::Num(f64::NAN)).expect("const");
    let nan2 = c.get_const(Val::Num(f64::NAN)).expect("const");
    assert_eq!(nan1, nan2, "NaN is SameValue to NaN");

    let pz = c.get_const(Val::Num(0.0)).expect("const");
    let nz = c.get_const(Val::Num(-0.0)).expect("const");
    assert_ne!(pz, nz, "signed zeros stay distinct");

    assert_eq!(c.func.consts.len(), 4);
}

#[test]
fn peephole_flattens_jump_chains_and_is_idempotent() {
    let mut interner = Interner::new();
    let mut c = raw_compiler(&mut interner);

    let j0 = c.emit_jump_empty();
    let j1 = c.emit_jump_empty();
    c.emit_invalid();
    c.patch_jump(Some(j0), j1);
    c.patch_jump(Some(j1), 2);

    c.peephole_optimize_bytecode();
    assert_eq!(jump_target(0, c.func.code[0].ins), 2);
    assert_eq!(jump_target(1, c.func.code[1].ins), 2);

    let before: Vec<u32> = c.func.code.iter().map(|ci| ci.ins).collect();
    c.peephole_optimize_bytecode();
    let after: Vec<u32> = c.func.code.iter().map(|ci| ci.ins).collect();
    assert_eq!(before, after, "second pass is a no-op");
}

/*
 *  General invariants over a small corpus
 */

#[test]
fn corpus_compiles_with_valid_bytecode() {
    let corpus = [
        "var x = {};",
        "x.y.z = a[b][c];",
        "if (a) b; else if (c) d; else e;",
        "while (a) { if (b) break; else continue; }",
        "do { a; } while (b);",
        "var s = 0; for (var i = 0, j = 1; i < j; i++) s += i;",
        "for (;;) { break; }",
        "var o = { a: 1, \"b\": 2, 3: c };",
        "void 0; typeof a; !b; ~c; -d; +e;",
        "a instanceof B; a in b;",
        "function f(){ return; } f();",
        "var t = a ? b : c, u = a || b, v = a && b;",
        "throw new Error(\"boom\");",
        "switch (x) {}",
        "try { a; } catch (e) { b; }",
        "try { a; } finally { b; }",
        "l1: l2: for (;;) { break l1; }",
    ];
    for src in corpus {
        let (tpl, _) = compile_program(src);
        assert_invariants(&tpl);
    }
}

#[test]
fn eval_code_declares_configurable_bindings() {
    let options = CompileOptions {
        eval: true,
        ..Default::default()
    };
    let (tpl, _) = compile("var x;", None, &options).expect("eval code compiles");
    let (_, declvar) = find_op(&tpl, Op::DeclVar).expect("DECLVAR in eval prologue");
    assert_ne!(
        dec_a(declvar) & crate::vm::bytecode::PROP_FLAG_CONFIGURABLE,
        0,
        "eval bindings are configurable"
    );
}

#[test]
fn function_declaration_in_global_code_uses_declvar() {
    let (tpl, _) = compile_program("function f(){}");
    let (_, declvar) = find_op(&tpl, Op::DeclVar).expect("DECLVAR for function binding");
    assert_ne!(dec_a(declvar) & crate::vm::bytecode::DECLVAR_FLAG_FUNC_DECL, 0);
    assert!(has_op(&tpl, Op::Closure));
}
