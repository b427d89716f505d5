use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use rjs_core::vm::bytecode::{self, ExtraOp, Op};
use rjs_core::{CompileOptions, FuncTemplate, Interner, Val, compile};

/// Compile ECMAScript source to register bytecode and dump the result.
#[derive(Debug, Parser)]
#[command(name = "rjsc", version)]
struct Args {
    /// Source file; reads stdin when omitted.
    file: Option<PathBuf>,

    /// Compile as eval code instead of a program.
    #[arg(long)]
    eval: bool,

    /// Start in strict mode.
    #[arg(long)]
    strict: bool,

    /// Compile the input as a function expression.
    #[arg(long)]
    funcexpr: bool,

    /// Emit the disassembly as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct TemplateDump {
    name: Option<String>,
    nargs: u32,
    nregs: u32,
    strict: bool,
    consts: Vec<String>,
    code: Vec<String>,
    formals: Option<Vec<String>>,
    varmap: Option<Vec<(String, u32)>>,
    funcs: Vec<TemplateDump>,
}

fn const_repr(v: &Val, interner: &Interner) -> String {
    match v {
        Val::Undef => "undefined".to_string(),
        Val::Null => "null".to_string(),
        Val::Bool(b) => b.to_string(),
        Val::Num(n) => n.to_string(),
        Val::Str(s) => format!("{:?}", interner.resolve(*s)),
    }
}

fn disasm_instr(pc: usize, ins: u32) -> String {
    let raw_op = bytecode::dec_op(ins);
    let Some(op) = Op::from_raw(raw_op) else {
        return format!("?<{raw_op}>");
    };
    match op {
        Op::Jump => format!("JUMP -> {}", bytecode::jump_target(pc, ins)),
        Op::Extra => {
            let a = bytecode::dec_a(ins) as u8;
            let name = ExtraOp::from_raw(a).map(|x| x.name()).unwrap_or("?");
            format!(
                "{} b={} c={}",
                name,
                bytecode::dec_b(ins),
                bytecode::dec_c(ins)
            )
        }
        _ => format!(
            "{} a={} b={} c={}",
            op.name(),
            bytecode::dec_a(ins),
            bytecode::dec_b(ins),
            bytecode::dec_c(ins)
        ),
    }
}

fn dump_template(tpl: &Rc<FuncTemplate>, interner: &Interner) -> TemplateDump {
    TemplateDump {
        name: tpl.name.map(|s| interner.resolve(s).to_string()),
        nargs: tpl.nargs,
        nregs: tpl.nregs,
        strict: tpl.is_strict,
        consts: tpl.consts.iter().map(|v| const_repr(v, interner)).collect(),
        code: tpl
            .code
            .iter()
            .enumerate()
            .map(|(pc, &ins)| disasm_instr(pc, ins))
            .collect(),
        formals: tpl
            .formals
            .as_ref()
            .map(|fs| fs.iter().map(|s| interner.resolve(*s).to_string()).collect()),
        varmap: tpl.varmap.as_ref().map(|vm| {
            vm.iter()
                .map(|&(s, r)| (interner.resolve(s).to_string(), r))
                .collect()
        }),
        funcs: tpl.funcs.iter().map(|f| dump_template(f, interner)).collect(),
    }
}

fn print_text(dump: &TemplateDump, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{}function {} nargs={} nregs={}{}",
        indent,
        dump.name.as_deref().unwrap_or("(anonymous)"),
        dump.nargs,
        dump.nregs,
        if dump.strict { " strict" } else { "" }
    );
    for (i, c) in dump.consts.iter().enumerate() {
        println!("{}  const[{}] = {}", indent, i, c);
    }
    for (pc, line) in dump.code.iter().enumerate() {
        println!("{}  {:4}  {}", indent, pc, line);
    }
    for f in &dump.funcs {
        print_text(f, depth + 1);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (source, filename) = match &args.file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            (text, Some(path.display().to_string()))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading stdin")?;
            (text, None)
        }
    };

    let options = CompileOptions {
        eval: args.eval,
        strict: args.strict,
        funcexpr: args.funcexpr,
        function_caller_property: false,
    };

    let (template, interner) =
        compile(&source, filename.as_deref(), &options).map_err(|e| anyhow::anyhow!("{e}"))?;

    let dump = dump_template(&template, &interner);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&dump)?);
    } else {
        print_text(&dump, 0);
    }
    Ok(())
}
