use std::rc::Rc;

use tracing::trace;

use super::driver::CompileOptions;
use crate::error::CompileError;
use crate::token::{Lexer, Tok, Token};
use rustc_hash::FxHashMap as FastHashMap;
use crate::val::{Interner, Sym, Val};
use crate::vm::bytecode::{BC_MAX, FuncTemplate, Instr};

pub(crate) const MAX_CONSTS: u32 = BC_MAX + 1;
pub(crate) const MAX_FUNCS: u32 = BC_MAX + 1;
pub(crate) const MAX_TEMPS: u32 = BC_MAX + 1;

/// Constant pool deduplication stays linear-scan but bounded: beyond this
/// window duplicates are tolerated so pathological functions do not turn
/// compilation quadratic.
pub(crate) const GETCONST_MAX_CONSTS_CHECK: usize = 256;

pub(crate) const RECURSION_LIMIT: u32 = 2500;

/// Compiler-internal reg/const encoding: a constant pool index carries this
/// marker bit, a plain register index does not.  The marker is far above
/// `BC_MAX` so it can never collide with a real index.
pub(crate) const CONST_MARKER: u32 = 0x8000_0000;

#[inline]
pub(crate) fn rc_is_const(rc: u32) -> bool {
    (rc & CONST_MARKER) != 0
}

#[inline]
pub(crate) fn rc_index(rc: u32) -> u32 {
    rc & !CONST_MARKER
}

/// Instruction plus the source line it was emitted for; the line column is
/// packed into the template's pc2line table at finalization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompilerInstr {
    pub ins: Instr,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Func(u32),
}

#[derive(Debug)]
pub(crate) struct InnerFunc {
    pub template: Rc<FuncTemplate>,
    /// Lexer point of the closing brace, recorded on pass 1 so pass 2 can
    /// seek past the body instead of reparsing it.
    pub lex_offset: usize,
    pub lex_line: u32,
}

pub(crate) const LABEL_ALLOW_BREAK: u8 = 1 << 0;
pub(crate) const LABEL_ALLOW_CONTINUE: u8 = 1 << 1;

/// A pending break/continue target.  `pc_label` points at the LABEL opcode;
/// the two following instruction slots are the break and continue jump
/// sites.  Labels are registered before the statement type is known, so
/// flags start empty and are filled in once the statement is identified.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LabelInfo {
    pub name: Sym,
    pub label_id: u32,
    pub catch_depth: u32,
    pub pc_label: usize,
    pub flags: u8,
}

/// Variable binding as seen by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarEntry {
    /// Bound to a frame register.
    Reg(u32),
    /// Declared, but must go through the runtime environment chain.  Used
    /// for eval/global bindings and for shadowed catch variables.
    Slow,
}

/// Insertion-ordered name-to-binding map.  Order matters: the cleaned-up
/// map is embedded into the function template and enumerated by the
/// runtime in insertion order.
#[derive(Debug, Default)]
pub(crate) struct VarMap {
    entries: Vec<(Sym, VarEntry)>,
    index: FastHashMap<Sym, usize>,
}

impl VarMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: FastHashMap::default(),
        }
    }

    pub fn get(&self, name: Sym) -> Option<VarEntry> {
        self.index.get(&name).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, name: Sym) -> bool {
        self.index.contains_key(&name)
    }

    /// Insert or overwrite, keeping the original insertion position on
    /// overwrite.  Returns the previous entry if any.
    pub fn insert(&mut self, name: Sym, entry: VarEntry) -> Option<VarEntry> {
        if let Some(&i) = self.index.get(&name) {
            let prev = self.entries[i].1;
            self.entries[i].1 = entry;
            Some(prev)
        } else {
            self.index.insert(name, self.entries.len());
            self.entries.push((name, entry));
            None
        }
    }

    /// Remove an entry entirely (catch-binding restore for a name that was
    /// absent before the catch block).
    pub fn remove(&mut self, name: Sym) -> Option<VarEntry> {
        let i = self.index.remove(&name)?;
        let (_, entry) = self.entries.remove(i);
        for v in self.index.values_mut() {
            if *v > i {
                *v -= 1;
            }
        }
        Some(entry)
    }

    /// Compact to register-bound entries only, in insertion order.  Slow
    /// sentinel entries exist only to track declarations during
    /// compilation and are dropped from the final template.
    pub fn cleanup(&self) -> Vec<(Sym, u32)> {
        self.entries
            .iter()
            .filter_map(|&(name, entry)| match entry {
                VarEntry::Reg(r) => Some((name, r)),
                VarEntry::Slow => None,
            })
            .collect()
    }
}

/// Per-function compilation state.  One of these exists per function being
/// compiled; descending into an inner function swaps a fresh state in and
/// restores the parent state afterwards.
#[derive(Debug, Default)]
pub(crate) struct FuncState {
    pub name: Option<Sym>,

    pub is_function: bool,
    pub is_eval: bool,
    pub is_global: bool,
    pub is_decl: bool,
    pub is_setget: bool,
    pub is_strict: bool,

    pub code: Vec<CompilerInstr>,
    pub consts: Vec<Val>,
    pub funcs: Vec<InnerFunc>,
    pub fnum_next: u32,
    pub decls: Vec<(Sym, DeclKind)>,
    pub argnames: Vec<Sym>,
    pub varmap: VarMap,
    pub labels: Vec<LabelInfo>,

    pub temp_first: u32,
    pub temp_next: u32,
    pub temp_max: u32,
    pub stmt_next: u32,
    pub label_next: u32,
    pub catch_depth: u32,
    pub with_depth: u32,

    // Expression parser bookkeeping; lives here because expression parsing
    // nests through inner function expressions.
    pub paren_level: u32,
    pub nud_count: u32,
    pub led_count: u32,
    pub allow_in: bool,
    pub reject_regexp_in_adv: bool,

    pub in_directive_prologue: bool,
    pub in_scanning: bool,

    /// Register receiving statement values for the implicit return of
    /// program/eval code; unset for function code.
    pub reg_stmt_value: Option<u32>,

    pub id_access_arguments: bool,
    pub id_access_slow: bool,
    pub may_direct_eval: bool,
    pub is_arguments_shadowed: bool,

    pub needs_shuffle: bool,
    pub shuffle1: u32,
    pub shuffle2: u32,
    pub shuffle3: u32,
}

impl FuncState {
    pub fn new() -> Self {
        FuncState::default()
    }

    /// Reset emission state between pass 1 and pass 2.  Inner function
    /// templates, declarations, and formals survive; so do the pass-1
    /// analysis results (`needs_shuffle`, `may_direct_eval`, `temp_max`)
    /// which the pass-2 prologue depends on.
    pub fn reset_for_pass2(&mut self) {
        self.code.clear();
        self.consts.clear();
        self.fnum_next = 0;
        self.labels.clear();
    }
}

/// Well-known interned strings used in compile-time comparisons.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnown {
    pub empty: Sym,
    pub eval: Sym,
    pub arguments: Sym,
    pub get: Sym,
    pub set: Sym,
    pub name_global: Sym,
}

impl WellKnown {
    pub fn intern(interner: &mut Interner) -> Self {
        Self {
            empty: interner.intern(""),
            eval: interner.intern("eval"),
            arguments: interner.intern("arguments"),
            get: interner.intern("get"),
            set: interner.intern("set"),
            name_global: interner.intern("global"),
        }
    }
}

pub(crate) struct Compiler<'src, 'i> {
    pub lex: Lexer<'src>,
    pub interner: &'i mut Interner,
    pub options: CompileOptions,
    pub filename: Option<Sym>,
    pub curr_token: Token,
    pub prev_token: Token,
    pub recursion_depth: u32,
    pub recursion_limit: u32,
    pub func: FuncState,
    pub wk: WellKnown,
}

impl<'src, 'i> Compiler<'src, 'i> {
    pub fn new(
        source: &'src str,
        filename: Option<&str>,
        options: CompileOptions,
        interner: &'i mut Interner,
    ) -> Self {
        let wk = WellKnown::intern(interner);
        let filename = filename.map(|f| interner.intern(f));
        Self {
            lex: Lexer::new(source),
            interner,
            options,
            filename,
            curr_token: Token::default(),
            prev_token: Token::default(),
            recursion_depth: 0,
            recursion_limit: RECURSION_LIMIT,
            func: FuncState::new(),
            wk,
        }
    }

    pub fn recursion_increase(&mut self) -> Result<(), CompileError> {
        if self.recursion_depth >= self.recursion_limit {
            return Err(CompileError::range("compiler recursion limit"));
        }
        self.recursion_depth += 1;
        Ok(())
    }

    pub fn recursion_decrease(&mut self) {
        debug_assert!(self.recursion_depth > 0);
        self.recursion_depth -= 1;
    }

    /// Advance the token window.  The current token decides whether a
    /// regexp literal may start at the next token: tokens that end an
    /// expression (identifiers, literals, `)`, `]`, `}`, `this`) are
    /// followed by division instead.  A one-shot reject flag covers the
    /// IdentifierName position after `.`, which the table cannot express.
    fn advance_helper(&mut self, expect: Option<Tok>) -> Result<(), CompileError> {
        let mut regexp = !super::expr::token_no_regexp(self.curr_token.tok);
        if self.func.reject_regexp_in_adv {
            self.func.reject_regexp_in_adv = false;
            regexp = false;
        }

        if let Some(expect) = expect {
            if self.curr_token.tok != expect {
                return Err(CompileError::syntax(format!(
                    "parse error (expected {:?}, got {:?})",
                    expect, self.curr_token.tok
                )));
            }
        }

        self.prev_token = self.curr_token;
        self.curr_token = self
            .lex
            .parse_next_token(self.interner, self.func.is_strict, regexp)?;
        Ok(())
    }

    pub fn advance(&mut self) -> Result<(), CompileError> {
        self.advance_helper(None)
    }

    pub fn advance_expect(&mut self, expect: Tok) -> Result<(), CompileError> {
        self.advance_helper(Some(expect))
    }

    /// Reset the token window so the next `advance` lexes in "regexp
    /// allowed" mode; used after every lexer seek.
    pub fn reset_token_window(&mut self) {
        self.curr_token = Token::default();
    }

    pub fn sym_text(&self, sym: Sym) -> &str {
        self.interner.resolve(sym)
    }

    pub fn is_eval_or_arguments(&self, sym: Sym) -> bool {
        sym == self.wk.eval || sym == self.wk.arguments
    }

    pub fn is_eval_or_arguments_in_strict_mode(&self, sym: Sym) -> bool {
        self.func.is_strict && self.is_eval_or_arguments(sym)
    }

    /*
     *  Temporary register bookkeeping
     */

    #[inline]
    pub fn get_temp(&self) -> u32 {
        self.func.temp_next
    }

    /// Set `temp_next` without touching the high-water mark.  Safe only
    /// for releasing temps or restoring a level that was reached through
    /// `alloc_temps` earlier (both keep `temp_next <= temp_max`).
    #[inline]
    pub fn set_temp(&mut self, temp_next: u32) {
        debug_assert!(temp_next <= self.func.temp_max);
        self.func.temp_next = temp_next;
    }

    pub fn set_temp_checkmax(&mut self, temp_next: u32) {
        self.func.temp_next = temp_next;
        if temp_next > self.func.temp_max {
            self.func.temp_max = temp_next;
        }
    }

    pub fn alloc_temps(&mut self, count: u32) -> Result<u32, CompileError> {
        let res = self.func.temp_next;
        self.func.temp_next += count;
        if self.func.temp_next > MAX_TEMPS {
            return Err(CompileError::range("out of temp registers"));
        }
        if self.func.temp_next > self.func.temp_max {
            self.func.temp_max = self.func.temp_next;
        }
        Ok(res)
    }

    pub fn alloc_temp(&mut self) -> Result<u32, CompileError> {
        self.alloc_temps(1)
    }

    /// A register is a temp iff it is at or above `temp_first`; registers
    /// below that hold named bindings and must not be clobbered.
    #[inline]
    pub fn is_temp(&self, regconst: u32) -> bool {
        !rc_is_const(regconst) && regconst >= self.func.temp_first
    }

    /*
     *  Constant pool
     */

    /// Intern a value into the constant pool, deduplicating with SameValue
    /// over a bounded window.  Returns the index with the const marker set.
    pub fn get_const(&mut self, v: Val) -> Result<u32, CompileError> {
        let n = self.func.consts.len();
        let n_check = n.min(GETCONST_MAX_CONSTS_CHECK);
        for (i, existing) in self.func.consts[..n_check].iter().enumerate() {
            if existing.same_value(&v) {
                return Ok(i as u32 | CONST_MARKER);
            }
        }
        if n as u32 >= MAX_CONSTS {
            return Err(CompileError::range("out of constants"));
        }
        self.func.consts.push(v);
        Ok(n as u32 | CONST_MARKER)
    }

    /*
     *  Labels
     */

    /// Register a pending label.  Duplicate non-empty labels are a syntax
    /// error; the empty label (unlabelled iteration/switch) may repeat.
    pub fn add_label(&mut self, name: Sym, pc_label: usize, label_id: u32) -> Result<(), CompileError> {
        if name != self.wk.empty {
            for li in self.func.labels.iter().rev() {
                if li.name == name {
                    return Err(CompileError::syntax("duplicate label"));
                }
            }
        }
        self.func.labels.push(LabelInfo {
            name,
            label_id,
            catch_depth: self.func.catch_depth,
            pc_label,
            flags: 0,
        });
        trace!(label_id, pc_label, "registered label");
        Ok(())
    }

    /// Update break/continue permissions for every label attached to a
    /// statement once its type is known.  Only the topmost run of labels
    /// can carry the id.
    pub fn update_label_flags(&mut self, label_id: u32, flags: u8) {
        for li in self.func.labels.iter_mut().rev() {
            if li.label_id != label_id {
                break;
            }
            li.flags = flags;
        }
    }

    /// Find the target for a break/continue.  A break matches the newest
    /// label with the name; a continue additionally requires an iteration
    /// statement, and may search deeper only through duplicate empty
    /// labels.  Returns (label_id, catch_depth, pc_label, is_closest).
    pub fn lookup_active_label(
        &self,
        name: Sym,
        is_break: bool,
    ) -> Result<(u32, u32, usize, bool), CompileError> {
        let len = self.func.labels.len();
        for (rev_i, li) in self.func.labels.iter().enumerate().rev() {
            if li.name != name {
                continue;
            }
            // All labels accept a break; only iteration labels accept a
            // continue.
            if is_break || (li.flags & LABEL_ALLOW_CONTINUE) != 0 {
                return Ok((li.label_id, li.catch_depth, li.pc_label, rev_i == len - 1));
            }
            // A continue matched a non-iteration label.  Only the empty
            // label can shadow a deeper match; an explicit label cannot be
            // duplicated, so this is unresolvable.
            if name != self.wk.empty {
                return Err(CompileError::syntax(
                    "continue label matches an invalid statement type",
                ));
            }
        }
        Err(CompileError::syntax("cannot resolve label"))
    }

    pub fn reset_labels_to_length(&mut self, len: usize) {
        self.func.labels.truncate(len);
    }
}
