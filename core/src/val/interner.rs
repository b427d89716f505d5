use rustc_hash::FxHashMap as FastHashMap;

/// Handle to an interned string.  Handles from the same `Interner` compare
/// by identity: two `Sym`s are equal iff their strings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(pub u32);

/// Append-only string registry.  The compiler interns every identifier and
/// string literal once; all later comparisons (varmap lookups, `eval`
/// detection, directive recognition) are integer compares.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    map: FastHashMap<Box<str>, Sym>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            map: FastHashMap::default(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Sym {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let sym = Sym(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.map.insert(boxed, sym);
        sym
    }

    pub fn resolve(&self, sym: Sym) -> &str {
        &self.strings[sym.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
