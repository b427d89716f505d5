mod interner;

pub use interner::{Interner, Sym};

#[cfg(test)]
#[path = "val_test.rs"]
mod val_test;

/// Compile-time constant values.  This is the value universe the compiler
/// itself can observe: literals, folded literal arithmetic, and interned
/// identifier/string payloads.  Runtime objects never appear here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    Undef,
    Null,
    Bool(bool),
    Num(f64),
    Str(Sym),
}

impl Val {
    #[inline]
    pub fn is_num(&self) -> bool {
        matches!(self, Val::Num(_))
    }

    #[inline]
    pub fn is_str(&self) -> bool {
        matches!(self, Val::Str(_))
    }

    /// ES5 SameValue (9.12).  Unlike `==` on `f64`, NaN compares equal to
    /// NaN and `+0` is distinguished from `-0`.  Constant pool entries are
    /// deduplicated with this relation: strict equality would merge `+0`
    /// and `-0`, which have observable different behavior at runtime.
    pub fn same_value(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Undef, Val::Undef) => true,
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_negative() == b.is_sign_negative()
                }
            }
            _ => false,
        }
    }
}

/// Convert a number to its property-key string form.  Integral values in
/// the safe range print without a decimal point ("{1: x}" keys the string
/// "1"); everything else falls back to the shortest `f64` formatting.
pub fn number_to_key_string(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_finite() && n == n.trunc() && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}
