use super::*;

#[test]
fn same_value_distinguishes_zero_signs() {
    assert!(Val::Num(0.0).same_value(&Val::Num(0.0)));
    assert!(Val::Num(-0.0).same_value(&Val::Num(-0.0)));
    assert!(!Val::Num(0.0).same_value(&Val::Num(-0.0)));
    assert!(!Val::Num(-0.0).same_value(&Val::Num(0.0)));
}

#[test]
fn same_value_treats_nan_as_equal() {
    assert!(Val::Num(f64::NAN).same_value(&Val::Num(f64::NAN)));
    assert!(!Val::Num(f64::NAN).same_value(&Val::Num(1.0)));
}

#[test]
fn same_value_across_types_is_false() {
    assert!(!Val::Undef.same_value(&Val::Null));
    assert!(!Val::Bool(false).same_value(&Val::Num(0.0)));
}

#[test]
fn interner_handles_compare_by_identity() {
    let mut interner = Interner::new();
    let a = interner.intern("foo");
    let b = interner.intern("foo");
    let c = interner.intern("bar");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(interner.resolve(a), "foo");
    assert_eq!(interner.resolve(c), "bar");
}

#[test]
fn number_key_strings() {
    assert_eq!(number_to_key_string(1.0), "1");
    assert_eq!(number_to_key_string(0.0), "0");
    assert_eq!(number_to_key_string(-0.0), "0");
    assert_eq!(number_to_key_string(1.5), "1.5");
    assert_eq!(number_to_key_string(-3.0), "-3");
}
