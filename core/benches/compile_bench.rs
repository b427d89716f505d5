use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rjs_core::{CompileOptions, compile};

const EXPR_HEAVY: &str = r#"
var acc = 0;
function mix(a, b, c) {
    return (a + b) * (b + c) / (a * c + 1) - (a % (b + 1)) + (c << 2 >> 1);
}
for (var i = 0; i < 100; i++) {
    acc += mix(i, i * 2, i * 3) + (i & 1 ? -i : +i);
}
acc;
"#;

const STMT_HEAVY: &str = r#"
function classify(x) {
    var out = [];
    switch (x % 5) {
    case 0: out.push("zero"); break;
    case 1:
    case 2: out.push("low"); break;
    case 3: out.push("three");
    default: out.push("rest");
    }
    try {
        if (x > 10) { throw { code: x }; }
    } catch (e) {
        out.push(e.code);
    } finally {
        out.push("done");
    }
    for (var k in { a: 1, b: 2 }) { out.push(k); }
    return out;
}
classify(7);
"#;

const NESTED_FUNCS: &str = r#"
function outer(n) {
    function middle(m) {
        function inner(i) { return i * i; }
        return inner(m) + inner(m + 1);
    }
    var sum = 0;
    for (var i = 0; i < n; i++) { sum += middle(i); }
    return sum;
}
outer(10);
"#;

fn bench_compile(c: &mut Criterion) {
    let options = CompileOptions::default();

    c.bench_function("compile_expr_heavy", |b| {
        b.iter(|| {
            let out = compile(black_box(EXPR_HEAVY), Some("bench.js"), &options).expect("compile");
            black_box(out);
        })
    });

    c.bench_function("compile_stmt_heavy", |b| {
        b.iter(|| {
            let out = compile(black_box(STMT_HEAVY), Some("bench.js"), &options).expect("compile");
            black_box(out);
        })
    });

    c.bench_function("compile_nested_funcs", |b| {
        b.iter(|| {
            let out = compile(black_box(NESTED_FUNCS), Some("bench.js"), &options).expect("compile");
            black_box(out);
        })
    });
}

criterion_group!(compile, bench_compile);
criterion_main!(compile);
