use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lpp::binding::{HostObject, THIS_FIELD};
use lpp::RuntimeContext;

struct Accumulator {
    total: i64,
}

fn bench_handle_clone(c: &mut Criterion) {
    let ctx = RuntimeContext::new();
    let handle = lpp::ValueHandle::from_value(&ctx, "shared");

    c.bench_function("handle clone+drop 1k", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                black_box(handle.clone());
            }
        })
    });
}

fn bench_set_get(c: &mut Criterion) {
    let ctx = RuntimeContext::new();
    let mut handle = ctx.new_value();

    c.bench_function("handle set+get 1k", |b| {
        b.iter(|| {
            let mut sum = 0i64;
            for i in 0..1000i64 {
                handle.set(i);
                sum += handle.get::<i64>();
            }
            black_box(sum)
        })
    });
}

fn bench_table_fields(c: &mut Criterion) {
    let ctx = RuntimeContext::new();
    let mut table = ctx.new_value();
    table.create_table();

    c.bench_function("table set_index+index 1k", |b| {
        b.iter(|| {
            for i in 1..=1000i64 {
                table.set_index(i, i * 2);
            }
            let mut sum = 0i64;
            for i in 1..=1000i64 {
                sum += table.index(i).get::<i64>();
            }
            black_box(sum)
        })
    });
}

fn bench_iterate(c: &mut Criterion) {
    let ctx = RuntimeContext::new();
    let mut table = ctx.new_value();
    table.create_table();
    for i in 1..=1000i64 {
        table.set_index(i, i);
    }

    c.bench_function("iterate 1k pairs", |b| {
        b.iter(|| {
            let sum: i64 = table.pairs().map(|(_, v)| v.get::<i64>()).sum();
            black_box(sum)
        })
    });
}

fn bench_bound_method(c: &mut Criterion) {
    let ctx = RuntimeContext::new();
    let mut obj = ctx.new_value();
    obj.create_table();
    obj.set_field(THIS_FIELD, HostObject::new(Accumulator { total: 0 }));
    obj.bind_method("add", |this: &mut Accumulator, n: i64| {
        this.total += n;
        this.total
    });

    c.bench_function("bound method call 1k", |b| {
        b.iter(|| {
            for i in 0..1000i64 {
                black_box(obj.call_with("add", (i,)));
            }
        })
    });
}

fn bench_load_source(c: &mut Criterion) {
    let source = r#"
        window = { width = 800, height = 600, title = "main" }
        levels = { "easy", "normal", "hard", [10] = "secret" }
        volume = 0.75
        fullscreen = false
    "#;

    c.bench_function("load data chunk", |b| {
        b.iter(|| {
            let ctx = RuntimeContext::new();
            black_box(ctx.load_source("settings", source))
        })
    });
}

criterion_group!(
    benches,
    bench_handle_clone,
    bench_set_get,
    bench_table_fields,
    bench_iterate,
    bench_bound_method,
    bench_load_source,
);
criterion_main!(benches);
