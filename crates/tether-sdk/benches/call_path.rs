use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::cell::Cell;
use std::rc::Rc;
use tether_sdk::prelude::*;

fn bench_bound_call(c: &mut Criterion) {
    let state = State::new();
    push_callback(&state, |a: i64, b: i64| a + b);
    state.set_global("add").unwrap();

    c.bench_function("call_add", |b| {
        b.iter(|| {
            state.get_global("add").unwrap();
            push(&state, (black_box(2i64), black_box(3i64)));
            state.call(2, 1).unwrap();
            pop::<i64>(&state).unwrap()
        });
    });
}

fn bench_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversions");
    let state = State::new();

    for len in [8usize, 64, 512] {
        let values: Vec<i64> = (0..len as i64).collect();
        group.bench_with_input(BenchmarkId::new("vec_round_trip", len), &values, |b, values| {
            b.iter(|| {
                push(&state, black_box(values.clone()));
                pop::<Vec<i64>>(&state).unwrap()
            });
        });
    }

    group.bench_function("tuple_round_trip", |b| {
        b.iter(|| {
            push(&state, black_box((1i64, "two", 3.0f64, true)));
            pop::<(i64, String, f64, bool)>(&state).unwrap()
        });
    });

    group.finish();
}

struct Counter {
    value: Cell<i64>,
}

impl Class for Counter {
    const NAME: &'static str = "Counter";

    fn build_metatable(state: &State, metatable: i32) -> BindResult<()> {
        raw_set_property(
            state,
            metatable,
            vec![(
                "value",
                Property::read_write(|c: &Counter| c.value.get(), |c: &Counter, v: i64| c.value.set(v)),
            )],
        )
    }
}

fn bench_properties(c: &mut Criterion) {
    let mut group = c.benchmark_group("properties");
    let state = State::new();
    let _counter: Rc<Counter> = MetaTable::new_instance(&state, Counter { value: Cell::new(0) }).unwrap();

    group.bench_function("get", |b| {
        b.iter(|| pget_and_pop::<i64, _>(&state, 1, black_box("value")).unwrap());
    });

    group.bench_function("set", |b| {
        b.iter(|| pset(&state, 1, ("value", black_box(7i64))).unwrap());
    });

    group.finish();
}

fn bench_host_to_script(c: &mut Criterion) {
    let state = State::new();
    push_callback(&state, |n: i64| n * 2);
    let callback: Callback<i64, i64> = pop(&state).unwrap();

    c.bench_function("callback_call", |b| {
        b.iter(|| callback.call(black_box(21)));
    });
}

criterion_group!(
    benches,
    bench_bound_call,
    bench_conversions,
    bench_properties,
    bench_host_to_script
);
criterion_main!(benches);
