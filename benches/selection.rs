#![allow(unused)]
extern crate codesel;

use std::{hint::black_box, sync::Arc};

use codesel::prelude::*;
use codesel::selection::{build_bitmap, compile_ranges};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

const BASE: u64 = 0x40_0000;
const SIZE: u64 = 16 * 1024 * 1024;

/// Compile a large module with many interleaved include and exclude ranges
fn bench_build_bitmap(c: &mut Criterion) {
    let include: Vec<_> = (0..1024).map(|i| (i * 0x4000, i * 0x4000 + 0x3000)).collect();
    let exclude: Vec<_> = (0..1024).map(|i| (i * 0x4000 + 0x100, i * 0x4000 + 0x200)).collect();
    let include = compile_ranges(&include, BASE, SIZE).unwrap();
    let exclude = compile_ranges(&exclude, BASE, SIZE).unwrap();

    let mut group = c.benchmark_group("build_bitmap");
    group.throughput(Throughput::Elements(SIZE));
    group.bench_function("16MiB_2048_ranges", |b| {
        b.iter(|| {
            black_box(build_bitmap(
                black_box(&include),
                black_box(&exclude),
                BASE,
                SIZE as usize,
            ))
        });
    });
    group.finish();
}

/// Per-instruction decision on a path that already resolved its module
fn bench_instrumentation_needed(c: &mut Criterion) {
    let catalog = StaticCatalog::new().with_module("app", BASE, SIZE);
    let config = MemoryConfig::new().with_selection("app", "app", None, &[(0x0, SIZE / 2)], &[]);
    let selector = Arc::new(CodeSelector::initialize(&config, &catalog, SelectorConfig::quiet()));
    let dispatcher = Dispatcher::new(selector);
    let module = ModuleInstance::new("app", "pid-1", BASE, SIZE);
    let mut path = PathState::new();
    dispatcher.on_module_transition(&mut path, None, Some(&module));

    let mut group = c.benchmark_group("instrumentation_needed");
    group.throughput(Throughput::Elements(4096));
    group.bench_function("4096_instructions", |b| {
        b.iter(|| {
            for pc in (BASE..BASE + 4096 * 0x1000).step_by(0x1000) {
                black_box(dispatcher.instrumentation_needed(&mut path, &module, black_box(pc)));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_build_bitmap, bench_instrumentation_needed);
criterion_main!(benches);
