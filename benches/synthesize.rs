//! Benchmarks for the synthesis pipeline.
//!
//! Measures the full front end (preparation, graph construction, replay,
//! projection) over fixture loops of increasing shape complexity.

extern crate loomsynth;

use criterion::{criterion_group, criterion_main, Criterion};
use loomsynth::bytecode::BytecodeAssembler;
use loomsynth::synth::{
    FabricCapabilities, Intrinsics, KernelTable, MethodInfo, SynthesisConfig, SynthesisRequest,
    Synthesizer,
};
use std::hint::black_box;

fn request_for(code: Vec<u8>, start: i32, stop: i32) -> SynthesisRequest {
    SynthesisRequest {
        methods: vec![MethodInfo {
            name: "bench/hot".into(),
            code_ref: 0,
            code_len: code.len(),
            arg_count: 0,
            max_locals: 8,
        }],
        code_section: code,
        method_index: 0,
        start: start as usize,
        stop: stop as usize,
        invocation_history: Vec::new(),
        capabilities: FabricCapabilities::full(),
        intrinsics: Intrinsics::new(),
        kernels: KernelTable::new(),
        blacklist: Default::default(),
    }
}

/// A counting loop with a small arithmetic body.
fn bench_counting_loop(c: &mut Criterion) {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).sipush(1000).if_icmpge_fwd("exit");
    asm.iload(2).iload(1).iadd().istore(2);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let code = asm.finish();

    c.bench_function("synth_counting_loop", |b| {
        b.iter(|| {
            let request = request_for(black_box(code.clone()), head, back);
            let outcome = Synthesizer::new(request, SynthesisConfig::default())
                .generate()
                .unwrap();
            black_box(outcome)
        });
    });
}

/// An array-summing loop exercising the access histories.
fn bench_array_sum_loop(c: &mut Criterion) {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).sipush(1000).if_icmpge_fwd("exit");
    asm.aload(0).iload(1).iaload();
    asm.iload(2).iadd().istore(2);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let code = asm.finish();

    c.bench_function("synth_array_sum_loop", |b| {
        b.iter(|| {
            let request = request_for(black_box(code.clone()), head, back);
            let outcome = Synthesizer::new(request, SynthesisConfig::default())
                .generate()
                .unwrap();
            black_box(outcome)
        });
    });
}

/// The same array loop unrolled fourfold.
fn bench_unrolled_loop(c: &mut Criterion) {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).sipush(1000).if_icmpge_fwd("exit");
    asm.aload(0).iload(1).iaload();
    asm.iload(2).iadd().istore(2);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let code = asm.finish();
    let config = SynthesisConfig {
        unroll: 4,
        ..SynthesisConfig::default()
    };

    c.bench_function("synth_unrolled_x4", |b| {
        b.iter(|| {
            let request = request_for(black_box(code.clone()), head, back);
            let outcome = Synthesizer::new(request, config.clone())
                .generate()
                .unwrap();
            black_box(outcome)
        });
    });
}

criterion_group!(
    benches,
    bench_counting_loop,
    bench_array_sum_loop,
    bench_unrolled_loop
);
criterion_main!(benches);
