//! End-to-end synthesis tests.
//!
//! These drive the complete pipeline through the public API:
//! 1. Build a synthesis window with [`BytecodeAssembler`]
//! 2. Run the [`Synthesizer`] over a method-table snapshot
//! 3. Verify the projected CDFG, loop forest, alias candidates, transfer
//!    counts and the bytecode patch

use std::collections::BTreeSet;

use loomsynth::bytecode::BytecodeAssembler;
use loomsynth::cdfg::Operator;
use loomsynth::synth::{
    FabricCapabilities, Intrinsics, KernelTable, MethodInfo, SynthesisConfig, SynthesisOutcome,
    SynthesisRequest, Synthesizer, REPLACED_BYTES,
};
use loomsynth::Error;

/// Builds a single-method request around an assembled window.
fn request_for(code: Vec<u8>, start: i32, stop: i32, max_locals: u16) -> SynthesisRequest {
    SynthesisRequest {
        methods: vec![MethodInfo {
            name: "app/Main/hot".into(),
            code_ref: 0,
            code_len: code.len(),
            arg_count: 0,
            max_locals,
        }],
        code_section: code,
        method_index: 0,
        start: start as usize,
        stop: stop as usize,
        invocation_history: Vec::new(),
        capabilities: FabricCapabilities::full(),
        intrinsics: Intrinsics::new(),
        kernels: KernelTable::new(),
        blacklist: BTreeSet::new(),
    }
}

fn synthesize(code: Vec<u8>, start: i32, stop: i32, config: SynthesisConfig) -> SynthesisOutcome {
    Synthesizer::new(request_for(code, start, stop, 4), config)
        .generate()
        .expect("window is synthesizable")
}

/// `for (; i < 10; i++) {}`
fn counting_loop() -> (Vec<u8>, i32, i32) {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    (asm.finish(), head, back)
}

fn count_op(outcome: &SynthesisOutcome, op: Operator) -> usize {
    outcome
        .cdfg
        .node_ids()
        .filter(|&n| outcome.cdfg.node(n).op == op)
        .count()
}

#[test]
fn test_straight_line_loop_scenario() {
    let (code, start, stop) = counting_loop();
    let config = SynthesisConfig {
        unroll: 1,
        cse: false,
        inline: false,
        ..SynthesisConfig::default()
    };
    let outcome = synthesize(code, start, stop, config);

    // One loop, controlled by the compare.
    assert_eq!(outcome.loops.loops.len(), 1);
    assert!(outcome.loops.loops[0].controller.is_some());
    // No merge nodes beyond the loop's own back-edge join survive.
    assert_eq!(count_op(&outcome, Operator::Mux), 0);
    // No array access, no alias candidates.
    assert!(outcome.aliases.is_empty());
    // The induction variable moves in and out.
    assert_eq!(outcome.locals_received, 1);
    assert_eq!(outcome.locals_sent, 1);
}

#[test]
fn test_constant_interning_yields_identical_nodes() {
    // Two separate pushes of 7 feed two separate additions.
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).bipush(7).iadd().istore(2);
    asm.iload(3).bipush(7).iadd().istore(3);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    let sevens: Vec<_> = outcome
        .cdfg
        .node_ids()
        .filter(|&n| {
            outcome.cdfg.node(n).op == Operator::Const && outcome.cdfg.node(n).value == Some(7)
        })
        .collect();
    assert_eq!(sevens.len(), 1, "equal constants project to one node");
}

#[test]
fn test_branch_merge_resolves_through_predicated_stores() {
    // if/else inside the loop body: the join is resolved, the diverging
    // slot's branch stores both materialize under opposite decisions of the
    // same controller, and the post-join read sees local memory. Merge
    // values nothing reads are cleaned away, so no multiplexer survives.
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).ifeq_fwd("else");
    asm.iconst(1).istore(3).goto_fwd("join");
    asm.label("else");
    asm.iconst(2).istore(3);
    asm.label("join");
    asm.iload(3).istore(0);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    assert_eq!(count_op(&outcome, Operator::Mux), 0);
    // Both branch constants survive distinctly.
    let consts: BTreeSet<i64> = outcome
        .cdfg
        .node_ids()
        .filter(|&n| outcome.cdfg.node(n).op == Operator::Const)
        .filter_map(|n| outcome.cdfg.node(n).value)
        .collect();
    assert!(consts.contains(&1) && consts.contains(&2));

    // The slot-3 stores are guarded by the inner conditional, one arm each.
    let guarded: Vec<bool> = outcome
        .cdfg
        .node_ids()
        .filter(|&n| {
            outcome.cdfg.node(n).op == Operator::Store
                && outcome.cdfg.node(n).value == Some(3)
        })
        .filter_map(|n| outcome.cdfg.node(n).controller)
        .map(|(_, decision)| decision)
        .collect();
    assert_eq!(guarded.len(), 2);
    assert!(guarded.contains(&true) && guarded.contains(&false));
}

#[test]
fn test_loop_containment() {
    let mut asm = BytecodeAssembler::new();
    let outer = asm.here();
    asm.iload(1).bipush(8).if_icmpge_fwd("exit");
    let inner = asm.here();
    asm.iload(2).bipush(4).if_icmpge_fwd("outer_step");
    asm.iinc(2, 1);
    asm.goto_back(inner);
    asm.label("outer_step");
    asm.iinc(1, 1);
    let back = asm.goto_back(outer);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), outer, back, SynthesisConfig::default());

    let loops = &outcome.loops.loops;
    assert_eq!(loops.len(), 2);
    for a in loops {
        for b in loops {
            if std::ptr::eq(a, b) {
                continue;
            }
            let disjoint = a.stop <= b.start || b.stop <= a.start;
            let contained = (a.start <= b.start && a.stop >= b.stop)
                || (b.start <= a.start && b.stop >= a.stop);
            assert!(disjoint || contained, "loops must nest properly");
        }
    }
    // Exactly one root.
    assert_eq!(loops.iter().filter(|l| l.parent.is_none()).count(), 1);
}

#[test]
fn test_unroll_by_one_is_idempotent() {
    let (code, start, stop) = counting_loop();
    let outcome = synthesize(
        code.clone(),
        start,
        stop,
        SynthesisConfig {
            unroll: 1,
            ..SynthesisConfig::default()
        },
    );
    // The analyzed window is byte-identical to the assembled one.
    assert_eq!(outcome.kernel_length as i32, stop - start);

    let again = synthesize(
        code,
        start,
        stop,
        SynthesisConfig {
            unroll: 1,
            ..SynthesisConfig::default()
        },
    );
    assert_eq!(outcome.cdfg.len(), again.cdfg.len());
}

#[test]
fn test_unroll_factor_clamps_to_length_bound() {
    let (code, start, stop) = counting_loop();
    // Body is 9 bytes; a 20-byte bound clamps factor 8 down to 2.
    let outcome = synthesize(
        code,
        start,
        stop,
        SynthesisConfig {
            unroll: 8,
            max_unroll_length: 20,
            ..SynthesisConfig::default()
        },
    );
    assert_eq!(outcome.kernel_length as i32, (stop - start) + 10);
}

#[test]
fn test_unrolled_loop_duplicates_body_operations() {
    let (code, start, stop) = counting_loop();
    let outcome = synthesize(
        code,
        start,
        stop,
        SynthesisConfig {
            unroll: 2,
            max_unroll_length: 600,
            cse: false,
            constant_folding: false,
            ..SynthesisConfig::default()
        },
    );
    // Two loop-exit compares, one per copy.
    assert_eq!(count_op(&outcome, Operator::Ifge), 2);
}

#[test]
fn test_patch_size_invariant() {
    let (code, start, stop) = counting_loop();
    let original: [u8; REPLACED_BYTES] = code[start as usize..start as usize + REPLACED_BYTES]
        .try_into()
        .unwrap();
    let outcome = synthesize(code, start, stop, SynthesisConfig::default());

    assert_eq!(outcome.patch.bytes.len(), REPLACED_BYTES);
    assert_eq!(outcome.patch.replaced, original);
    assert_eq!(outcome.patch.resume_offset as i32, stop - start);

    // Applying and reverting restores the stream.
    let (mut live, _, _) = counting_loop();
    let pristine = live.clone();
    outcome.patch.apply(&mut live, start as usize);
    assert_eq!(live[start as usize], 0xfe);
    assert_eq!(live[start as usize + 1], outcome.patch.kernel_id);
    outcome.patch.revert(&mut live, start as usize);
    assert_eq!(live, pristine);
}

#[test]
fn test_duplicate_array_read_folds_without_alias_candidate() {
    // x = a[0] + a[0] inside the loop: the second read folds away.
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.aload(0).iconst(0).iaload();
    asm.aload(0).iconst(0).iaload();
    asm.iadd().istore(2);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    assert_eq!(
        count_op(&outcome, Operator::DmaLoad),
        1,
        "second equal read must fold into the first"
    );
    assert!(outcome.aliases.is_empty());
}

#[test]
fn test_distinct_indices_keep_both_reads() {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.aload(0).iconst(0).iaload();
    asm.aload(0).iconst(1).iaload();
    asm.iadd().istore(2);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    assert_eq!(count_op(&outcome, Operator::DmaLoad), 2);
}

#[test]
fn test_array_write_then_read_records_no_false_alias() {
    // a[i] = x; y = a[i]: write-read forwarding, same handle and index.
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.aload(0).iload(1).iload(2).iastore();
    asm.aload(0).iload(1).iaload().istore(3);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    assert!(outcome.aliases.is_empty());
    assert_eq!(count_op(&outcome, Operator::DmaStore), 1);
}

#[test]
fn test_blacklisted_window_fails_without_cdfg() {
    let (code, start, stop) = counting_loop();
    let mut request = request_for(code, start, stop, 4);
    request.blacklist.insert(start as usize);
    let err = Synthesizer::new(request, SynthesisConfig::default())
        .generate()
        .unwrap_err();
    assert!(matches!(err, Error::Blacklisted { .. }));
}

#[test]
fn test_blacklisted_callee_fails() {
    let mut callee = BytecodeAssembler::new();
    callee.iload(0).istore(1).vreturn();
    let callee_bytes = callee.finish();

    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).invokestatic_quick(1);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let window = asm.finish();

    let mut section = window.clone();
    let callee_ref = section.len();
    section.extend_from_slice(&callee_bytes);

    let mut request = request_for(section.clone(), head, back, 4);
    request.methods = vec![
        MethodInfo {
            name: "app/Main/hot".into(),
            code_ref: 0,
            code_len: window.len(),
            arg_count: 0,
            max_locals: 4,
        },
        MethodInfo {
            name: "app/Main/helper".into(),
            code_ref: callee_ref,
            code_len: callee_bytes.len(),
            arg_count: 1,
            max_locals: 2,
        },
    ];
    request.code_section = section;
    request.blacklist.insert(callee_ref);

    let err = Synthesizer::new(request, SynthesisConfig::default())
        .generate()
        .unwrap_err();
    assert!(matches!(err, Error::Blacklisted { .. }));
}

#[test]
fn test_inlined_call_synthesizes_with_disjoint_namespaces() {
    let mut callee = BytecodeAssembler::new();
    callee.iload(0).istore(1).vreturn();
    let callee_bytes = callee.finish();

    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).invokestatic_quick(1);
    asm.iload(2).invokestatic_quick(1);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let window = asm.finish();

    let mut section = window.clone();
    let callee_ref = section.len();
    section.extend_from_slice(&callee_bytes);

    let mut request = request_for(section.clone(), head, back, 4);
    request.methods = vec![
        MethodInfo {
            name: "app/Main/hot".into(),
            code_ref: 0,
            code_len: window.len(),
            arg_count: 0,
            max_locals: 4,
        },
        MethodInfo {
            name: "app/Main/helper".into(),
            code_ref: callee_ref,
            code_len: callee_bytes.len(),
            arg_count: 1,
            max_locals: 2,
        },
    ];
    request.code_section = section;

    let outcome = Synthesizer::new(request, SynthesisConfig::default())
        .generate()
        .expect("two inlined calls synthesize");

    // The two frames never share a slot: every projected local access of
    // an inlined frame lives at 4..6 or 6..8, never both ranges for one
    // datum, and the root method's slots stay below 4.
    let frame_slots: BTreeSet<i64> = outcome
        .cdfg
        .node_ids()
        .filter(|&n| {
            matches!(
                outcome.cdfg.node(n).op,
                Operator::Load | Operator::Store | Operator::Load64 | Operator::Store64
            )
        })
        .filter_map(|n| outcome.cdfg.node(n).value)
        .filter(|&v| v >= 4)
        .collect();
    assert!(frame_slots.iter().any(|&v| (4..6).contains(&v)));
    assert!(frame_slots.iter().any(|&v| (6..8).contains(&v)));
    // Received/sent counts only cover the root method's namespace.
    assert!(outcome.locals_received <= 4);
}

#[test]
fn test_disabled_inlining_rejects_calls() {
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).invokestatic_quick(1);
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");

    let mut request = request_for(asm.finish(), head, back, 4);
    request.methods.push(MethodInfo {
        name: "app/Main/helper".into(),
        code_ref: 0,
        code_len: 4,
        arg_count: 1,
        max_locals: 2,
    });
    let config = SynthesisConfig {
        inline: false,
        ..SynthesisConfig::default()
    };
    let err = Synthesizer::new(request, config).generate().unwrap_err();
    assert!(matches!(err, Error::InliningDisabled { .. }));
}

#[test]
fn test_kernel_ids_come_from_the_kernel_table() {
    let (code, start, stop) = counting_loop();
    let mut request = request_for(code, start, stop, 4);
    request.kernels.deploy(0, [0; REPLACED_BYTES]);
    request.kernels.deploy(1, [0; REPLACED_BYTES]);
    let outcome = Synthesizer::new(request, SynthesisConfig::default())
        .generate()
        .unwrap();
    assert_eq!(outcome.patch.kernel_id, 2);
}

#[test]
fn test_controllers_guard_branch_arms() {
    // The conditional store must carry a controller with its decision.
    let mut asm = BytecodeAssembler::new();
    let head = asm.here();
    asm.iload(1).bipush(10).if_icmpge_fwd("exit");
    asm.iload(2).ifeq_fwd("skip");
    asm.aload(0).iload(1).iconst(5).iastore();
    asm.label("skip");
    asm.iinc(1, 1);
    let back = asm.goto_back(head);
    asm.label("exit");
    let outcome = synthesize(asm.finish(), head, back, SynthesisConfig::default());

    let store = outcome
        .cdfg
        .node_ids()
        .find(|&n| outcome.cdfg.node(n).op == Operator::DmaStore)
        .expect("array store survives");
    let (controller, decision) = outcome.cdfg.node(store).controller.expect("guarded");
    assert!(!decision, "store lives on the fall-through arm");
    assert_eq!(outcome.cdfg.node(controller).op, Operator::Ifeq);
}
