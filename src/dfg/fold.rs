//! Post passes over the finished value graph.
//!
//! Local stores that neither cross a branch/loop boundary nor produce the
//! slot's final value are folded away, merge/pipe nodes nothing reads are
//! cleaned up, and chains of associative operations are rebalanced so the
//! scheduler sees a shallower dependence tree.

use std::collections::HashMap;

use tracing::trace;

use crate::bytecode::Opcode;
use crate::dfg::eval::{creator_addr, creator_branch, same_branch};
use crate::dfg::{DatumId, DatumKind};
use crate::synth::SynthesisContext;

/// Folds unnecessary local stores.
///
/// A store is necessary when it sits at a branch or loop boundary or feeds
/// the controlling conditional; every other store forwards its source to
/// its same-branch consumers and, unless it produces the slot's final
/// version, disappears from the graph.
pub(crate) fn fold_local_stores(ctx: &mut SynthesisContext) {
    if ctx.all_lv_stores.is_empty() {
        return;
    }
    let final_stack = ctx.vstacks.get(&ctx.stop_instr).cloned().unwrap_or_default();

    let mut stores = ctx.all_lv_stores.clone();
    stores.sort_by_key(|&d| creator_addr(ctx, d));

    for store in stores {
        let Some(source) = ctx.dfg.preds(store).first().map(|e| e.sink) else {
            continue;
        };
        let source_d = ctx.dfg.datum(source);
        let store_value = ctx.dfg.datum(store).value;
        // A store fed by another slot's access is a blocking assignment
        // between slots and stays.
        if source_d.is_local() && source_d.value != store_value {
            continue;
        }

        let store_loop = ctx.loops.loop_of(creator_addr(ctx, store));
        let (src_bp, src_dec) = creator_branch(ctx, source);
        let mut forwarded: Vec<DatumId> = Vec::new();

        for edge in ctx.dfg.succs(store).to_vec() {
            let consumer = edge.sink;
            if ctx.dfg.datum(consumer).kind == DatumKind::Merge {
                continue;
            }
            if ctx.loops.loop_of(creator_addr(ctx, consumer)) != store_loop {
                continue;
            }
            let (c_bp, c_dec) = creator_branch(ctx, consumer);
            if same_branch(ctx, c_bp, c_dec, src_bp, src_dec) {
                ctx.dfg.add_edge(source, consumer, edge.slot);
                forwarded.push(consumer);
            } else {
                ctx.dfg.mark_necessary(store);
            }
        }
        for consumer in &forwarded {
            ctx.dfg.remove_edge(store, *consumer);
        }

        if !final_stack.is_last_local_access(&ctx.dfg, store) && !ctx.dfg.datum(store).necessary {
            trace!(slot = store_value, "folding local store");
            ctx.dfg.remove_op(store);
            ctx.dfg.remove_node(store);
            if !forwarded.is_empty() {
                ctx.dfg.remove_edge(source, store);
            }
            for succ in ctx.dfg.ssuccs(store).to_vec() {
                for pred in ctx.dfg.spreds(store).to_vec() {
                    ctx.dfg.add_sedge(pred, succ);
                }
            }
        }
    }
}

/// Removes merge and pipe nodes nothing reads.
///
/// A merge with only scheduling successors transfers those constraints to
/// its predecessors first; a merge with no successors at all disappears.
pub(crate) fn cleanup(ctx: &mut SynthesisContext) {
    let mut modified = true;
    while modified {
        modified = false;
        for d in ctx.dfg.nodes().to_vec() {
            if !ctx.dfg.datum(d).is_merge_like() || !ctx.dfg.contains(d) {
                continue;
            }
            let data_succs = ctx.dfg.succs(d).len();
            let sched_succs = ctx.dfg.ssuccs(d).len();

            if data_succs == 0 && sched_succs > 0 {
                for succ in ctx.dfg.ssuccs(d).to_vec() {
                    for pred in ctx.dfg.preds(d).to_vec() {
                        ctx.dfg.add_sedge(pred.sink, succ);
                    }
                    for pred in ctx.dfg.spreds(d).to_vec() {
                        ctx.dfg.add_sedge(pred, succ);
                    }
                }
                for succ in ctx.dfg.ssuccs(d).to_vec() {
                    ctx.dfg.remove_sedge(d, succ);
                }
                modified = true;
            }

            if ctx.dfg.succs(d).is_empty() && ctx.dfg.ssuccs(d).is_empty() {
                for pred in ctx.dfg.preds(d).to_vec() {
                    ctx.dfg.remove_edge(pred.sink, d);
                }
                for pred in ctx.dfg.spreds(d).to_vec() {
                    ctx.dfg.remove_sedge(pred, d);
                }
                ctx.dfg.remove_node(d);
                modified = true;
            }
        }
    }
}

#[derive(Clone, Copy)]
struct ChainElement {
    d: DatumId,
    /// Operand slot through which the chain continues; `None` for the
    /// chain's deepest element.
    link_slot: Option<u8>,
}

fn is_associative(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Ior | Opcode::Iand | Opcode::Iadd | Opcode::Imul | Opcode::Fadd
    )
}

/// Rebalances chains of one associative operation: `a + b + c + d` executes
/// in three dependent steps as emitted, two after pairing `(a + b) + (c + d)`.
pub(crate) fn reorder_chains(ctx: &mut SynthesisContext) {
    let mut chains: HashMap<DatumId, Vec<ChainElement>> = HashMap::new();

    let mut ops = ctx.dfg.ops().to_vec();
    ops.sort_by_key(|&d| creator_addr(ctx, d));

    for op in ops {
        let op_opcode = ctx.graph.instr(ctx.dfg.datum(op).creator).op;
        if !is_associative(op_opcode) {
            continue;
        }
        for edge in ctx.dfg.preds(op).to_vec() {
            let pred = edge.sink;
            let pred_opcode = ctx.graph.instr(ctx.dfg.datum(pred).creator).op;
            // A predecessor with other consumers must keep its exact result.
            if pred_opcode != op_opcode || ctx.dfg.succs(pred).len() != 1 {
                continue;
            }
            let mut chain = chains.remove(&pred).unwrap_or_else(|| {
                vec![ChainElement {
                    d: pred,
                    link_slot: None,
                }]
            });
            chain.push(ChainElement {
                d: op,
                link_slot: Some(edge.slot),
            });
            chains.insert(op, chain);
            break;
        }
    }

    for (head, mut chain) in chains {
        // Pairing a chain of two changes nothing.
        if chain.len() < 3 {
            continue;
        }
        trace!(len = chain.len(), "rebalancing associative chain");

        // Collect the leaf operands and cut every chain-internal edge.
        let mut leaves: Vec<DatumId> = Vec::new();
        for ce in &chain {
            for edge in ctx.dfg.preds(ce.d).to_vec() {
                if Some(edge.slot) != ce.link_slot && !leaves.contains(&edge.sink) {
                    leaves.push(edge.sink);
                }
                ctx.dfg.remove_edge(edge.sink, ce.d);
            }
        }
        leaves.sort_by_key(|&d| creator_addr(ctx, d));

        // Latest elements first: the head consumes the results of the
        // elements paired below it.
        chain.sort_by_key(|ce| std::cmp::Reverse(creator_addr(ctx, ce.d)));
        debug_assert_eq!(chain[0].d, head);

        let mut leaves = std::collections::VecDeque::from(leaves);
        // The head is placed from the start; everything below it becomes an
        // operand of some element above.
        let mut unplaced: std::collections::VecDeque<ChainElement> =
            chain.iter().skip(1).copied().collect();
        let mut unfilled: std::collections::VecDeque<ChainElement> = chain.into_iter().collect();

        while let Some(cur) = unfilled.pop_front() {
            for slot in [1u8, 2u8] {
                let operand = unplaced
                    .pop_front()
                    .map(|ce| ce.d)
                    .or_else(|| leaves.pop_front());
                if let Some(operand) = operand {
                    ctx.dfg.add_edge(operand, cur.d, slot);
                }
            }
        }
    }
}
