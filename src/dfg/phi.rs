//! Merge-node evaluation.
//!
//! A merge node receives one operand stack per incoming arm. The first
//! arrival parks its stack; the second unifies the two slot-by-slot and
//! element-by-element: identical values pass through, differing values are
//! joined by a merge datum (pass-through-wrapped when either side is itself
//! a merge), and stack-depth mismatches (legal only for multiple inlined
//! returns) are resolved through a synthetic local spill.

use std::collections::HashMap;

use crate::bytecode::Opcode;
use crate::cfg::InstrId;
use crate::dfg::eval::{fresh_creator, governing_sink, push_next};
use crate::dfg::{AccessHistory, Datum, DatumId, DatumKind, MemClass, VStack};
use crate::synth::SynthesisContext;
use crate::{Error, Result};

/// Evaluates a merge node.
///
/// # Errors
///
/// [`Error::NotSynthesizable`] when the controlling conditional's decision
/// datum is missing, which would leave merge values unguarded.
pub(crate) fn eval_phi(ctx: &mut SynthesisContext, id: InstrId, vs: VStack) -> Result<()> {
    let Some(old) = ctx.phi_parked.remove(&id) else {
        ctx.phi_parked.insert(id, vs);
        return Ok(());
    };

    let decision = vs.decision();
    let new = vs.split(&mut ctx.dfg, decision);
    let (t_stack, f_stack) = if decision { (new, old) } else { (old, new) };

    let mut merged = merge_stacks(ctx, id, t_stack, f_stack)?;
    merged.set_decision(ctx.graph.instr(id).decision);
    push_next(ctx, id, merged);
    Ok(())
}

/// Wraps a merge value in a pass-through so dependency edges onto the next
/// merge stay well-formed.
fn wrap_merge(ctx: &mut SynthesisContext, d: DatumId) -> DatumId {
    if ctx.dfg.datum(d).kind != DatumKind::Merge {
        return d;
    }
    let (value, reference, creator_addr) = {
        let datum = ctx.dfg.datum(d);
        (
            datum.value,
            datum.reference,
            ctx.graph.instr(datum.creator).addr,
        )
    };
    let creator = fresh_creator(ctx, Opcode::Nop, creator_addr, None, false);
    let mut pipe = Datum::new(DatumKind::Pipe, value, false, creator);
    pipe.reference = reference;
    let pipe = ctx.dfg.alloc(pipe);
    ctx.dfg.add_op(pipe);
    ctx.dfg.add_edge(d, pipe, 1);
    pipe
}

/// Builds a merge datum joining the two branch versions of one value.
fn merge_datum(
    ctx: &mut SynthesisContext,
    phi: InstrId,
    if_datum: DatumId,
    value: i64,
    od: DatumId,
    nd: DatumId,
) -> DatumId {
    let creator = ctx.dfg.datum(if_datum).creator;
    let wide = ctx.dfg.datum(od).wide;
    let mut datum = Datum::new(DatumKind::Merge, value, wide, creator);
    datum.reference = Some(od);
    // The controlling decision rides along for the projection.
    datum.index = Some(if_datum);
    let md = ctx.dfg.alloc(datum);
    if let Some(outer_sink) = governing_sink(ctx, phi) {
        ctx.dfg.add_sedge(outer_sink, md);
    }
    ctx.dfg.add_op(md);
    ctx.dfg.add_edge(nd, md, 1);
    ctx.dfg.add_edge(od, md, 2);
    md
}

fn merge_stacks(
    ctx: &mut SynthesisContext,
    phi: InstrId,
    mut t_stack: VStack,
    mut f_stack: VStack,
) -> Result<VStack> {
    let info = ctx
        .graph
        .instr(phi)
        .phi_info()
        .cloned()
        .ok_or_else(|| Error::NotSynthesizable("merge node without conditional".into()))?;
    let if_datum = info.if_datum.ok_or_else(|| {
        Error::NotSynthesizable("merge node evaluated before its conditional".into())
    })?;
    let if_instr = info.if_instr;

    let mut out = VStack::new();

    // Local slots.
    let f_locals: Vec<(i64, Option<DatumId>, Vec<DatumId>)> = f_stack
        .locals()
        .iter()
        .map(|(&slot, h)| (slot, h.last(), h.real_preds().to_vec()))
        .collect();
    for (slot, od, old_preds) in f_locals {
        let Some(od) = od else { continue };
        let new_hist = t_stack.locals().get(&slot);
        let nd = new_hist.and_then(|h| h.last());
        let new_preds = new_hist.map(|h| h.real_preds().to_vec()).unwrap_or_default();

        match nd {
            None => {
                out.local_add_merged(slot, od, old_preds);
                ctx.dfg.mark_necessary(od);
            }
            Some(nd) if nd == od => {
                let mut preds = old_preds;
                for p in new_preds {
                    if !preds.contains(&p) {
                        preds.push(p);
                    }
                }
                out.local_add_merged(slot, od, preds);
                ctx.dfg.mark_unnecessary(od);
            }
            Some(nd) => {
                let mut preds = new_preds;
                for p in old_preds {
                    if !preds.contains(&p) {
                        preds.push(p);
                    }
                }
                ctx.dfg.mark_necessary(od);
                ctx.dfg.mark_necessary(nd);
                let nd = wrap_merge(ctx, nd);
                let od = wrap_merge(ctx, od);
                let md = merge_datum(ctx, phi, if_datum, slot, od, nd);
                preds.push(md);
                out.local_add_merged(slot, md, preds);
            }
        }
    }
    let t_only: Vec<(i64, Option<DatumId>, Vec<DatumId>)> = t_stack
        .locals()
        .iter()
        .filter(|(slot, _)| !out.locals().contains_key(slot))
        .map(|(&slot, h)| (slot, h.last(), h.real_preds().to_vec()))
        .collect();
    for (slot, nd, preds) in t_only {
        let Some(nd) = nd else { continue };
        out.local_add_merged(slot, nd, preds);
        ctx.dfg.mark_necessary(nd);
    }

    // Static fields.
    let f_statics: Vec<(i64, DatumId)> = f_stack
        .statics()
        .iter()
        .map(|(&k, &d)| (k, d))
        .collect();
    for (key, od) in f_statics {
        let nd = t_stack.statics().get(&key).copied();
        match nd {
            None => {
                out.static_add(&ctx.dfg, od);
            }
            Some(nd) if nd == od => {
                out.static_add(&ctx.dfg, od);
            }
            Some(nd) => {
                let value = ctx.dfg.datum(od).value;
                let nd = wrap_merge(ctx, nd);
                let od = wrap_merge(ctx, od);
                let md = merge_datum(ctx, phi, if_datum, value, od, nd);
                out.static_add(&ctx.dfg, md);
            }
        }
    }
    let t_statics: Vec<DatumId> = t_stack
        .statics()
        .iter()
        .filter(|(k, _)| !out.statics().contains_key(k))
        .map(|(_, &d)| d)
        .collect();
    for nd in t_statics {
        out.static_add(&ctx.dfg, nd);
    }

    // Heap access histories.
    let mut merged_heap: HashMap<MemClass, AccessHistory> = HashMap::new();
    let f_heap = f_stack.heap_histories().clone();
    let t_heap = t_stack.heap_histories().clone();
    for (class, mut hist) in f_heap {
        if let Some(other) = t_heap.get(&class) {
            hist.merge(&mut ctx.graph, &mut ctx.dfg, other);
        }
        merged_heap.insert(class, hist);
    }
    for (class, hist) in t_heap {
        merged_heap.entry(class).or_insert(hist);
    }
    *out.heap_histories_mut() = merged_heap;

    // Stack elements. A depth mismatch happens only for multiple return
    // points during inlining; the excess values pass through unchanged.
    let mut merger_stack: Vec<DatumId> = Vec::new();
    while t_stack.depth() != f_stack.depth() {
        if t_stack.depth() > f_stack.depth() {
            merger_stack.push(t_stack.pop());
        } else {
            merger_stack.push(f_stack.pop());
        }
    }

    while t_stack.depth() != 0 && f_stack.depth() != 0 {
        let nd = t_stack.pop();
        let od = f_stack.pop();
        if nd == od {
            merger_stack.push(nd);
            continue;
        }

        // Both branches park their value in a fresh synthetic slot; the
        // reload gives the arms one agreed stack shape.
        let carrier = ctx.next_free_slot();
        let wide = ctx.dfg.datum(nd).wide;
        let if_addr = ctx.graph.instr(if_instr).addr;
        let (store_op, load_op) = if wide {
            (Opcode::Lstore, Opcode::Lload)
        } else {
            (Opcode::Istore, Opcode::Iload)
        };

        let c1 = fresh_creator(ctx, store_op, if_addr, Some(phi), true);
        let mut s1_datum = Datum::new(DatumKind::LocalWrite, carrier, wide, c1);
        s1_datum.stored = Some(nd);
        let s1 = ctx.dfg.alloc(s1_datum);

        let c2 = fresh_creator(ctx, store_op, if_addr, Some(phi), false);
        let mut s2_datum = Datum::new(DatumKind::LocalWrite, carrier, wide, c2);
        s2_datum.stored = Some(od);
        let s2 = ctx.dfg.alloc(s2_datum);

        let cl = fresh_creator(ctx, load_op, if_addr, None, false);
        let load = ctx
            .dfg
            .alloc(Datum::new(DatumKind::LocalRead, carrier, wide, cl));

        ctx.dfg.add_op(s1);
        ctx.dfg.add_op(s2);
        ctx.dfg.add_node(load);
        ctx.dfg.add_edge(nd, s1, 1);
        ctx.dfg.add_edge(od, s2, 1);
        ctx.dfg.add_sedge(if_datum, s1);
        ctx.dfg.add_sedge(if_datum, s2);
        ctx.dfg.add_sedge(s1, load);
        ctx.dfg.add_sedge(s2, load);

        merger_stack.push(load);
    }
    while t_stack.depth() != 0 {
        merger_stack.push(t_stack.pop());
    }
    while f_stack.depth() != 0 {
        merger_stack.push(f_stack.pop());
    }

    let mut values = Vec::with_capacity(merger_stack.len());
    while let Some(d) = merger_stack.pop() {
        values.push(d);
    }
    out.set_values(values);

    Ok(out)
}
